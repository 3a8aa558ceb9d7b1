use anyhow::Context;
use clap::{Parser, Subcommand};
use journal_core::config::Settings;
use journal_core::ingest::types::UploadedFile;
use journal_core::llm::gemini::GeminiClient;
use journal_core::pipeline::playbook::{PlaybookPipeline, PlaybookRequest};
use journal_core::pipeline::IngestOptions;
use journal_core::pricing::clock::SystemClock;
use journal_core::pricing::quotes::YahooQuoteSource;
use journal_core::pricing::ratio::{PriceRatioCache, TtlPolicy};
use journal_core::storage::{JournalStore, MemoryStore, PgJournalStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "journal_worker")]
#[command(about = "Offline tools for the trading journal")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a playbook from local documents.
    Analyze {
        /// Owning user id.
        #[arg(long)]
        user: Uuid,

        /// Target ticker id. Required unless --dry-run.
        #[arg(long)]
        ticker: Option<Uuid>,

        /// Symbol for the scratch ticker created in dry-run mode.
        #[arg(long, default_value = "ES1!")]
        symbol: String,

        /// Document to analyze; repeat for several.
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,

        /// Free-text instruction sent with the documents.
        #[arg(long)]
        text: Option<String>,

        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the live futures/ETF ratio for a symbol.
    Ratio {
        #[arg(long)]
        symbol: String,

        /// Futures price to translate into ETF terms.
        #[arg(long)]
        price: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Analyze {
            user,
            ticker,
            symbol,
            files,
            text,
            dry_run,
        } => analyze(&settings, user, ticker, &symbol, &files, text, dry_run).await,
        Command::Ratio { symbol, price } => ratio(&settings, &symbol, price).await,
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker command failed");
    }
    result
}

async fn analyze(
    settings: &Settings,
    user: Uuid,
    ticker: Option<Uuid>,
    symbol: &str,
    paths: &[PathBuf],
    text: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let files = read_files(paths).await?;

    let (store, ticker_id): (Arc<dyn JournalStore>, Uuid) = if dry_run {
        let store = Arc::new(MemoryStore::new());
        let t = store.create_ticker(user, symbol, None).await?;
        tracing::info!(dry_run = true, ticker_id = %t.id, symbol, "using in-memory store");
        (store as Arc<dyn JournalStore>, t.id)
    } else {
        let ticker_id = ticker.context("--ticker is required unless --dry-run")?;
        let db_url = settings.require_database_url()?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(db_url)
            .await
            .context("connect DATABASE_URL failed")?;
        journal_core::storage::migrate(&pool).await?;
        (
            Arc::new(PgJournalStore::new(pool)) as Arc<dyn JournalStore>,
            ticker_id,
        )
    };

    settings.require_gemini_api_key()?;
    let gemini = Arc::new(GeminiClient::from_settings(settings)?);
    let pipeline = PlaybookPipeline::new(
        gemini.clone(),
        gemini,
        store,
        IngestOptions::from_settings(settings),
    );

    let outcome = pipeline
        .run(PlaybookRequest {
            user_id: user,
            ticker_id,
            files,
            text,
        })
        .await?;

    tracing::info!(
        playbook_id = %outcome.playbook.id,
        files = outcome.files.len(),
        dry_run,
        "playbook analysis complete"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn read_files(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadedFile>> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("{} has no file name", path.display()))?;
        out.push(UploadedFile {
            filename,
            declared_mime: None,
            bytes,
        });
    }
    Ok(out)
}

async fn ratio(settings: &Settings, symbol: &str, price: Option<f64>) -> anyhow::Result<()> {
    let cache = PriceRatioCache::new(
        Arc::new(YahooQuoteSource::from_settings(settings)?),
        Arc::new(SystemClock),
        TtlPolicy::default(),
    );
    let live = cache.get_live_ratio(symbol).await;
    tracing::info!(symbol, ratio = live.ratio, is_fallback = live.is_fallback, "ratio resolved");

    println!("{}", serde_json::to_string_pretty(&live)?);
    if let Some(price) = price {
        println!(
            "{} {} -> {} {:.2}",
            live.symbol,
            price,
            live.etf_symbol.as_deref().unwrap_or(&live.symbol),
            live.futures_to_etf(price)
        );
    }
    Ok(())
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyze_with_repeated_files() {
        let args = Args::try_parse_from([
            "journal_worker",
            "analyze",
            "--user",
            "7a1c3a52-7a4f-4c61-9a53-0d1f6c7b6a10",
            "--file",
            "deck.pdf",
            "--file",
            "chart.png",
            "--dry-run",
        ])
        .unwrap();
        match args.command {
            Command::Analyze {
                files,
                dry_run,
                ticker,
                symbol,
                ..
            } => {
                assert_eq!(files.len(), 2);
                assert!(dry_run);
                assert!(ticker.is_none());
                assert_eq!(symbol, "ES1!");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn analyze_requires_a_file() {
        assert!(Args::try_parse_from([
            "journal_worker",
            "analyze",
            "--user",
            "7a1c3a52-7a4f-4c61-9a53-0d1f6c7b6a10",
        ])
        .is_err());
    }

    #[tokio::test]
    async fn reads_local_files_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"5000 holds").unwrap();

        let files = read_files(&[path]).await.unwrap();
        assert_eq!(files[0].filename, "notes.txt");
        assert_eq!(files[0].bytes, b"5000 holds");
        assert!(files[0].declared_mime.is_none());
    }
}
