mod error;
mod routes;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use journal_core::config::Settings;
use journal_core::ingest::files::max_upload_bytes;
use journal_core::llm::gemini::GeminiClient;
use journal_core::pipeline::chat::ChatPipeline;
use journal_core::pipeline::playbook::PlaybookPipeline;
use journal_core::pipeline::IngestOptions;
use journal_core::pricing::clock::SystemClock;
use journal_core::pricing::quotes::YahooQuoteSource;
use journal_core::pricing::ratio::{PriceRatioCache, TtlPolicy};
use journal_core::storage::{JournalStore, PgJournalStore};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on files accepted in one multipart request.
const MAX_FILES_PER_REQUEST: usize = 10;

#[derive(Clone)]
pub struct AppState {
    pub store: Option<Arc<dyn JournalStore>>,
    pub chat: Option<Arc<ChatPipeline>>,
    pub playbooks: Option<Arc<PlaybookPipeline>>,
    pub ratios: Arc<PriceRatioCache>,
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

    let pool = connect_db(&settings).await;
    let store: Option<Arc<dyn JournalStore>> =
        pool.map(|pool| Arc::new(PgJournalStore::new(pool)) as Arc<dyn JournalStore>);

    let gemini = match settings.require_gemini_api_key() {
        Ok(_) => match GeminiClient::from_settings(&settings) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "gemini client init failed; AI routes disabled");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "GEMINI_API_KEY missing; AI routes disabled");
            None
        }
    };

    let max_upload = max_upload_bytes();
    let ingest = IngestOptions::from_settings(&settings);
    let (chat, playbooks) = match (&store, &gemini) {
        (Some(store), Some(gemini)) => (
            Some(Arc::new(ChatPipeline::new(
                gemini.clone(),
                gemini.clone(),
                store.clone(),
                ingest.clone(),
            ))),
            Some(Arc::new(PlaybookPipeline::new(
                gemini.clone(),
                gemini.clone(),
                store.clone(),
                ingest,
            ))),
        ),
        _ => (None, None),
    };

    let quotes = Arc::new(YahooQuoteSource::from_settings(&settings)?);
    let ratios = Arc::new(PriceRatioCache::new(
        quotes,
        Arc::new(SystemClock),
        TtlPolicy::default(),
    ));

    let state = AppState {
        store,
        chat,
        playbooks,
        ratios,
    };

    let uploads = Router::new()
        .route("/tickers/:ticker_id/chat", post(routes::post_chat))
        .route("/tickers/:ticker_id/playbooks", post(routes::post_playbook))
        .layer(DefaultBodyLimit::max(
            max_upload.saturating_mul(MAX_FILES_PER_REQUEST),
        ));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/tickers",
            get(routes::list_tickers).post(routes::create_ticker),
        )
        .route("/tickers/:ticker_id", get(routes::get_ticker))
        .route("/tickers/:ticker_id/messages", get(routes::list_messages))
        .route("/ratios/:symbol", get(routes::get_ratio))
        .route("/ratios/:symbol/convert", get(routes::convert_price))
        .merge(uploads)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, max_upload, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn connect_db(settings: &Settings) -> Option<PgPool> {
    match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match journal_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
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
