pub mod domain;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod pricing;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub gemini_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub quote_base_url: Option<String>,
        pub scratch_dir: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                quote_base_url: std::env::var("QUOTE_BASE_URL").ok(),
                scratch_dir: std::env::var("SCRATCH_DIR")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_gemini_api_key(&self) -> anyhow::Result<&str> {
            self.gemini_api_key
                .as_deref()
                .context("GEMINI_API_KEY is required")
        }

        pub fn scratch_root(&self) -> std::path::PathBuf {
            self.scratch_dir
                .as_deref()
                .map(std::path::PathBuf::from)
                .unwrap_or_else(std::env::temp_dir)
        }
    }
}
