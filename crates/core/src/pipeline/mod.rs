pub mod chat;
pub mod playbook;
pub mod prompts;

use crate::config::Settings;
use crate::ingest::files::{self, ScratchDir};
use crate::ingest::prepare::{FileOutcome, FilePreparer, PollPolicy};
use crate::ingest::types::UploadedFile;
use crate::llm::{ContentPart, FileStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Failures the caller is expected to see and act on. Carried inside `anyhow::Error`;
/// the HTTP layer recovers them with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    EmptyInput(String),
    #[error("ticker {0} not found")]
    TickerNotFound(uuid::Uuid),
    #[error("none of the {0} uploaded file(s) could be processed; please try again")]
    NoUsableFiles(usize),
    #[error("model returned invalid JSON; please try again")]
    InvalidJson,
    #[error("the AI provider failed to answer; please try again")]
    ModelUnavailable,
    #[error("file {filename} is {size} bytes; limit is {limit}")]
    FileTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },
    #[error("file {filename} has unsupported type {mime}")]
    UnsupportedFile { filename: String, mime: String },
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Splits per-file outcomes into usable parts and a report for the caller.
fn collect_parts(outcomes: Vec<FileOutcome>) -> (Vec<ContentPart>, Vec<FileReport>) {
    let mut parts = Vec::new();
    let mut reports = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome.result {
            Ok(prepared) => {
                reports.push(FileReport {
                    filename: outcome.filename,
                    via: Some(prepared.via.as_str()),
                    error: None,
                });
                parts.push(prepared.part);
            }
            Err(err) => {
                tracing::warn!(filename = %outcome.filename, error = %err, "file could not be prepared");
                reports.push(FileReport {
                    filename: outcome.filename,
                    via: None,
                    error: Some(format!("{err:#}")),
                });
            }
        }
    }
    (parts, reports)
}

/// Where and how uploads are staged before they reach the model.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub scratch_root: PathBuf,
    pub max_upload_bytes: usize,
    pub poll: PollPolicy,
}

impl IngestOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            scratch_root: settings.scratch_root(),
            max_upload_bytes: files::max_upload_bytes(),
            poll: PollPolicy::from_env(),
        }
    }
}

/// Stages uploads in a per-request scratch dir, prepares each one independently and removes
/// the scratch dir on every path. Staging errors (size, type) are hard failures; preparation
/// failures are reported per file.
pub(crate) async fn stage_and_prepare(
    opts: &IngestOptions,
    file_store: Arc<dyn FileStore>,
    uploads: &[UploadedFile],
) -> anyhow::Result<(Vec<ContentPart>, Vec<FileReport>)> {
    let scratch = ScratchDir::create(&opts.scratch_root)?;
    let result = async {
        let staged = scratch.stage_all(uploads, opts.max_upload_bytes).await?;
        let outcomes = FilePreparer::new(file_store, opts.poll)
            .prepare_all(&staged)
            .await;
        anyhow::Ok(collect_parts(outcomes))
    }
    .await;

    if let Err(err) = scratch.close() {
        tracing::warn!(error = %err, "scratch cleanup failed");
    }
    result
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::llm::{FileState, FileStore, GenerateRequest, GenerativeModel, Provider, RemoteFile};
    use std::sync::Mutex;

    /// Scripted model: returns the configured reply (or error) and records every request.
    pub struct FakeModel {
        reply: Result<String, String>,
        pub requests: Mutex<Vec<GenerateRequest>>,
    }

    impl FakeModel {
        pub fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(err: &str) -> Self {
            Self {
                reply: Err(err.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn answer(&self, req: GenerateRequest) -> anyhow::Result<String> {
            self.requests.lock().unwrap().push(req);
            self.reply.clone().map_err(anyhow::Error::msg)
        }
    }

    #[async_trait::async_trait]
    impl GenerativeModel for FakeModel {
        fn provider(&self) -> Provider {
            Provider::Gemini
        }

        async fn generate_text(&self, req: GenerateRequest) -> anyhow::Result<String> {
            self.answer(req)
        }

        async fn generate_json(&self, req: GenerateRequest) -> anyhow::Result<String> {
            self.answer(req)
        }
    }

    /// Remote store that is always down, forcing the inline/text fallback.
    pub struct OfflineFileStore;

    #[async_trait::async_trait]
    impl FileStore for OfflineFileStore {
        async fn upload(
            &self,
            _bytes: Vec<u8>,
            _mime_type: &str,
            _display_name: &str,
        ) -> anyhow::Result<RemoteFile> {
            anyhow::bail!("file store offline")
        }

        async fn poll_state(&self, _file: &RemoteFile) -> anyhow::Result<FileState> {
            anyhow::bail!("file store offline")
        }
    }
}
