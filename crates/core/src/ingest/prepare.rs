//! Turns staged files into model input parts: remote reference first, inline or text fallback.

use crate::ingest::extract::extract_text;
use crate::ingest::types::StagedFile;
use crate::llm::{ContentPart, FileState, FileStore, RemoteFile};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_POLL_ATTEMPTS: u32 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PollPolicy {
    pub fn from_env() -> Self {
        let attempts = std::env::var("GEMINI_FILE_POLL_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POLL_ATTEMPTS);
        let interval_ms = std::env::var("GEMINI_FILE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        Self {
            attempts,
            interval: Duration::from_millis(interval_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparedVia {
    Remote,
    Inline,
    Text,
}

impl PreparedVia {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Inline => "inline",
            Self::Text => "text",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedPart {
    pub filename: String,
    pub via: PreparedVia,
    pub part: ContentPart,
}

/// Outcome of preparing one file; failures of one file never affect the others.
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub result: Result<PreparedPart>,
}

pub struct FilePreparer {
    store: Arc<dyn FileStore>,
    policy: PollPolicy,
}

impl FilePreparer {
    pub fn new(store: Arc<dyn FileStore>, policy: PollPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn prepare_all(&self, files: &[StagedFile]) -> Vec<FileOutcome> {
        futures::future::join_all(files.iter().map(|f| async move {
            FileOutcome {
                filename: f.filename.clone(),
                result: self.prepare(f).await,
            }
        }))
        .await
    }

    pub async fn prepare(&self, file: &StagedFile) -> Result<PreparedPart> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .with_context(|| format!("failed to read staged {}", file.filename))?;

        match self.upload_and_wait(file, bytes.clone()).await {
            Ok(remote) => {
                tracing::info!(filename = %file.filename, remote = %remote.name, "file ready on remote store");
                return Ok(PreparedPart {
                    filename: file.filename.clone(),
                    via: PreparedVia::Remote,
                    part: ContentPart::FileRef {
                        uri: remote.uri,
                        mime_type: remote.mime_type,
                    },
                });
            }
            Err(err) => {
                tracing::warn!(filename = %file.filename, mime = %file.mime_type, error = %err, "remote staging failed; falling back");
            }
        }

        if file.is_image() {
            return Ok(PreparedPart {
                filename: file.filename.clone(),
                via: PreparedVia::Inline,
                part: ContentPart::Inline {
                    mime_type: file.mime_type.clone(),
                    data: bytes,
                },
            });
        }

        let text = extract_text(file).await?;
        Ok(PreparedPart {
            filename: file.filename.clone(),
            via: PreparedVia::Text,
            part: ContentPart::Text(format!(
                "--- Content of {} ---\n{}\n--- End of {} ---",
                file.filename, text, file.filename
            )),
        })
    }

    async fn upload_and_wait(&self, file: &StagedFile, bytes: Vec<u8>) -> Result<RemoteFile> {
        let remote = self
            .store
            .upload(bytes, &file.mime_type, &file.filename)
            .await
            .context("upload failed")?;

        for attempt in 1..=self.policy.attempts {
            match self.store.poll_state(&remote).await? {
                FileState::Active => return Ok(remote),
                FileState::Failed => anyhow::bail!("remote processing failed for {}", remote.name),
                FileState::Processing => {
                    tracing::debug!(remote = %remote.name, attempt, "remote file still processing");
                    if attempt < self.policy.attempts {
                        tokio::time::sleep(self.policy.interval).await;
                    }
                }
            }
        }
        anyhow::bail!(
            "remote file {} not active after {} polls",
            remote.name,
            self.policy.attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ready,
        UploadFails,
        NeverActive,
        Fails,
    }

    struct FakeStore {
        behaviour: Behaviour,
        polls: AtomicU32,
    }

    impl FakeStore {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                polls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl FileStore for FakeStore {
        async fn upload(
            &self,
            _bytes: Vec<u8>,
            mime_type: &str,
            display_name: &str,
        ) -> anyhow::Result<RemoteFile> {
            if matches!(self.behaviour, Behaviour::UploadFails) {
                anyhow::bail!("quota exceeded");
            }
            Ok(RemoteFile {
                name: format!("files/{display_name}"),
                uri: format!("https://files.test/{display_name}"),
                mime_type: mime_type.to_string(),
            })
        }

        async fn poll_state(&self, _file: &RemoteFile) -> anyhow::Result<FileState> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(match self.behaviour {
                Behaviour::Ready if n >= 2 => FileState::Active,
                Behaviour::Fails => FileState::Failed,
                _ => FileState::Processing,
            })
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
        }
    }

    fn staged(dir: &Path, name: &str, mime: &str, bytes: &[u8]) -> StagedFile {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        StagedFile {
            filename: name.to_string(),
            mime_type: mime.to_string(),
            path,
            size: bytes.len(),
        }
    }

    #[tokio::test]
    async fn active_upload_becomes_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::new(Behaviour::Ready);
        let preparer = FilePreparer::new(store.clone(), policy());

        let part = preparer
            .prepare(&staged(dir.path(), "deck.pdf", "application/pdf", b"%PDF"))
            .await
            .unwrap();
        assert_eq!(part.via, PreparedVia::Remote);
        assert_eq!(
            part.part,
            ContentPart::FileRef {
                uri: "https://files.test/deck.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
            }
        );
        assert_eq!(store.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn image_falls_back_to_inline_after_poll_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = FakeStore::new(Behaviour::NeverActive);
        let preparer = FilePreparer::new(store.clone(), policy());

        let part = preparer
            .prepare(&staged(dir.path(), "chart.png", "image/png", &[1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(part.via, PreparedVia::Inline);
        assert_eq!(
            part.part,
            ContentPart::Inline {
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
            }
        );
        assert_eq!(store.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn text_falls_back_to_extracted_content() {
        let dir = tempfile::tempdir().unwrap();
        let preparer = FilePreparer::new(FakeStore::new(Behaviour::Fails), policy());

        let part = preparer
            .prepare(&staged(dir.path(), "plan.txt", "text/plain", b"Short below 5100"))
            .await
            .unwrap();
        assert_eq!(part.via, PreparedVia::Text);
        match part.part {
            ContentPart::Text(t) => assert!(t.contains("Short below 5100")),
            other => panic!("unexpected part {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn outcomes_are_isolated_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let preparer = FilePreparer::new(FakeStore::new(Behaviour::UploadFails), policy());
        let files = vec![
            staged(dir.path(), "bad.pdf", "application/pdf", b"garbage"),
            staged(dir.path(), "ok.png", "image/png", &[9]),
        ];

        let outcomes = preparer.prepare_all(&files).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].filename, "bad.pdf");
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[1].result.as_ref().unwrap().via, PreparedVia::Inline);
    }
}
