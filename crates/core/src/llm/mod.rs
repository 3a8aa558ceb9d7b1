pub mod error;
pub mod gemini;
pub mod json;
pub mod plan;
pub mod response;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
}

/// One piece of model input.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    FileRef { uri: String, mime_type: String },
    Inline { mime_type: String, data: Vec<u8> },
}

impl ContentPart {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::FileRef { .. } => "file_ref",
            Self::Inline { .. } => "inline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
}

#[async_trait::async_trait]
pub trait GenerativeModel: Send + Sync {
    fn provider(&self) -> Provider;

    /// Free-form text reply.
    async fn generate_text(&self, req: GenerateRequest) -> anyhow::Result<String>;

    /// Reply constrained to a single JSON document.
    async fn generate_json(&self, req: GenerateRequest) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Processing,
    Active,
    Failed,
}

#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> anyhow::Result<RemoteFile>;

    async fn poll_state(&self, file: &RemoteFile) -> anyhow::Result<FileState>;
}
