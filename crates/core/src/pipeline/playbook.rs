//! Documents in, persisted playbook out.

use crate::domain::journal::{ChatRole, NewChatMessage, PlaybookRecord};
use crate::domain::playbook::PlaybookData;
use crate::ingest::types::UploadedFile;
use crate::llm::{json, ContentPart, FileStore, GenerateRequest, GenerativeModel};
use crate::pipeline::prompts::{playbook_system_instruction, DEFAULT_PLAYBOOK_INSTRUCTION};
use crate::pipeline::{stage_and_prepare, FileReport, IngestOptions, PipelineError};
use crate::storage::JournalStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PlaybookRequest {
    pub user_id: Uuid,
    pub ticker_id: Uuid,
    pub files: Vec<UploadedFile>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookOutcome {
    pub playbook: PlaybookRecord,
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
    pub files: Vec<FileReport>,
}

pub struct PlaybookPipeline {
    model: Arc<dyn GenerativeModel>,
    file_store: Arc<dyn FileStore>,
    store: Arc<dyn JournalStore>,
    ingest: IngestOptions,
}

impl PlaybookPipeline {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        file_store: Arc<dyn FileStore>,
        store: Arc<dyn JournalStore>,
        ingest: IngestOptions,
    ) -> Self {
        Self {
            model,
            file_store,
            store,
            ingest,
        }
    }

    pub async fn run(&self, req: PlaybookRequest) -> anyhow::Result<PlaybookOutcome> {
        if req.files.is_empty() {
            return Err(PipelineError::EmptyInput("at least one file is required".into()).into());
        }
        let ticker = self
            .store
            .get_ticker(req.user_id, req.ticker_id)
            .await?
            .ok_or(PipelineError::TickerNotFound(req.ticker_id))?;

        let (mut parts, files) =
            stage_and_prepare(&self.ingest, self.file_store.clone(), &req.files).await?;
        if parts.is_empty() {
            return Err(PipelineError::NoUsableFiles(req.files.len()).into());
        }

        let text = req
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        parts.push(ContentPart::Text(
            text.unwrap_or(DEFAULT_PLAYBOOK_INSTRUCTION).to_string(),
        ));

        tracing::info!(
            ticker = %ticker.symbol,
            files = req.files.len(),
            parts = parts.len(),
            provider = ?self.model.provider(),
            "generating playbook"
        );
        let raw = self
            .model
            .generate_json(GenerateRequest {
                system_instruction: playbook_system_instruction(),
                parts,
            })
            .await
            .map_err(|err| {
                tracing::warn!(ticker = %ticker.symbol, error = %format!("{err:#}"), "playbook generation failed");
                err.context(PipelineError::ModelUnavailable)
            })?;

        let data = parse_playbook(&raw).ok_or_else(|| {
            tracing::error!(raw_len = raw.len(), "playbook reply is not a JSON object");
            PipelineError::InvalidJson
        })?;

        let source_files: Vec<String> = req.files.iter().map(|f| f.filename.clone()).collect();
        let playbook = self
            .store
            .create_playbook(req.user_id, ticker.id, &data, &source_files)
            .await?;

        let user_message = self
            .store
            .create_chat_message(NewChatMessage {
                user_id: req.user_id,
                ticker_id: ticker.id,
                role: ChatRole::User,
                content: upload_message(&source_files, text),
                briefing: None,
            })
            .await?;
        let assistant_message = self
            .store
            .create_chat_message(NewChatMessage {
                user_id: req.user_id,
                ticker_id: ticker.id,
                role: ChatRole::Assistant,
                content: data.summary_message(),
                briefing: None,
            })
            .await?;

        tracing::info!(ticker = %ticker.symbol, playbook_id = %playbook.id, "playbook stored");
        Ok(PlaybookOutcome {
            playbook,
            user_message_id: user_message.id,
            assistant_message_id: assistant_message.id,
            files,
        })
    }
}

/// Strict parse first, then the outermost object (from the first `{`) with trailing commas
/// repaired. A reply that never closes that object is invalid even if inner objects are whole.
pub fn parse_playbook(raw: &str) -> Option<PlaybookData> {
    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v) => v,
        Err(_) => {
            let start = raw.find('{')?;
            json::parse_lenient(json::balanced_object_at(raw, start)?)?
        }
    };
    if !value.is_object() {
        return None;
    }
    PlaybookData::from_model_value(value)
}

fn upload_message(files: &[String], text: Option<&str>) -> String {
    let mut out = format!(
        "Uploaded {} file(s) for playbook analysis: {}",
        files.len(),
        files.join(", ")
    );
    if let Some(text) = text {
        out.push_str("\n\n");
        out.push_str(text);
    }
    out
}
