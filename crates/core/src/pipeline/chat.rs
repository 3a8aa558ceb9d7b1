//! One conversational turn: stored context + optional documents in, parsed envelope out.

use crate::domain::briefing::{BlockStatus, ResponseEnvelope};
use crate::domain::game_plan::GamePlan;
use crate::domain::journal::{
    ChatMessage, ChatRole, Checklist, Level, MaterializedPlan, NewChatMessage, Note,
    PlaybookRecord, Ticker,
};
use crate::ingest::types::UploadedFile;
use crate::llm::plan::extract_game_plan;
use crate::llm::response::parse_response;
use crate::llm::{ContentPart, FileStore, GenerateRequest, GenerativeModel};
use crate::pipeline::prompts::{chat_system_instruction, HISTORY_MESSAGES};
use crate::pipeline::{stage_and_prepare, FileReport, IngestOptions, PipelineError};
use crate::storage::JournalStore;
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

const DOCUMENT_ONLY_PROMPT: &str = "Summarize the attached documents and extract a game plan.";

/// Everything stored for a ticker that the assistant gets to see.
#[derive(Debug, Clone)]
pub struct JournalContext {
    pub ticker: Ticker,
    pub latest_note: Option<Note>,
    pub levels: Vec<Level>,
    pub checklist: Option<Checklist>,
    pub playbook: Option<PlaybookRecord>,
    pub history: Vec<ChatMessage>,
}

impl JournalContext {
    pub async fn load(
        store: &dyn JournalStore,
        user_id: Uuid,
        ticker_id: Uuid,
    ) -> anyhow::Result<Self> {
        let ticker = store
            .get_ticker(user_id, ticker_id)
            .await?
            .ok_or(PipelineError::TickerNotFound(ticker_id))?;
        let (latest_note, levels, checklist, playbook, history) = tokio::try_join!(
            store.latest_note(ticker.id),
            store.list_levels(ticker.id),
            store.latest_checklist(ticker.id),
            store.active_playbook(ticker.id),
            store.list_chat_messages(ticker.id, HISTORY_MESSAGES),
        )?;
        Ok(Self {
            ticker,
            latest_note,
            levels,
            checklist,
            playbook,
            history,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: Uuid,
    pub ticker_id: Uuid,
    pub message: String,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    #[serde(flatten)]
    pub envelope: ResponseEnvelope,
    /// True when the model was unreachable and the reply was assembled locally.
    pub fallback: bool,
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_plan: Option<GamePlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialized: Option<MaterializedPlan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileReport>,
}

pub struct ChatPipeline {
    model: Arc<dyn GenerativeModel>,
    file_store: Arc<dyn FileStore>,
    store: Arc<dyn JournalStore>,
    ingest: IngestOptions,
}

impl ChatPipeline {
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

    pub async fn run(&self, req: ChatRequest) -> anyhow::Result<ChatReply> {
        let message = req.message.trim();
        if message.is_empty() && req.files.is_empty() {
            return Err(PipelineError::EmptyInput("message must not be empty".into()).into());
        }
        let ctx = JournalContext::load(self.store.as_ref(), req.user_id, req.ticker_id).await?;

        let (mut parts, files) = if req.files.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            stage_and_prepare(&self.ingest, self.file_store.clone(), &req.files).await?
        };
        // Only documents the model actually receives unlock the game-plan path.
        let documents_used = !parts.is_empty();
        if !req.files.is_empty() && !documents_used {
            tracing::warn!(ticker = %ctx.ticker.symbol, files = req.files.len(), "no attachment usable; continuing text-only");
        }
        parts.push(ContentPart::Text(if message.is_empty() {
            DOCUMENT_ONLY_PROMPT.to_string()
        } else {
            message.to_string()
        }));

        let generated = self
            .model
            .generate_text(GenerateRequest {
                system_instruction: chat_system_instruction(&ctx, documents_used),
                parts,
            })
            .await;

        let (envelope, raw, fallback) = match generated {
            Ok(raw) => (parse_response(&raw), Some(raw), false),
            Err(err) => {
                tracing::warn!(ticker = %ctx.ticker.symbol, error = %err, "model call failed; answering from stored data");
                let envelope = ResponseEnvelope {
                    human_text: local_summary(&ctx),
                    briefing: None,
                    block: BlockStatus::None,
                };
                (envelope, None, true)
            }
        };
        if envelope.block == BlockStatus::Malformed || envelope.block == BlockStatus::Unrecognized {
            tracing::warn!(block = ?envelope.block, "reply carried an unusable briefing block");
        }

        let game_plan = match (&raw, documents_used) {
            (Some(raw), true) => extract_game_plan(raw, envelope.briefing.as_ref()),
            _ => None,
        };
        let materialized = match &game_plan {
            Some(plan) => Some(
                self.store
                    .materialize_game_plan(req.user_id, ctx.ticker.id, plan)
                    .await
                    .context("failed to store game plan")?,
            ),
            None => None,
        };

        let user_message = self
            .store
            .create_chat_message(NewChatMessage {
                user_id: req.user_id,
                ticker_id: ctx.ticker.id,
                role: ChatRole::User,
                content: user_content(message, &req.files),
                briefing: None,
            })
            .await?;

        let briefing = envelope
            .briefing
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("failed to serialize briefing")?;
        let assistant_message = self
            .store
            .create_chat_message(NewChatMessage {
                user_id: req.user_id,
                ticker_id: ctx.ticker.id,
                role: ChatRole::Assistant,
                content: envelope.human_text.clone(),
                briefing,
            })
            .await?;

        tracing::info!(
            ticker = %ctx.ticker.symbol,
            block = ?envelope.block,
            fallback,
            game_plan = game_plan.is_some(),
            "chat exchange stored"
        );
        Ok(ChatReply {
            envelope,
            fallback,
            user_message_id: user_message.id,
            assistant_message_id: assistant_message.id,
            game_plan,
            materialized,
            files,
        })
    }
}

fn user_content(message: &str, files: &[UploadedFile]) -> String {
    if files.is_empty() {
        return message.to_string();
    }
    let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
    let attached = format!("Attached: {}", names.join(", "));
    if message.is_empty() {
        attached
    } else {
        format!("{message}\n\n{attached}")
    }
}

/// Reply built purely from stored data when the model is unavailable.
pub fn local_summary(ctx: &JournalContext) -> String {
    let mut out = format!(
        "The AI assistant is unavailable right now. Here is what is on file for {}.",
        ctx.ticker.symbol
    );

    if let Some(note) = &ctx.latest_note {
        out.push_str(&format!("\n\nLatest note: {}", note.title));
    }

    if ctx.levels.is_empty() {
        out.push_str("\n\nNo key levels saved yet.");
    } else {
        out.push_str("\n\nKey levels:");
        for level in &ctx.levels {
            out.push_str(&format!("\n- {} ({})", level.price, level.kind));
            if let Some(label) = &level.label {
                out.push_str(&format!(" {label}"));
            }
        }
    }

    if let Some(checklist) = &ctx.checklist {
        let done = checklist.items.iter().filter(|i| i.checked).count();
        out.push_str(&format!(
            "\n\n{} ({}/{} done):",
            checklist.title,
            done,
            checklist.items.len()
        ));
        for item in &checklist.items {
            let mark = if item.checked { "x" } else { " " };
            out.push_str(&format!("\n- [{mark}] {}", item.text));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game_plan::{Bias, GamePlanLevel, LevelKind};
    use crate::ingest::prepare::PollPolicy;
    use crate::pipeline::testing::{FakeModel, OfflineFileStore};
    use crate::storage::MemoryStore;
    use std::time::Duration;

    struct Harness {
        _root: tempfile::TempDir,
        store: Arc<MemoryStore>,
        model: Arc<FakeModel>,
        pipeline: ChatPipeline,
        user: Uuid,
        ticker: Ticker,
    }

    async fn harness(model: FakeModel) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(model);
        let user = Uuid::new_v4();
        let ticker = store.create_ticker(user, "ES1!", None).await.unwrap();
        let pipeline = ChatPipeline::new(
            model.clone(),
            Arc::new(OfflineFileStore),
            store.clone(),
            IngestOptions {
                scratch_root: root.path().to_path_buf(),
                max_upload_bytes: 4096,
                poll: PollPolicy {
                    attempts: 1,
                    interval: Duration::from_millis(1),
                },
            },
        );
        Harness {
            _root: root,
            store,
            model,
            pipeline,
            user,
            ticker,
        }
    }

    fn chat(h: &Harness, message: &str, files: Vec<UploadedFile>) -> ChatRequest {
        ChatRequest {
            user_id: h.user,
            ticker_id: h.ticker.id,
            message: message.to_string(),
            files,
        }
    }

    #[tokio::test]
    async fn plain_chat_parses_and_persists_both_messages() {
        let reply = "Buyers are in control above 5000.\n```briefing\n{\"bluf\":\"Long above 5000\",\"sentiment\":{\"bias\":\"bullish\"}}\n```";
        let h = harness(FakeModel::replying(reply)).await;

        let out = h.pipeline.run(chat(&h, "What's my bias?", vec![])).await.unwrap();
        assert!(!out.fallback);
        assert_eq!(out.envelope.block, BlockStatus::Parsed);
        assert_eq!(out.envelope.human_text, "Buyers are in control above 5000.");
        assert!(out.game_plan.is_none());

        let messages = h.store.list_chat_messages(h.ticker.id, 10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "What's my bias?");
        assert_eq!(messages[1].id, out.assistant_message_id);
        assert_eq!(messages[1].content, "Buyers are in control above 5000.");
        let stored = messages[1].briefing.as_ref().unwrap();
        assert_eq!(stored["sentiment"]["bias"], "BULLISH");
    }

    #[tokio::test]
    async fn model_failure_answers_from_stored_levels() {
        let h = harness(FakeModel::failing("503 from provider")).await;
        let plan = GamePlan {
            title: "Plan".to_string(),
            summary: None,
            bias: Bias::Neutral,
            levels: vec![GamePlanLevel {
                price: 4990.0,
                kind: LevelKind::Support,
                label: Some("demand".to_string()),
            }],
            checklist: vec!["Wait for IB".to_string()],
            events: vec![],
            if_then_scenarios: vec![],
        };
        h.store
            .materialize_game_plan(h.user, h.ticker.id, &plan)
            .await
            .unwrap();

        let out = h.pipeline.run(chat(&h, "Where is support?", vec![])).await.unwrap();
        assert!(out.fallback);
        assert!(out.envelope.briefing.is_none());
        assert!(out.envelope.human_text.contains("4990 (support) demand"));
        assert!(out.envelope.human_text.contains("- [ ] Wait for IB"));
        assert_eq!(h.store.list_chat_messages(h.ticker.id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn document_reply_materializes_game_plan() {
        let reply = "Deck read.\n```briefing\n{\"bluf\":\"Fade 5100\",\"gamePlan\":{\"title\":\"Fade the rip\",\"bias\":\"bearish\",\"levels\":[{\"price\":5100,\"type\":\"resistance\"}],\"checklist\":[\"Confirm rejection\"],\"events\":[{\"title\":\"FOMC\"}]}}\n```";
        let h = harness(FakeModel::replying(reply)).await;
        let file = UploadedFile {
            filename: "levels.txt".to_string(),
            declared_mime: Some("text/plain".to_string()),
            bytes: b"Resistance 5100".to_vec(),
        };

        let out = h.pipeline.run(chat(&h, "", vec![file])).await.unwrap();
        let ids = out.materialized.unwrap();
        assert_eq!(ids.level_ids.len(), 1);
        assert_eq!(ids.event_ids.len(), 1);
        assert!(ids.checklist_id.is_some());
        assert_eq!(out.game_plan.unwrap().title, "Fade the rip");
        assert_eq!(out.files[0].via, Some("text"));

        let events = h.store.events(h.ticker.id).await;
        assert_eq!(events[0].time, "TBD");
        assert_eq!(events[0].impact, "medium");
        let levels = h.store.list_levels(h.ticker.id).await.unwrap();
        assert_eq!(levels[0].kind, "resistance");

        let requests = h.model.requests.lock().unwrap();
        assert!(requests[0].system_instruction.contains("gamePlan"));
        assert_eq!(
            requests[0].parts.last(),
            Some(&ContentPart::Text(DOCUMENT_ONLY_PROMPT.to_string()))
        );
        assert_eq!(h.store.notes(h.ticker.id).await.len(), 1);
    }

    #[tokio::test]
    async fn plain_chat_never_materializes_a_plan() {
        let reply = "Here.\n```briefing\n{\"bluf\":\"x\",\"gamePlan\":{\"title\":\"T\",\"levels\":[]}}\n```";
        let h = harness(FakeModel::replying(reply)).await;
        let out = h.pipeline.run(chat(&h, "hi", vec![])).await.unwrap();
        assert!(out.materialized.is_none());
        assert!(h.store.notes(h.ticker.id).await.is_empty());
    }

    #[tokio::test]
    async fn unusable_attachment_continues_text_only() {
        let reply = "Noted.\n```briefing\n{\"bluf\":\"x\",\"gamePlan\":{\"title\":\"Invented\",\"bias\":\"bullish\",\"levels\":[{\"price\":5000,\"type\":\"support\"}]}}\n```";
        let h = harness(FakeModel::replying(reply)).await;
        let file = UploadedFile {
            filename: "scan.pdf".to_string(),
            declared_mime: None,
            bytes: b"garbage".to_vec(),
        };

        let out = h.pipeline.run(chat(&h, "Thoughts?", vec![file])).await.unwrap();
        assert_eq!(out.envelope.human_text, "Noted.");
        assert!(out.files[0].error.is_some());
        assert!(out.game_plan.is_none());
        assert!(out.materialized.is_none());
        assert!(h.store.notes(h.ticker.id).await.is_empty());
        assert!(h.store.list_levels(h.ticker.id).await.unwrap().is_empty());

        let requests = h.model.requests.lock().unwrap();
        assert_eq!(requests[0].parts.len(), 1);
        assert!(!requests[0].system_instruction.contains("gamePlan"));
    }

    #[tokio::test]
    async fn empty_message_without_files_is_rejected() {
        let h = harness(FakeModel::replying("x")).await;
        let err = h.pipeline.run(chat(&h, "   ", vec![])).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyInput(_))
        ));
        assert!(h.model.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn reply_serializes_envelope_fields_flat() {
        let reply = ChatReply {
            envelope: ResponseEnvelope {
                human_text: "hi".to_string(),
                briefing: None,
                block: BlockStatus::None,
            },
            fallback: true,
            user_message_id: Uuid::nil(),
            assistant_message_id: Uuid::nil(),
            game_plan: None,
            materialized: None,
            files: vec![],
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["humanText"], "hi");
        assert_eq!(v["briefing"], serde_json::Value::Null);
        assert_eq!(v["fallback"], true);
        assert!(v.get("gamePlan").is_none());
    }
}
