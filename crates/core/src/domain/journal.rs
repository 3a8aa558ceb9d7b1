use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::playbook::PlaybookData;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub ticker_id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub id: Uuid,
    pub ticker_id: Uuid,
    pub note_id: Option<Uuid>,
    pub price: f64,
    pub kind: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub ticker_id: Uuid,
    pub note_id: Option<Uuid>,
    pub title: String,
    pub time: String,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub id: Uuid,
    pub ticker_id: Uuid,
    pub note_id: Option<Uuid>,
    pub title: String,
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub text: String,
    pub checked: bool,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookRecord {
    pub id: Uuid,
    pub ticker_id: Uuid,
    pub data: PlaybookData,
    pub source_files: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => anyhow::bail!("unknown chat role: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub ticker_id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub briefing: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub user_id: Uuid,
    pub ticker_id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub briefing: Option<serde_json::Value>,
}

/// Identifiers of the rows written for one game plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaterializedPlan {
    pub note_id: Uuid,
    pub level_ids: Vec<Uuid>,
    pub event_ids: Vec<Uuid>,
    pub checklist_id: Option<Uuid>,
}
