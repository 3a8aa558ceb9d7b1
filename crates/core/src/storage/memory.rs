use crate::domain::game_plan::GamePlan;
use crate::domain::journal::{
    ChatMessage, Checklist, ChecklistItem, Event, Level, MaterializedPlan, NewChatMessage, Note,
    PlaybookRecord, Ticker,
};
use crate::domain::playbook::PlaybookData;
use crate::storage::{checklist_title, JournalStore};
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    tickers: Vec<Ticker>,
    notes: Vec<Note>,
    levels: Vec<Level>,
    events: Vec<Event>,
    checklists: Vec<Checklist>,
    playbooks: Vec<PlaybookRecord>,
    messages: Vec<ChatMessage>,
}

/// In-process store used by tests and worker dry runs. Rows are kept in insertion order, so
/// "latest" means last inserted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self, ticker_id: Uuid) -> Vec<Event> {
        let t = self.tables.lock().await;
        t.events
            .iter()
            .filter(|e| e.ticker_id == ticker_id)
            .cloned()
            .collect()
    }

    pub async fn notes(&self, ticker_id: Uuid) -> Vec<Note> {
        let t = self.tables.lock().await;
        t.notes
            .iter()
            .filter(|n| n.ticker_id == ticker_id)
            .cloned()
            .collect()
    }

    pub async fn playbooks(&self, ticker_id: Uuid) -> Vec<PlaybookRecord> {
        let t = self.tables.lock().await;
        t.playbooks
            .iter()
            .filter(|p| p.ticker_id == ticker_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl JournalStore for MemoryStore {
    async fn create_ticker(
        &self,
        user_id: Uuid,
        symbol: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Ticker> {
        let ticker = Ticker {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.trim().to_string(),
            name: name.map(str::to_string),
            created_at: Utc::now(),
        };
        self.tables.lock().await.tickers.push(ticker.clone());
        Ok(ticker)
    }

    async fn get_ticker(&self, user_id: Uuid, ticker_id: Uuid) -> anyhow::Result<Option<Ticker>> {
        let t = self.tables.lock().await;
        Ok(t.tickers
            .iter()
            .find(|x| x.id == ticker_id && x.user_id == user_id)
            .cloned())
    }

    async fn list_tickers(&self, user_id: Uuid) -> anyhow::Result<Vec<Ticker>> {
        let t = self.tables.lock().await;
        let mut out: Vec<Ticker> = t
            .tickers
            .iter()
            .filter(|x| x.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn latest_note(&self, ticker_id: Uuid) -> anyhow::Result<Option<Note>> {
        let t = self.tables.lock().await;
        Ok(t.notes
            .iter()
            .rev()
            .find(|n| n.ticker_id == ticker_id)
            .cloned())
    }

    async fn list_levels(&self, ticker_id: Uuid) -> anyhow::Result<Vec<Level>> {
        let t = self.tables.lock().await;
        let mut out: Vec<Level> = t
            .levels
            .iter()
            .filter(|l| l.ticker_id == ticker_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.price.total_cmp(&a.price));
        Ok(out)
    }

    async fn latest_checklist(&self, ticker_id: Uuid) -> anyhow::Result<Option<Checklist>> {
        let t = self.tables.lock().await;
        Ok(t.checklists
            .iter()
            .rev()
            .find(|c| c.ticker_id == ticker_id)
            .cloned())
    }

    async fn active_playbook(&self, ticker_id: Uuid) -> anyhow::Result<Option<PlaybookRecord>> {
        let t = self.tables.lock().await;
        Ok(t.playbooks
            .iter()
            .rev()
            .find(|p| p.ticker_id == ticker_id && p.is_active)
            .cloned())
    }

    async fn create_playbook(
        &self,
        _user_id: Uuid,
        ticker_id: Uuid,
        data: &PlaybookData,
        source_files: &[String],
    ) -> anyhow::Result<PlaybookRecord> {
        let mut t = self.tables.lock().await;
        for p in t.playbooks.iter_mut().filter(|p| p.ticker_id == ticker_id) {
            p.is_active = false;
        }
        let record = PlaybookRecord {
            id: Uuid::new_v4(),
            ticker_id,
            data: data.clone(),
            source_files: source_files.to_vec(),
            is_active: true,
            created_at: Utc::now(),
        };
        t.playbooks.push(record.clone());
        Ok(record)
    }

    async fn create_chat_message(&self, msg: NewChatMessage) -> anyhow::Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            ticker_id: msg.ticker_id,
            role: msg.role,
            content: msg.content,
            briefing: msg.briefing,
            created_at: Utc::now(),
        };
        self.tables.lock().await.messages.push(message.clone());
        Ok(message)
    }

    async fn list_chat_messages(
        &self,
        ticker_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        let t = self.tables.lock().await;
        let all: Vec<&ChatMessage> = t
            .messages
            .iter()
            .filter(|m| m.ticker_id == ticker_id)
            .collect();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).cloned().collect())
    }

    async fn materialize_game_plan(
        &self,
        _user_id: Uuid,
        ticker_id: Uuid,
        plan: &GamePlan,
    ) -> anyhow::Result<MaterializedPlan> {
        let now = Utc::now();
        let note = Note {
            id: Uuid::new_v4(),
            ticker_id,
            title: plan.title.clone(),
            content: plan.note_content(),
            created_at: now,
        };
        let mut out = MaterializedPlan {
            note_id: note.id,
            ..Default::default()
        };

        let levels: Vec<Level> = plan
            .levels
            .iter()
            .map(|l| Level {
                id: Uuid::new_v4(),
                ticker_id,
                note_id: Some(note.id),
                price: l.price,
                kind: l.kind.as_str().to_string(),
                label: l.label.clone(),
            })
            .collect();
        out.level_ids = levels.iter().map(|l| l.id).collect();

        let events: Vec<Event> = plan
            .events
            .iter()
            .map(|e| Event {
                id: Uuid::new_v4(),
                ticker_id,
                note_id: Some(note.id),
                title: e.title.clone(),
                time: e.time.clone(),
                impact: e.impact.clone(),
            })
            .collect();
        out.event_ids = events.iter().map(|e| e.id).collect();

        let checklist = (!plan.checklist.is_empty()).then(|| Checklist {
            id: Uuid::new_v4(),
            ticker_id,
            note_id: Some(note.id),
            title: checklist_title(plan),
            items: plan
                .checklist
                .iter()
                .enumerate()
                .map(|(i, text)| ChecklistItem {
                    id: Uuid::new_v4(),
                    text: text.clone(),
                    checked: false,
                    position: i as i32,
                })
                .collect(),
        });
        out.checklist_id = checklist.as_ref().map(|c| c.id);

        // Single lock acquisition keeps the whole plan visible atomically.
        let mut t = self.tables.lock().await;
        t.notes.push(note);
        t.levels.extend(levels);
        t.events.extend(events);
        if let Some(c) = checklist {
            t.checklists.push(c);
        }
        Ok(out)
    }
}
