pub mod memory;
pub mod postgres;

use crate::domain::game_plan::GamePlan;
use crate::domain::journal::{
    ChatMessage, Checklist, Level, MaterializedPlan, NewChatMessage, Note, PlaybookRecord, Ticker,
};
use crate::domain::playbook::PlaybookData;
use anyhow::Context;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgJournalStore;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Relational journal persistence. Ticker-scoped reads assume the caller already resolved
/// the ticker through `get_ticker` for the owning user.
#[async_trait::async_trait]
pub trait JournalStore: Send + Sync {
    async fn create_ticker(
        &self,
        user_id: Uuid,
        symbol: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Ticker>;

    async fn get_ticker(&self, user_id: Uuid, ticker_id: Uuid) -> anyhow::Result<Option<Ticker>>;

    async fn list_tickers(&self, user_id: Uuid) -> anyhow::Result<Vec<Ticker>>;

    async fn latest_note(&self, ticker_id: Uuid) -> anyhow::Result<Option<Note>>;

    /// Highest price first.
    async fn list_levels(&self, ticker_id: Uuid) -> anyhow::Result<Vec<Level>>;

    async fn latest_checklist(&self, ticker_id: Uuid) -> anyhow::Result<Option<Checklist>>;

    async fn active_playbook(&self, ticker_id: Uuid) -> anyhow::Result<Option<PlaybookRecord>>;

    /// Stores a new active playbook and deactivates any earlier one for the ticker.
    async fn create_playbook(
        &self,
        user_id: Uuid,
        ticker_id: Uuid,
        data: &PlaybookData,
        source_files: &[String],
    ) -> anyhow::Result<PlaybookRecord>;

    async fn create_chat_message(&self, msg: NewChatMessage) -> anyhow::Result<ChatMessage>;

    /// The most recent `limit` messages, oldest first.
    async fn list_chat_messages(
        &self,
        ticker_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessage>>;

    /// Writes note, levels, events and checklist for one plan as a unit.
    async fn materialize_game_plan(
        &self,
        user_id: Uuid,
        ticker_id: Uuid,
        plan: &GamePlan,
    ) -> anyhow::Result<MaterializedPlan>;
}

pub fn checklist_title(plan: &GamePlan) -> String {
    format!("{} checklist", plan.title)
}
