use crate::domain::game_plan::GamePlan;
use crate::domain::journal::{
    ChatMessage, ChatRole, Checklist, ChecklistItem, Event, Level, MaterializedPlan,
    NewChatMessage, Note, PlaybookRecord, Ticker,
};
use crate::domain::playbook::PlaybookData;
use crate::storage::{checklist_title, JournalStore};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgJournalStore {
    pool: sqlx::PgPool,
}

impl PgJournalStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct TickerRow {
    id: Uuid,
    user_id: Uuid,
    symbol: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TickerRow> for Ticker {
    fn from(r: TickerRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            symbol: r.symbol,
            name: r.name,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: Uuid,
    ticker_id: Uuid,
    title: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LevelRow {
    id: Uuid,
    ticker_id: Uuid,
    note_id: Option<Uuid>,
    price: f64,
    kind: String,
    label: Option<String>,
}

#[derive(sqlx::FromRow)]
struct PlaybookRow {
    id: Uuid,
    ticker_id: Uuid,
    data: Json<PlaybookData>,
    source_files: Vec<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<PlaybookRow> for PlaybookRecord {
    fn from(r: PlaybookRow) -> Self {
        Self {
            id: r.id,
            ticker_id: r.ticker_id,
            data: r.data.0,
            source_files: r.source_files,
            is_active: r.is_active,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    ticker_id: Uuid,
    role: String,
    content: String,
    briefing: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChatRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(r: ChatRow) -> anyhow::Result<Self> {
        Ok(Self {
            id: r.id,
            ticker_id: r.ticker_id,
            role: ChatRole::parse(&r.role)?,
            content: r.content,
            briefing: r.briefing,
            created_at: r.created_at,
        })
    }
}

#[async_trait::async_trait]
impl JournalStore for PgJournalStore {
    async fn create_ticker(
        &self,
        user_id: Uuid,
        symbol: &str,
        name: Option<&str>,
    ) -> anyhow::Result<Ticker> {
        let row: TickerRow = sqlx::query_as(
            "INSERT INTO tickers (id, user_id, symbol, name) VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, symbol, name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(symbol.trim())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("insert tickers failed")?;
        Ok(row.into())
    }

    async fn get_ticker(&self, user_id: Uuid, ticker_id: Uuid) -> anyhow::Result<Option<Ticker>> {
        let row: Option<TickerRow> = sqlx::query_as(
            "SELECT id, user_id, symbol, name, created_at FROM tickers WHERE id = $1 AND user_id = $2",
        )
        .bind(ticker_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("select tickers failed")?;
        Ok(row.map(Into::into))
    }

    async fn list_tickers(&self, user_id: Uuid) -> anyhow::Result<Vec<Ticker>> {
        let rows: Vec<TickerRow> = sqlx::query_as(
            "SELECT id, user_id, symbol, name, created_at FROM tickers \
             WHERE user_id = $1 ORDER BY symbol ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("list tickers failed")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_note(&self, ticker_id: Uuid) -> anyhow::Result<Option<Note>> {
        let row: Option<NoteRow> = sqlx::query_as(
            "SELECT id, ticker_id, title, content, created_at FROM notes \
             WHERE ticker_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(ticker_id)
        .fetch_optional(&self.pool)
        .await
        .context("select latest note failed")?;
        Ok(row.map(|r| Note {
            id: r.id,
            ticker_id: r.ticker_id,
            title: r.title,
            content: r.content,
            created_at: r.created_at,
        }))
    }

    async fn list_levels(&self, ticker_id: Uuid) -> anyhow::Result<Vec<Level>> {
        let rows: Vec<LevelRow> = sqlx::query_as(
            "SELECT id, ticker_id, note_id, price, kind, label FROM levels \
             WHERE ticker_id = $1 ORDER BY price DESC",
        )
        .bind(ticker_id)
        .fetch_all(&self.pool)
        .await
        .context("list levels failed")?;
        Ok(rows
            .into_iter()
            .map(|r| Level {
                id: r.id,
                ticker_id: r.ticker_id,
                note_id: r.note_id,
                price: r.price,
                kind: r.kind,
                label: r.label,
            })
            .collect())
    }

    async fn latest_checklist(&self, ticker_id: Uuid) -> anyhow::Result<Option<Checklist>> {
        let head: Option<(Uuid, Option<Uuid>, String)> = sqlx::query_as(
            "SELECT id, note_id, title FROM checklists \
             WHERE ticker_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(ticker_id)
        .fetch_optional(&self.pool)
        .await
        .context("select latest checklist failed")?;
        let Some((id, note_id, title)) = head else {
            return Ok(None);
        };

        let items: Vec<(Uuid, String, bool, i32)> = sqlx::query_as(
            "SELECT id, text, checked, position FROM checklist_items \
             WHERE checklist_id = $1 ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .context("select checklist_items failed")?;

        Ok(Some(Checklist {
            id,
            ticker_id,
            note_id,
            title,
            items: items
                .into_iter()
                .map(|(id, text, checked, position)| ChecklistItem {
                    id,
                    text,
                    checked,
                    position,
                })
                .collect(),
        }))
    }

    async fn active_playbook(&self, ticker_id: Uuid) -> anyhow::Result<Option<PlaybookRecord>> {
        let row: Option<PlaybookRow> = sqlx::query_as(
            "SELECT id, ticker_id, data, source_files, is_active, created_at FROM playbooks \
             WHERE ticker_id = $1 AND is_active ORDER BY created_at DESC LIMIT 1",
        )
        .bind(ticker_id)
        .fetch_optional(&self.pool)
        .await
        .context("select active playbook failed")?;
        Ok(row.map(Into::into))
    }

    async fn create_playbook(
        &self,
        user_id: Uuid,
        ticker_id: Uuid,
        data: &PlaybookData,
        source_files: &[String],
    ) -> anyhow::Result<PlaybookRecord> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        sqlx::query("UPDATE playbooks SET is_active = false WHERE ticker_id = $1 AND is_active")
            .bind(ticker_id)
            .execute(&mut *tx)
            .await
            .context("deactivate playbooks failed")?;

        let row: PlaybookRow = sqlx::query_as(
            "INSERT INTO playbooks (id, user_id, ticker_id, data, source_files, is_active) \
             VALUES ($1, $2, $3, $4, $5, true) \
             RETURNING id, ticker_id, data, source_files, is_active, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(ticker_id)
        .bind(Json(data))
        .bind(source_files)
        .fetch_one(&mut *tx)
        .await
        .context("insert playbooks failed")?;

        tx.commit().await.context("commit transaction failed")?;
        Ok(row.into())
    }

    async fn create_chat_message(&self, msg: NewChatMessage) -> anyhow::Result<ChatMessage> {
        let row: ChatRow = sqlx::query_as(
            "INSERT INTO chat_messages (id, user_id, ticker_id, role, content, briefing) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, ticker_id, role, content, briefing, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(msg.user_id)
        .bind(msg.ticker_id)
        .bind(msg.role.as_str())
        .bind(&msg.content)
        .bind(&msg.briefing)
        .fetch_one(&self.pool)
        .await
        .context("insert chat_messages failed")?;
        row.try_into()
    }

    async fn list_chat_messages(
        &self,
        ticker_id: Uuid,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<ChatRow> = sqlx::query_as(
            "SELECT id, ticker_id, role, content, briefing, created_at FROM ( \
               SELECT * FROM chat_messages WHERE ticker_id = $1 \
               ORDER BY created_at DESC LIMIT $2 \
             ) recent ORDER BY created_at ASC",
        )
        .bind(ticker_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("list chat_messages failed")?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn materialize_game_plan(
        &self,
        user_id: Uuid,
        ticker_id: Uuid,
        plan: &GamePlan,
    ) -> anyhow::Result<MaterializedPlan> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        let note_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO notes (id, user_id, ticker_id, title, content) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(note_id)
        .bind(user_id)
        .bind(ticker_id)
        .bind(&plan.title)
        .bind(plan.note_content())
        .execute(&mut *tx)
        .await
        .context("insert notes failed")?;

        let mut out = MaterializedPlan {
            note_id,
            ..Default::default()
        };

        for level in &plan.levels {
            let level = Level {
                id: Uuid::new_v4(),
                ticker_id,
                note_id: Some(note_id),
                price: level.price,
                kind: level.kind.as_str().to_string(),
                label: level.label.clone(),
            };
            insert_level(&mut tx, user_id, &level).await?;
            out.level_ids.push(level.id);
        }

        for event in &plan.events {
            let event = Event {
                id: Uuid::new_v4(),
                ticker_id,
                note_id: Some(note_id),
                title: event.title.clone(),
                time: event.time.clone(),
                impact: event.impact.clone(),
            };
            insert_event(&mut tx, user_id, &event).await?;
            out.event_ids.push(event.id);
        }

        if !plan.checklist.is_empty() {
            let checklist_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO checklists (id, user_id, ticker_id, note_id, title) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(checklist_id)
            .bind(user_id)
            .bind(ticker_id)
            .bind(note_id)
            .bind(checklist_title(plan))
            .execute(&mut *tx)
            .await
            .context("insert checklists failed")?;

            for (position, text) in plan.checklist.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO checklist_items (id, checklist_id, text, checked, position) \
                     VALUES ($1, $2, $3, false, $4)",
                )
                .bind(Uuid::new_v4())
                .bind(checklist_id)
                .bind(text)
                .bind(i32::try_from(position).context("checklist too long")?)
                .execute(&mut *tx)
                .await
                .context("insert checklist_items failed")?;
            }
            out.checklist_id = Some(checklist_id);
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(out)
    }
}

async fn insert_level(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    level: &Level,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO levels (id, user_id, ticker_id, note_id, price, kind, label) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(level.id)
    .bind(user_id)
    .bind(level.ticker_id)
    .bind(level.note_id)
    .bind(level.price)
    .bind(&level.kind)
    .bind(&level.label)
    .execute(&mut **tx)
    .await
    .context("insert levels failed")?;
    Ok(())
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    event: &Event,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO events (id, user_id, ticker_id, note_id, title, time, impact) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(event.id)
    .bind(user_id)
    .bind(event.ticker_id)
    .bind(event.note_id)
    .bind(&event.title)
    .bind(&event.time)
    .bind(&event.impact)
    .execute(&mut **tx)
    .await
    .context("insert events failed")?;
    Ok(())
}
