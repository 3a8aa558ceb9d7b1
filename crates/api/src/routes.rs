use crate::error::ApiError;
use crate::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Multipart, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use journal_core::domain::journal::{ChatMessage, Ticker};
use journal_core::ingest::types::UploadedFile;
use journal_core::pipeline::chat::{ChatReply, ChatRequest};
use journal_core::pipeline::playbook::{PlaybookOutcome, PlaybookRequest};
use journal_core::pricing::ratio::LiveRatio;
use journal_core::storage::JournalStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const USER_HEADER: &str = "x-user-id";
const DEFAULT_MESSAGE_LIMIT: usize = 50;
const MAX_MESSAGE_LIMIT: usize = 200;

/// Caller identity, set by the auth layer in front of this service.
pub struct UserId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("{USER_HEADER} header is required")))?;
        Uuid::parse_str(raw.trim())
            .map(UserId)
            .map_err(|_| ApiError::BadRequest(format!("{USER_HEADER} must be a UUID")))
    }
}

fn store(state: &AppState) -> Result<&Arc<dyn JournalStore>, ApiError> {
    state.store.as_ref().ok_or(ApiError::Unavailable("database"))
}

#[derive(Debug, Deserialize)]
pub struct CreateTicker {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn create_ticker(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<CreateTicker>,
) -> Result<(StatusCode, Json<Ticker>), ApiError> {
    let symbol = body.symbol.trim();
    if symbol.is_empty() {
        return Err(ApiError::BadRequest("symbol must not be empty".into()));
    }
    let name = body.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let ticker = store(&state)?.create_ticker(user_id, symbol, name).await?;
    Ok((StatusCode::CREATED, Json(ticker)))
}

pub async fn list_tickers(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<Ticker>>, ApiError> {
    Ok(Json(store(&state)?.list_tickers(user_id).await?))
}

pub async fn get_ticker(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(ticker_id): Path<Uuid>,
) -> Result<Json<Ticker>, ApiError> {
    store(&state)?
        .get_ticker(user_id, ticker_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(ticker_id): Path<Uuid>,
    Query(q): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let store = store(&state)?;
    if store.get_ticker(user_id, ticker_id).await?.is_none() {
        return Err(ApiError::NotFound);
    }
    let limit = q
        .limit
        .unwrap_or(DEFAULT_MESSAGE_LIMIT)
        .clamp(1, MAX_MESSAGE_LIMIT);
    Ok(Json(store.list_chat_messages(ticker_id, limit).await?))
}

/// Text fields and file parts of an upload form.
#[derive(Debug, Default)]
struct UploadForm {
    text: Option<String>,
    files: Vec<UploadedFile>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("upload-{}", form.files.len() + 1));
                let declared_mime = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                form.files.push(UploadedFile {
                    filename,
                    declared_mime,
                    bytes: bytes.to_vec(),
                });
            }
            "message" | "text" => {
                form.text = Some(field.text().await?);
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown form field");
            }
        }
    }
    Ok(form)
}

pub async fn post_chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(ticker_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<ChatReply>, ApiError> {
    let pipeline = state.chat.clone().ok_or(ApiError::Unavailable("chat"))?;
    let form = read_form(multipart).await?;
    let reply = pipeline
        .run(ChatRequest {
            user_id,
            ticker_id,
            message: form.text.unwrap_or_default(),
            files: form.files,
        })
        .await?;
    Ok(Json(reply))
}

pub async fn post_playbook(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(ticker_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<PlaybookOutcome>), ApiError> {
    let pipeline = state
        .playbooks
        .clone()
        .ok_or(ApiError::Unavailable("playbook analysis"))?;
    let form = read_form(multipart).await?;
    let outcome = pipeline
        .run(PlaybookRequest {
            user_id,
            ticker_id,
            files: form.files,
            text: form.text,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_ratio(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Json<LiveRatio> {
    Json(state.ratios.get_live_ratio(&symbol).await)
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToEtf,
    ToFutures,
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub price: f64,
    #[serde(default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::ToEtf
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub direction: Direction,
    pub input: f64,
    pub converted: f64,
    #[serde(flatten)]
    pub ratio: LiveRatio,
}

pub async fn convert_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<ConvertQuery>,
) -> Result<Json<Conversion>, ApiError> {
    if !q.price.is_finite() || q.price <= 0.0 {
        return Err(ApiError::BadRequest("price must be a positive number".into()));
    }
    let ratio = state.ratios.get_live_ratio(&symbol).await;
    let converted = match q.direction {
        Direction::ToEtf => ratio.futures_to_etf(q.price),
        Direction::ToFutures => ratio.etf_to_futures(q.price),
    };
    Ok(Json(Conversion {
        direction: q.direction,
        input: q.price,
        converted,
        ratio,
    }))
}
