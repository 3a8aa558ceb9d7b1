use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use journal_core::llm::error::LlmDiagnosticsError;
use journal_core::pipeline::PipelineError;
use serde_json::json;

const RAW_EXCERPT_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} is not configured")]
    Unavailable(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("invalid upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Multipart(e) => e.status(),
            Self::Internal(e) => internal_status(e),
        }
    }
}

fn internal_status(err: &anyhow::Error) -> StatusCode {
    if let Some(pe) = err.downcast_ref::<PipelineError>() {
        return match pe {
            PipelineError::EmptyInput(_) | PipelineError::UnsupportedFile { .. } => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::TickerNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::NoUsableFiles(_)
            | PipelineError::InvalidJson
            | PipelineError::ModelUnavailable => StatusCode::BAD_GATEWAY,
        };
    }
    if err.downcast_ref::<LlmDiagnosticsError>().is_some() {
        return StatusCode::BAD_GATEWAY;
    }
    StatusCode::INTERNAL_SERVER_ERROR
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(e) = &self {
            if let Some(diag) = e.downcast_ref::<LlmDiagnosticsError>() {
                tracing::warn!(
                    provider = ?diag.provider,
                    stage = diag.stage,
                    detail = %diag.detail,
                    raw = diag.raw_excerpt(RAW_EXCERPT_CHARS).as_deref().unwrap_or(""),
                    "model call diagnostics"
                );
            }
        }
        let message = match &self {
            Self::Internal(e) => match e.downcast_ref::<PipelineError>() {
                Some(pe) => pe.to_string(),
                None if status == StatusCode::BAD_GATEWAY => {
                    tracing::warn!(error = %format!("{e:#}"), "upstream model failure");
                    "the AI provider failed to answer; please try again".to_string()
                }
                None => {
                    sentry_anyhow::capture_anyhow(e);
                    tracing::error!(error = %format!("{e:#}"), "request failed");
                    "internal error".to_string()
                }
            },
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journal_core::llm::Provider;

    fn status_of(err: impl Into<anyhow::Error>) -> StatusCode {
        ApiError::Internal(err.into()).into_response().status()
    }

    #[test]
    fn pipeline_errors_map_to_client_and_gateway_statuses() {
        assert_eq!(
            status_of(PipelineError::EmptyInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(PipelineError::TickerNotFound(uuid::Uuid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(PipelineError::FileTooLarge {
                filename: "a.png".into(),
                size: 2,
                limit: 1
            }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(status_of(PipelineError::InvalidJson), StatusCode::BAD_GATEWAY);
        assert_eq!(status_of(PipelineError::NoUsableFiles(2)), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn context_wrapping_keeps_the_mapping() {
        let err = anyhow::Error::new(PipelineError::InvalidJson).context("playbook run failed");
        assert_eq!(status_of(err), StatusCode::BAD_GATEWAY);

        let llm = LlmDiagnosticsError {
            provider: Provider::Gemini,
            stage: "http",
            detail: "status=503".into(),
            raw_output: None,
            raw_response_json: None,
        };
        let err = anyhow::Error::new(llm).context("playbook generation failed");
        assert_eq!(status_of(err), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn model_transport_failure_is_a_gateway_error() {
        let err = anyhow::anyhow!("operation timed out")
            .context("Gemini request failed")
            .context(PipelineError::ModelUnavailable);
        assert_eq!(status_of(err), StatusCode::BAD_GATEWAY);

        let transport = LlmDiagnosticsError {
            provider: Provider::Gemini,
            stage: "transport",
            detail: "connection refused".into(),
            raw_output: None,
            raw_response_json: None,
        };
        assert_eq!(status_of(transport), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn degraded_and_plain_errors() {
        assert_eq!(
            ApiError::Unavailable("database").into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(anyhow::anyhow!("db down")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
