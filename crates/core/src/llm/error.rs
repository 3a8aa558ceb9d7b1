use crate::domain::contract::truncate_chars;
use crate::llm::Provider;
use serde_json::Value;

/// A model call that failed in a way worth showing to operators: transport, HTTP status,
/// undecodable body or an empty candidate list.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{provider:?} call failed at {stage}: {detail}")]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// Leading part of whatever the provider sent back, raw text preferred.
    pub fn raw_excerpt(&self, max_chars: usize) -> Option<String> {
        match (&self.raw_output, &self.raw_response_json) {
            (Some(text), _) => Some(truncate_chars(text, max_chars)),
            (None, Some(json)) => Some(truncate_chars(&json.to_string(), max_chars)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diag(raw_output: Option<&str>, raw_response_json: Option<Value>) -> LlmDiagnosticsError {
        LlmDiagnosticsError {
            provider: Provider::Gemini,
            stage: "http",
            detail: "status=503".to_string(),
            raw_output: raw_output.map(str::to_string),
            raw_response_json,
        }
    }

    #[test]
    fn excerpt_prefers_raw_text_and_truncates() {
        let d = diag(Some("overloaded, try later"), Some(json!({"error": 1})));
        assert_eq!(d.raw_excerpt(10).as_deref(), Some("overloaded"));
        assert_eq!(d.to_string(), "Gemini call failed at http: status=503");
    }

    #[test]
    fn excerpt_falls_back_to_json_then_nothing() {
        let d = diag(None, Some(json!({"promptFeedback": {}})));
        assert_eq!(d.raw_excerpt(200).as_deref(), Some(r#"{"promptFeedback":{}}"#));
        assert!(diag(None, None).raw_excerpt(10).is_none());
    }
}
