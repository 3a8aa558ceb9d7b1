use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical playbook shape. The five collection fields are always present, even when the model
/// left them out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thesis: Option<String>,
    #[serde(default)]
    pub structural_zones: Map<String, Value>,
    #[serde(default)]
    pub if_then_scenarios: Vec<Value>,
    #[serde(default)]
    pub key_events: Vec<Value>,
    #[serde(default)]
    pub risk_factors: Vec<Value>,
    #[serde(default)]
    pub execution_checklist: Vec<Value>,
    /// Anything else the model produced, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlaybookData {
    /// Builds the canonical shape from a parsed model document. Returns `None` only when the
    /// root is not an object; wrongly-typed collections fall back to empty.
    pub fn from_model_value(value: Value) -> Option<Self> {
        let Value::Object(mut obj) = value else {
            return None;
        };

        let macro_theme = take_string(&mut obj, "macro_theme");
        let bias = take_string(&mut obj, "bias");
        let thesis = take_string(&mut obj, "thesis");

        let structural_zones = match obj.remove("structural_zones") {
            Some(Value::Object(zones)) => zones,
            Some(other) => {
                tracing::warn!(kind = json_kind(&other), "structural_zones is not an object; defaulting");
                Map::new()
            }
            None => Map::new(),
        };

        Some(Self {
            macro_theme,
            bias,
            thesis,
            structural_zones,
            if_then_scenarios: take_array(&mut obj, "if_then_scenarios"),
            key_events: take_array(&mut obj, "key_events"),
            risk_factors: take_array(&mut obj, "risk_factors"),
            execution_checklist: take_array(&mut obj, "execution_checklist"),
            extra: obj,
        })
    }

    /// Short conversational recap posted to the chat timeline.
    pub fn summary_message(&self) -> String {
        let mut lines = vec!["Playbook created.".to_string()];
        if let Some(theme) = &self.macro_theme {
            lines.push(format!("**Macro theme:** {theme}"));
        }
        if let Some(bias) = &self.bias {
            lines.push(format!("**Bias:** {bias}"));
        }
        if let Some(thesis) = &self.thesis {
            lines.push(format!("**Thesis:** {thesis}"));
        }
        lines.push(format!(
            "{} zone bucket(s), {} scenario(s), {} key event(s), {} risk factor(s).",
            self.structural_zones.len(),
            self.if_then_scenarios.len(),
            self.key_events.len(),
            self.risk_factors.len()
        ));
        lines.join("\n")
    }
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> Option<String> {
    match obj.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::String(_)) | Some(Value::Null) | None => None,
        Some(other) => {
            tracing::warn!(key, kind = json_kind(&other), "playbook field is not a string; dropping");
            None
        }
    }
}

fn take_array(obj: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match obj.remove(key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            tracing::warn!(key, kind = json_kind(&other), "playbook field is not an array; defaulting");
            Vec::new()
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_collections_are_defaulted() {
        let data = PlaybookData::from_model_value(json!({
            "macro_theme": "Disinflation",
            "bias": "bullish",
            "thesis": "Buy dips into 4950"
        }))
        .unwrap();

        assert!(data.structural_zones.is_empty());
        assert!(data.if_then_scenarios.is_empty());
        assert!(data.key_events.is_empty());
        assert!(data.risk_factors.is_empty());
        assert!(data.execution_checklist.is_empty());

        let v = serde_json::to_value(&data).unwrap();
        assert_eq!(v["structural_zones"], json!({}));
        assert_eq!(v["if_then_scenarios"], json!([]));
        assert_eq!(v["key_events"], json!([]));
        assert_eq!(v["risk_factors"], json!([]));
        assert_eq!(v["execution_checklist"], json!([]));
    }

    #[test]
    fn wrong_types_fall_back_and_extras_survive() {
        let data = PlaybookData::from_model_value(json!({
            "structural_zones": ["not", "an", "object"],
            "risk_factors": "FOMC",
            "key_events": null,
            "ticker": "ES"
        }))
        .unwrap();

        assert!(data.structural_zones.is_empty());
        assert!(data.risk_factors.is_empty());
        assert!(data.key_events.is_empty());
        assert_eq!(data.extra.get("ticker"), Some(&json!("ES")));
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(PlaybookData::from_model_value(json!([1, 2, 3])).is_none());
    }

    #[test]
    fn summary_message_mentions_theme_bias_and_thesis() {
        let data = PlaybookData {
            macro_theme: Some("AI capex".to_string()),
            bias: Some("bearish".to_string()),
            thesis: Some("Sell rips".to_string()),
            ..Default::default()
        };
        let msg = data.summary_message();
        assert!(msg.contains("**Macro theme:** AI capex"));
        assert!(msg.contains("**Bias:** bearish"));
        assert!(msg.contains("**Thesis:** Sell rips"));
    }
}
