use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "AI-Generated Game Plan";
pub const TITLE_MAX_CHARS: usize = 200;
pub const SUMMARY_MAX_CHARS: usize = 500;
pub const DEFAULT_EVENT_TIME: &str = "TBD";
pub const DEFAULT_EVENT_IMPACT: &str = "medium";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

impl Bias {
    /// Exact match only; anything else is neutral.
    pub fn from_exact(s: &str) -> Self {
        match s {
            "bullish" => Self::Bullish,
            "bearish" => Self::Bearish,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Support,
    Resistance,
}

impl LevelKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "support" => Some(Self::Support),
            "resistance" => Some(Self::Resistance),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Resistance => "resistance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePlan {
    pub title: String,
    pub summary: Option<String>,
    pub bias: Bias,
    pub levels: Vec<GamePlanLevel>,
    pub checklist: Vec<String>,
    pub events: Vec<GamePlanEvent>,
    pub if_then_scenarios: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlanLevel {
    pub price: f64,
    #[serde(rename = "type")]
    pub kind: LevelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GamePlanEvent {
    pub title: String,
    pub time: String,
    pub impact: String,
}

impl GamePlan {
    /// Markdown body for the note created from this plan.
    pub fn note_content(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = &self.summary {
            out.push_str(summary);
            out.push_str("\n\n");
        }
        out.push_str(&format!("**Bias:** {}\n", self.bias.as_str()));

        if !self.levels.is_empty() {
            out.push_str("\n**Levels**\n");
            for level in &self.levels {
                match &level.label {
                    Some(label) => out.push_str(&format!(
                        "- {} ({}): {}\n",
                        level.price,
                        level.kind.as_str(),
                        label
                    )),
                    None => out.push_str(&format!("- {} ({})\n", level.price, level.kind.as_str())),
                }
            }
        }

        let scenarios: Vec<String> = self
            .if_then_scenarios
            .iter()
            .filter_map(scenario_line)
            .collect();
        if !scenarios.is_empty() {
            out.push_str("\n**If / Then**\n");
            for line in scenarios {
                out.push_str(&format!("- {line}\n"));
            }
        }

        out.trim_end().to_string()
    }
}

fn scenario_line(v: &serde_json::Value) -> Option<String> {
    if let Some(s) = v.as_str() {
        return Some(s.to_string());
    }
    let condition = v
        .get("if")
        .or_else(|| v.get("condition"))
        .and_then(|c| c.as_str())?;
    let outcome = v
        .get("then")
        .or_else(|| v.get("outcome"))
        .and_then(|c| c.as_str())?;
    Some(format!("IF {condition} THEN {outcome}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bias_requires_exact_lowercase() {
        assert_eq!(Bias::from_exact("bullish"), Bias::Bullish);
        assert_eq!(Bias::from_exact("bearish"), Bias::Bearish);
        assert_eq!(Bias::from_exact("Bullish"), Bias::Neutral);
        assert_eq!(Bias::from_exact("sideways"), Bias::Neutral);
    }

    #[test]
    fn note_content_lists_levels_and_scenarios() {
        let plan = GamePlan {
            title: "ES open".to_string(),
            summary: Some("Fade the gap".to_string()),
            bias: Bias::Bearish,
            levels: vec![GamePlanLevel {
                price: 5000.0,
                kind: LevelKind::Resistance,
                label: Some("ONH".to_string()),
            }],
            checklist: vec![],
            events: vec![],
            if_then_scenarios: vec![
                json!({"if": "reject 5000", "then": "target 4950"}),
                json!("plain line"),
                json!(42),
            ],
        };

        let content = plan.note_content();
        assert!(content.starts_with("Fade the gap"));
        assert!(content.contains("**Bias:** bearish"));
        assert!(content.contains("- 5000 (resistance): ONH"));
        assert!(content.contains("- IF reject 5000 THEN target 4950"));
        assert!(content.contains("- plain line"));
    }
}
