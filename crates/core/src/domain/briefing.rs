use serde::{Deserialize, Serialize};

/// Result of splitting a chat reply into narrative and its trailing data block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub human_text: String,
    pub briefing: Option<StructuredBriefing>,
    #[serde(skip)]
    pub block: BlockStatus,
}

/// What the parser found where the briefing block should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockStatus {
    /// No fenced block in the reply.
    #[default]
    None,
    /// Fenced blocks exist, none tagged as a briefing.
    Untagged,
    /// Tagged block whose body is not JSON even after repair.
    Malformed,
    /// Valid JSON carrying none of the briefing keys.
    Unrecognized,
    Parsed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredBriefing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<BriefingLevels>,
    #[serde(default)]
    pub if_then: Vec<IfThen>,
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Raw game plan payload; validated by the game-plan extractor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_plan: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// Always uppercase (`BULLISH`, `BEARISH`, `NEUTRAL`, ...).
    pub bias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BriefingLevels {
    #[serde(default)]
    pub overhead: Vec<BriefingLevel>,
    #[serde(default)]
    pub pivots: Vec<BriefingLevel>,
    #[serde(default)]
    pub basins: Vec<BriefingLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefingLevel {
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfThen {
    pub condition: String,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}
