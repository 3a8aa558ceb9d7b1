//! Coercion of untrusted model JSON into the briefing and game-plan shapes.
//!
//! Every function here is total: malformed entries are dropped and missing fields defaulted, so
//! a bad payload degrades to "absent" instead of an error.

use crate::domain::briefing::{BriefingLevel, BriefingLevels, IfThen, Sentiment, Source, StructuredBriefing};
use crate::domain::game_plan::{
    Bias, GamePlan, GamePlanEvent, GamePlanLevel, LevelKind, DEFAULT_EVENT_IMPACT,
    DEFAULT_EVENT_TIME, DEFAULT_TITLE, SUMMARY_MAX_CHARS, TITLE_MAX_CHARS,
};
use serde_json::{Map, Value};

/// A payload must carry at least one of these to be promoted to a briefing.
pub const BRIEFING_KEYS: [&str; 4] = ["sentiment", "levels", "ifThen", "bluf"];

pub const GAME_PLAN_KEY: &str = "gamePlan";

pub fn briefing_from_value(value: &Value) -> Option<StructuredBriefing> {
    let obj = value.as_object()?;
    if !BRIEFING_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }

    let bluf = obj.get("bluf").and_then(Value::as_str).map(str::to_string);

    let sentiment = obj.get("sentiment").and_then(Value::as_object).map(|s| Sentiment {
        bias: s
            .get("bias")
            .and_then(Value::as_str)
            .filter(|b| !b.is_empty())
            .map(str::to_uppercase)
            .unwrap_or_else(|| "NEUTRAL".to_string()),
        summary: non_empty_str(s.get("summary")),
    });

    let levels = obj.get("levels").and_then(Value::as_object).map(|l| BriefingLevels {
        overhead: briefing_levels(l.get("overhead")),
        pivots: briefing_levels(l.get("pivots")),
        basins: briefing_levels(l.get("basins")),
    });

    let if_then = array_items(obj.get("ifThen"))
        .filter_map(|entry| {
            Some(IfThen {
                condition: non_empty_str(entry.get("condition"))?,
                outcome: non_empty_str(entry.get("outcome"))?,
            })
        })
        .collect();

    let sources = array_items(obj.get("sources"))
        .filter_map(|entry| {
            Some(Source {
                filename: non_empty_str(entry.get("filename"))?,
                page: entry
                    .get("page")
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok()),
                excerpt: non_empty_str(entry.get("excerpt")),
            })
        })
        .collect();

    let game_plan = obj.get(GAME_PLAN_KEY).filter(|v| !v.is_null()).cloned();

    Some(StructuredBriefing {
        bluf,
        sentiment,
        levels,
        if_then,
        sources,
        game_plan,
    })
}

fn briefing_levels(v: Option<&Value>) -> Vec<BriefingLevel> {
    array_items(v)
        .filter_map(|entry| {
            Some(BriefingLevel {
                price: truthy_number(entry.get("price"))?,
                label: non_empty_str(entry.get("label")),
                note: non_empty_str(entry.get("note")),
            })
        })
        .collect()
}

/// Accepts either `{"gamePlan": {...}}` or a bare plan object.
pub fn game_plan_from_value(value: &Value) -> Option<GamePlan> {
    let obj = value.as_object()?;
    let plan = match obj.get(GAME_PLAN_KEY).and_then(Value::as_object) {
        Some(inner) => inner,
        None => obj,
    };

    let has_levels = plan.get("levels").is_some_and(Value::is_array);
    if !plan.contains_key("title") && !has_levels {
        return None;
    }

    Some(coerce_game_plan(plan))
}

fn coerce_game_plan(plan: &Map<String, Value>) -> GamePlan {
    let title = plan
        .get("title")
        .and_then(Value::as_str)
        .map(|t| truncate_chars(t, TITLE_MAX_CHARS))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let summary = plan
        .get("summary")
        .and_then(Value::as_str)
        .map(|s| truncate_chars(s, SUMMARY_MAX_CHARS));

    let bias = plan
        .get("bias")
        .and_then(Value::as_str)
        .map(Bias::from_exact)
        .unwrap_or_default();

    let levels = array_items(plan.get("levels"))
        .filter_map(|entry| {
            let price = entry.get("price").and_then(Value::as_f64)?;
            if price <= 0.0 || !price.is_finite() {
                return None;
            }
            let kind = entry.get("type").and_then(Value::as_str).and_then(LevelKind::parse)?;
            Some(GamePlanLevel {
                price,
                kind,
                label: non_empty_str(entry.get("label"))
                    .or_else(|| non_empty_str(entry.get("description"))),
            })
        })
        .collect();

    let checklist = array_items(plan.get("checklist"))
        .filter_map(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_string())
        .collect();

    let events = array_items(plan.get("events"))
        .filter_map(|entry| {
            Some(GamePlanEvent {
                title: non_empty_str(entry.get("title"))?,
                time: non_empty_str(entry.get("time"))
                    .unwrap_or_else(|| DEFAULT_EVENT_TIME.to_string()),
                impact: non_empty_str(entry.get("impact"))
                    .unwrap_or_else(|| DEFAULT_EVENT_IMPACT.to_string()),
            })
        })
        .collect();

    let if_then_scenarios = plan
        .get("ifThenScenarios")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    GamePlan {
        title,
        summary,
        bias,
        levels,
        checklist,
        events,
        if_then_scenarios,
    }
}

fn array_items(v: Option<&Value>) -> impl Iterator<Item = &Value> {
    v.and_then(Value::as_array).into_iter().flatten()
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

// Numeric and non-zero; strings and booleans are not prices.
fn truthy_number(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64).filter(|n| *n != 0.0 && n.is_finite())
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
