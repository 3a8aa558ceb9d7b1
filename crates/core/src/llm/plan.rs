//! Locates an embedded game plan in a document-triggered reply.

use crate::domain::briefing::StructuredBriefing;
use crate::domain::contract::{game_plan_from_value, GAME_PLAN_KEY};
use crate::domain::game_plan::GamePlan;
use crate::llm::json;

/// Looks in the parsed briefing first, then in any fenced block, then for a bare object carrying
/// a `gamePlan` key anywhere in the raw text. Scans the raw, unstripped reply.
pub fn extract_game_plan(raw: &str, briefing: Option<&StructuredBriefing>) -> Option<GamePlan> {
    if let Some(value) = briefing.and_then(|b| b.game_plan.as_ref()) {
        match game_plan_from_value(value) {
            Some(plan) => return Some(plan),
            None => tracing::debug!("briefing gamePlan lacks title and levels; rescanning reply"),
        }
    }

    let from_fence = json::fenced_blocks(raw)
        .iter()
        .filter_map(|block| json::parse_lenient(block.body))
        .find_map(|value| game_plan_from_value(&value));
    if from_fence.is_some() {
        return from_fence;
    }

    json::find_json_object(raw, |v| v.get(GAME_PLAN_KEY).is_some())
        .and_then(|value| game_plan_from_value(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::game_plan::{Bias, LevelKind};
    use crate::llm::response::parse_response;

    #[test]
    fn uses_game_plan_from_parsed_briefing() {
        let raw = "Read the deck.\n```briefing\n{\"bluf\":\"b\",\"gamePlan\":{\"title\":\"T\",\"bias\":\"bearish\",\"levels\":[{\"price\":100,\"type\":\"support\"},{\"price\":-5,\"type\":\"support\"},{\"price\":100,\"type\":\"bogus\"}]}}\n```";
        let env = parse_response(raw);
        let plan = extract_game_plan(raw, env.briefing.as_ref()).unwrap();
        assert_eq!(plan.title, "T");
        assert_eq!(plan.bias, Bias::Bearish);
        assert_eq!(plan.levels.len(), 1);
        assert_eq!(plan.levels[0].kind, LevelKind::Support);
    }

    #[test]
    fn falls_back_to_any_fenced_block() {
        let raw = "Summary\n```json\n{\"gamePlan\":{\"title\":\"From fence\",\"levels\":[],}}\n```";
        let env = parse_response(raw);
        assert!(env.briefing.is_none());
        let plan = extract_game_plan(raw, env.briefing.as_ref()).unwrap();
        assert_eq!(plan.title, "From fence");
    }

    #[test]
    fn finds_bare_json_in_prose() {
        let raw = r#"I extracted this: {"gamePlan": {"title": "Bare", "checklist": ["wait for open"]}} hope it helps"#;
        let plan = extract_game_plan(raw, None).unwrap();
        assert_eq!(plan.title, "Bare");
        assert_eq!(plan.checklist, vec!["wait for open".to_string()]);
    }

    #[test]
    fn briefing_without_plan_does_not_become_one() {
        let raw = "Text\n```briefing\n{\"bluf\":\"b\",\"levels\":{\"overhead\":[{\"price\":10}]}}\n```";
        let env = parse_response(raw);
        assert!(env.briefing.is_some());
        assert!(extract_game_plan(raw, env.briefing.as_ref()).is_none());
    }

    #[test]
    fn object_without_title_or_levels_is_absent() {
        let raw = "```json\n{\"summary\":\"x\"}\n```";
        assert!(extract_game_plan(raw, None).is_none());
        assert!(extract_game_plan("no json here", None).is_none());
    }
}
