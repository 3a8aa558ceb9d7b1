//! Splits a chat reply into its narrative and the single trailing briefing block.

use crate::domain::briefing::{BlockStatus, ResponseEnvelope};
use crate::domain::contract::briefing_from_value;
use crate::llm::json;

/// Fence tags that mark the briefing block. Matched case-insensitively.
pub const BRIEFING_TAGS: [&str; 2] = ["briefing", "json:briefing"];

pub fn is_briefing_tag(tag: &str) -> bool {
    BRIEFING_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// Never fails: anything wrong with the data block leaves `briefing` empty while the
/// narrative is still returned.
pub fn parse_response(raw: &str) -> ResponseEnvelope {
    let blocks = json::fenced_blocks(raw);
    if blocks.is_empty() {
        return ResponseEnvelope {
            human_text: raw.to_string(),
            briefing: None,
            block: BlockStatus::None,
        };
    }

    let human_text = json::strip_fenced_blocks(raw);

    let Some(tagged) = blocks.iter().find(|b| is_briefing_tag(b.tag)) else {
        tracing::debug!(blocks = blocks.len(), "reply has fenced blocks but no briefing tag");
        return ResponseEnvelope {
            human_text,
            briefing: None,
            block: BlockStatus::Untagged,
        };
    };

    let Some(value) = json::parse_lenient(tagged.body) else {
        tracing::warn!(body_len = tagged.body.len(), "briefing block is not valid JSON");
        return ResponseEnvelope {
            human_text,
            briefing: None,
            block: BlockStatus::Malformed,
        };
    };

    match briefing_from_value(&value) {
        Some(briefing) => ResponseEnvelope {
            human_text,
            briefing: Some(briefing),
            block: BlockStatus::Parsed,
        },
        None => ResponseEnvelope {
            human_text,
            briefing: None,
            block: BlockStatus::Unrecognized,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_block_and_strips_fences() {
        let raw = "Buyers defended 5000 twice.\n\n```briefing\n{\"bluf\":\"Long above 5000\",\"sentiment\":{\"bias\":\"bullish\"}}\n```";
        let env = parse_response(raw);
        assert_eq!(env.block, BlockStatus::Parsed);
        assert_eq!(env.human_text, "Buyers defended 5000 twice.");
        assert!(!env.human_text.contains("```"));

        let briefing = env.briefing.unwrap();
        assert_eq!(briefing.bluf.as_deref(), Some("Long above 5000"));
        assert_eq!(briefing.sentiment.unwrap().bias, "BULLISH");
    }

    #[test]
    fn alternate_tag_is_equivalent() {
        let env = parse_response("ok\n```json:briefing\n{\"bluf\":\"x\"}\n```");
        assert_eq!(env.block, BlockStatus::Parsed);
        assert_eq!(env.briefing.unwrap().bluf.as_deref(), Some("x"));
    }

    #[test]
    fn unrecognized_payload_is_not_a_briefing() {
        let env = parse_response("text\n```briefing\n{\"foo\": 1}\n```");
        assert_eq!(env.block, BlockStatus::Unrecognized);
        assert!(env.briefing.is_none());
        assert_eq!(env.human_text, "text");
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let env = parse_response("text\n```briefing\n{\"bluf\":\"x\",}\n```");
        assert_eq!(env.block, BlockStatus::Parsed);
        assert_eq!(env.briefing.unwrap().bluf.as_deref(), Some("x"));
    }

    #[test]
    fn malformed_block_keeps_narrative() {
        let env = parse_response("Still readable.\n```briefing\n{not json at all\n```");
        assert_eq!(env.block, BlockStatus::Malformed);
        assert!(env.briefing.is_none());
        assert_eq!(env.human_text, "Still readable.");
    }

    #[test]
    fn untagged_fences_are_noise() {
        let raw = "Plan:\n```\nsell 5050\n```\nand\n```json\n{\"bluf\":\"x\"}\n```";
        let env = parse_response(raw);
        assert_eq!(env.block, BlockStatus::Untagged);
        assert!(env.briefing.is_none());
        assert_eq!(env.human_text, "Plan:\n\nand");
    }

    #[test]
    fn only_first_tagged_block_is_data() {
        let raw = "a\n```briefing\n{\"bluf\":\"first\"}\n```\nb\n```briefing\n{\"bluf\":\"second\"}\n```";
        let env = parse_response(raw);
        assert_eq!(env.briefing.unwrap().bluf.as_deref(), Some("first"));
        assert_eq!(env.human_text, "a\n\nb");
    }

    #[test]
    fn no_fences_is_a_no_op() {
        let raw = "  Just prose, with {braces} and spacing.  \n";
        let env = parse_response(raw);
        assert_eq!(env.block, BlockStatus::None);
        assert_eq!(env.human_text, raw);
        assert!(env.briefing.is_none());
    }

    #[test]
    fn parsing_clean_text_again_is_idempotent() {
        let first = parse_response("Narrative\n```briefing\n{\"bluf\":\"x\"}\n```");
        let second = parse_response(&first.human_text);
        assert_eq!(second.human_text, first.human_text);
        assert_eq!(second.block, BlockStatus::None);
    }
}
