use crate::pipeline::chat::JournalContext;

pub const DEFAULT_PLAYBOOK_INSTRUCTION: &str =
    "Analyze the attached documents and build a complete trading playbook.";

/// Recent timeline messages included in the chat prompt.
pub const HISTORY_MESSAGES: usize = 10;

pub fn playbook_system_instruction() -> String {
    [
        "You are a futures trading analyst turning research documents into a structured playbook.",
        "Return ONLY valid JSON. Do not wrap in markdown. No prose before or after the object.",
        "No trailing commas. No comments. Use double quotes for all JSON strings.",
        "Output schema:",
        "{",
        "  \"macro_theme\": \"one sentence\",",
        "  \"bias\": \"bullish | bearish | neutral\",",
        "  \"thesis\": \"2-4 sentences\",",
        "  \"structural_zones\": {",
        "    \"overhead_supply\": [{\"price\": 5120.25, \"label\": \"...\", \"note\": \"...\"}],",
        "    \"pivots\": [{\"price\": 5060.0, \"label\": \"...\", \"note\": \"...\"}],",
        "    \"demand_basins\": [{\"price\": 4995.5, \"label\": \"...\", \"note\": \"...\"}]",
        "  },",
        "  \"if_then_scenarios\": [{\"if\": \"condition\", \"then\": \"action\"}],",
        "  \"key_events\": [{\"title\": \"CPI\", \"time\": \"08:30 ET\", \"impact\": \"high | medium | low\"}],",
        "  \"risk_factors\": [\"...\"],",
        "  \"execution_checklist\": [\"...\"]",
        "}",
        "Zone classification:",
        "- overhead_supply: levels above current price where sellers previously took control",
        "- pivots: levels price has flipped across more than once; treat as decision points",
        "- demand_basins: levels below current price where buyers previously absorbed supply",
        "- Every zone entry needs a numeric price; omit levels you cannot price",
        "Jargon dictionary (normalize to these meanings):",
        "- ONH/ONL: overnight high/low; RTH: regular trading hours; IB: initial balance",
        "- VAH/VAL/POC: value area high/low and point of control",
        "- LIS: line in the sand, the level that invalidates the thesis",
        "- Failed breakdown: a move below support that is reclaimed; treat as bullish",
        "- Magnet: a level price is expected to revisit; classify as a pivot",
        "Multi-file synthesis:",
        "- Merge levels from all documents; when two sources disagree by a few points keep one level and mention both sources in its note",
        "- When documents disagree on bias, pick the better-supported view and list the other as a risk factor",
        "- Prefer the most recent document when dates are given",
        "- Every array key MUST be present; use [] when there is nothing to report",
    ]
    .join("\n")
}

pub fn chat_system_instruction(ctx: &JournalContext, with_documents: bool) -> String {
    let mut lines: Vec<String> = [
        "You are a trading journal assistant helping a discretionary futures trader prepare and review their plan.",
        "Answer in two parts, in this order:",
        "1. A concise narrative answer in plain markdown.",
        "2. Exactly one fenced block tagged `briefing` containing a single JSON object:",
        "```briefing",
        "{",
        "  \"bluf\": \"bottom line up front, one sentence\",",
        "  \"sentiment\": {\"bias\": \"BULLISH | BEARISH | NEUTRAL\", \"summary\": \"...\"},",
        "  \"levels\": {\"overhead\": [{\"price\": 0, \"label\": \"...\"}], \"pivots\": [], \"basins\": []},",
        "  \"ifThen\": [{\"condition\": \"...\", \"outcome\": \"...\"}],",
        "  \"sources\": [{\"filename\": \"...\", \"page\": 1, \"excerpt\": \"...\"}]",
        "}",
        "```",
        "Do not put any other fenced block after the briefing. Only cite sources you were given.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if with_documents {
        lines.extend(
            [
                "Documents are attached. Inside the briefing object also include a \"gamePlan\" key:",
                "{\"title\": \"...\", \"summary\": \"...\", \"bias\": \"bullish | bearish | neutral\",",
                " \"levels\": [{\"price\": 0, \"type\": \"support | resistance\", \"label\": \"...\"}],",
                " \"checklist\": [\"...\"], \"events\": [{\"title\": \"...\", \"time\": \"...\", \"impact\": \"high | medium | low\"}],",
                " \"ifThenScenarios\": [{\"if\": \"...\", \"then\": \"...\"}]}",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }

    lines.push(String::new());
    lines.push(context_block(ctx));
    lines.join("\n")
}

/// Stored journal state rendered as prompt context.
pub fn context_block(ctx: &JournalContext) -> String {
    let mut out = format!("Instrument: {}", ctx.ticker.symbol);
    if let Some(name) = &ctx.ticker.name {
        out.push_str(&format!(" ({name})"));
    }
    out.push('\n');

    match &ctx.latest_note {
        Some(note) => out.push_str(&format!("\nLatest note: {}\n{}\n", note.title, note.content)),
        None => out.push_str("\nNo notes yet.\n"),
    }

    if !ctx.levels.is_empty() {
        out.push_str("\nKey levels:\n");
        for level in &ctx.levels {
            out.push_str(&format!("- {} {}", level.price, level.kind));
            if let Some(label) = &level.label {
                out.push_str(&format!(" ({label})"));
            }
            out.push('\n');
        }
    }

    if let Some(checklist) = &ctx.checklist {
        out.push_str(&format!("\nChecklist: {}\n", checklist.title));
        for item in &checklist.items {
            let mark = if item.checked { "x" } else { " " };
            out.push_str(&format!("- [{mark}] {}\n", item.text));
        }
    }

    if let Some(playbook) = &ctx.playbook {
        match serde_json::to_string(&playbook.data) {
            Ok(json) => out.push_str(&format!("\nActive playbook JSON:\n{json}\n")),
            Err(err) => tracing::warn!(error = %err, "failed to render playbook for prompt"),
        }
    }

    if !ctx.history.is_empty() {
        out.push_str("\nRecent conversation:\n");
        for msg in &ctx.history {
            out.push_str(&format!("{}: {}\n", msg.role.as_str(), msg.content));
        }
    }

    out.trim_end().to_string()
}
