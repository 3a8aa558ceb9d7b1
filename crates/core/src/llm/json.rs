use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("static regex"))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_:.\-]*)(.*?)```").expect("static regex"))
}

/// Drops a comma that directly precedes `}` or `]`.
pub fn repair_trailing_commas(text: &str) -> String {
    trailing_comma_re().replace_all(text, "$1").into_owned()
}

/// Strict parse first; the comma repair is only tried when that fails.
pub fn parse_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    serde_json::from_str::<Value>(&repair_trailing_commas(trimmed)).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    pub tag: &'a str,
    pub body: &'a str,
}

pub fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    fence_re()
        .captures_iter(text)
        .filter_map(|c| {
            Some(FencedBlock {
                tag: c.get(1)?.as_str(),
                body: c.get(2)?.as_str().trim(),
            })
        })
        .collect()
}

/// Removes every fenced block and trims what is left.
pub fn strip_fenced_blocks(text: &str) -> String {
    fence_re().replace_all(text, "").trim().to_string()
}

/// Returns the balanced `{...}` slice starting at byte offset `start`, honouring JSON strings.
pub fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let rest = text.get(start..)?;
    if !rest.starts_with('{') {
        return None;
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in rest.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// First brace-delimited JSON object in `text` (outermost first) that parses leniently and
/// satisfies `predicate`.
pub fn find_json_object<F>(text: &str, predicate: F) -> Option<Value>
where
    F: Fn(&Value) -> bool,
{
    for (start, _) in text.match_indices('{') {
        let Some(candidate) = balanced_object_at(text, start) else {
            continue;
        };
        if let Some(v) = parse_lenient(candidate) {
            if v.is_object() && predicate(&v) {
                return Some(v);
            }
        }
    }
    None
}

/// Best-effort: whole text, then the first fenced block, then the first object found by
/// bracket matching.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(v) = parse_lenient(text) {
        return Some(v);
    }
    if let Some(v) = fenced_blocks(text)
        .iter()
        .find_map(|block| parse_lenient(block.body))
    {
        return Some(v);
    }
    find_json_object(text, |_| true)
}
