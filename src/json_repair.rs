//! Defensive extraction of a JSON object out of an LLM's free-form reply.
//!
//! LLMs routinely wrap their JSON in prose, markdown fences, or truncate mid
//! object when they hit a token limit: slice out the first `{...}` span,
//! attempt a strict decode, and on failure balance unmatched braces and
//! quotes before retrying once. No regex, no external JSON-repair crate,
//! just string scanning.

use serde_json::Value;

/// Try to parse `text` as a JSON object, repairing common truncation defects.
///
/// Returns `None` if no JSON object could be recovered at all.
pub fn try_parse_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let candidate = extract_brace_span(trimmed).unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let fixed = fix_incomplete_json(candidate);
    serde_json::from_str::<Value>(&fixed).ok()
}

/// Slice `text` from its first `{` to its last `}`, inclusive, if both exist.
fn extract_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end >= start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Close unterminated braces and a trailing unmatched quote.
///
/// This is a single-pass repair, not a general JSON parser: it counts
/// `{`/`}` occurrences and appends the deficit, then closes a dangling quote
/// if the text contains an odd number of `"` characters.
fn fix_incomplete_json(text: &str) -> String {
    let mut repaired = text.to_string();

    let opens = text.matches('{').count();
    let closes = text.matches('}').count();
    if opens > closes {
        repaired.push_str(&"}".repeat(opens - closes));
    }

    if repaired.matches('"').count() % 2 == 1 {
        repaired.push('"');
    }

    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let value = try_parse_json_object(r#"{"a": 1, "b": "two"}"#).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"], "two");
    }

    #[test]
    fn strips_surrounding_prose() {
        let value = try_parse_json_object("here you go:\n{\"ok\": true}\nhope that helps").unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn repairs_truncated_closing_brace() {
        let value = try_parse_json_object(r#"{"a": 1, "b": {"c": 2}"#).unwrap();
        assert_eq!(value["b"]["c"], 2);
    }

    #[test]
    fn repairs_unterminated_string() {
        let value = try_parse_json_object(r#"{"reason": "still thinking"#).unwrap();
        assert_eq!(value["reason"], "still thinking");
    }

    #[test]
    fn gives_up_on_garbage() {
        assert!(try_parse_json_object("not json at all").is_none());
    }
}
