//! Text extraction helpers for completion replies and diagnostics

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_PYTHON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:python|py)[ \t]*\r?\n(.*?)```").expect("valid regex"));
static FENCED_ANY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("valid regex"));
static CODE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<code>(.*?)</code>").expect("valid regex"));

/// Pull generated code out of a completion reply
///
/// Prefers a python-tagged fence, then any fence, then a `<code>` block;
/// falls back to the whole reply. The result is trimmed.
#[must_use]
pub fn extract_code_block(reply: &str) -> String {
    [&*FENCED_PYTHON, &*FENCED_ANY, &*CODE_TAG]
        .iter()
        .find_map(|re| re.captures(reply))
        .and_then(|caps| caps.get(1))
        .map_or(reply, |m| m.as_str())
        .trim()
        .to_string()
}

/// Outermost `{...}` span of a reply parsed as JSON
#[must_use]
pub fn extract_json_object(reply: &str) -> Option<serde_json::Value> {
    outer_span(reply, '{', '}')
        .and_then(|span| serde_json::from_str::<serde_json::Value>(span).ok())
        .filter(serde_json::Value::is_object)
}

/// Outermost `[...]` span of a reply parsed as JSON
#[must_use]
pub fn extract_json_array(reply: &str) -> Option<Vec<serde_json::Value>> {
    outer_span(reply, '[', ']')
        .and_then(|span| serde_json::from_str::<serde_json::Value>(span).ok())
        .and_then(|value| match value {
            serde_json::Value::Array(items) => Some(items),
            _ => None,
        })
}

fn outer_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Last `limit` characters of `text` (character, not byte, bounded)
#[must_use]
pub fn bounded_tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    text.chars().skip(count - limit).collect()
}

/// First `limit` characters of `text`, with `...` appended when cut
#[must_use]
pub fn bounded_head(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
