//! Subset string cleanup
//!
//! Subset strings coming back from the host may carry display-only fragments
//! (label or style expressions appended with AND/OR) and localized operator
//! spellings that the store cannot evaluate. This module reduces them to a
//! plain boolean filter.

use std::sync::LazyLock;

use regex::Regex;

use super::lexer::{Masked, matching_paren};

static ET_NON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bET\s+NON\b").expect("Invalid regex"));
static ET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bET\b").expect("Invalid regex"));
static OU: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bOU\b").expect("Invalid regex"));
static NON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNON\b").expect("Invalid regex"));

static CONNECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(AND|OR)\b").expect("Invalid regex"));
static LEADING_CONNECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(AND|OR)\b\s*").expect("Invalid regex"));
static TRAILING_CONNECTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\b(AND|OR)\s*$").expect("Invalid regex"));
static DUPLICATE_CONNECTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(AND|OR)(\s+(?:AND|OR)\b)+").expect("Invalid regex")
});
static COALESCE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^coalesce\s*\(").expect("Invalid regex"));
static CASE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^(SELECT\s+)?CASE\b.*\bEND$").expect("Invalid regex"));
static CONNECTOR_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(AND|OR)\b").expect("Invalid regex"));
static CASE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^CASE\b").expect("Invalid regex"));
static CASE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(SELECT\s+)?CASE\b").expect("Invalid regex"));
static END_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^END\b").expect("Invalid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex"));

/// Reduce a host subset string to a plain boolean filter
pub fn sanitize_subset_string(subset: &str) -> String {
    let masked = Masked::new(subset);
    let mut text = normalize_operators(&masked.text);
    text = strip_display_fragments(&text);
    text = trim_excess_close_parens(&text);
    text = remove_orphan_connectors(&text);
    let text = WHITESPACE.replace_all(text.trim(), " ");
    let sanitized = masked.restore(&text);
    if sanitized != subset.trim() {
        tracing::debug!(original = %subset, sanitized = %sanitized, "Subset string sanitized");
    }
    sanitized
}

/// Localized spellings of the logical operators
fn normalize_operators(text: &str) -> String {
    let text = ET_NON.replace_all(text, "AND NOT");
    let text = ET.replace_all(&text, "AND");
    let text = OU.replace_all(&text, "OR");
    NON.replace_all(&text, "NOT").into_owned()
}

/// Remove `AND <fragment>` / `OR <fragment>` where the fragment is a
/// display-only expression rather than a predicate
fn strip_display_fragments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut search = 0;

    while let Some(m) = CONNECTOR.find_at(text, search) {
        let after = m.end() + leading_ws(&text[m.end()..]);
        let fragment_end = fragment_end(text, after);
        if is_display_fragment(&text[after..fragment_end]) {
            out.push_str(&text[cursor..m.start()]);
            cursor = fragment_end;
            search = fragment_end;
        } else if CASE_START.is_match(&text[after..]) {
            // Connectors inside a kept CASE belong to its conditions
            search = fragment_end;
        } else {
            search = m.end();
        }
    }

    out.push_str(&text[cursor..]);
    out
}

fn leading_ws(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

/// End of the operand that starts at `start`: a balanced parenthesised
/// group, or everything up to the next connector outside parentheses and
/// `CASE ... END` blocks
fn fragment_end(text: &str, start: usize) -> usize {
    if text[start..].starts_with('(') {
        return matching_paren(text, start).map_or(text.len(), |close| close + 1);
    }
    let mut depth = 0i32;
    let mut case_depth = 0usize;
    for (offset, c) in text[start..].char_indices() {
        let idx = start + offset;
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return idx,
            ')' => depth -= 1,
            _ if depth > 0 || !c.is_ascii_alphabetic() => {}
            _ if starts_word(&CASE_WORD, text, idx) => case_depth += 1,
            _ if case_depth > 0 && starts_word(&END_WORD, text, idx) => case_depth -= 1,
            _ if case_depth == 0 && offset > 0 && starts_word(&CONNECTOR_WORD, text, idx) => {
                return idx;
            }
            _ => {}
        }
    }
    text.len()
}

/// `word` matches at `idx` and `idx` is not inside a longer word
fn starts_word(word: &Regex, text: &str, idx: usize) -> bool {
    let boundary = text[..idx]
        .chars()
        .next_back()
        .is_none_or(|prev| !(prev.is_alphanumeric() || prev == '_'));
    boundary && word.is_match(&text[idx..])
}

fn is_display_fragment(fragment: &str) -> bool {
    let inner = strip_outer_parens(fragment.trim());
    if COALESCE_CALL.is_match(inner) {
        // Only a bare coalesce(...) call; a comparison on it is a real filter
        return inner
            .find('(')
            .and_then(|open| matching_paren(inner, open))
            .is_some_and(|close| close + 1 == inner.len());
    }
    CASE_BLOCK.is_match(inner)
}

fn strip_outer_parens(mut text: &str) -> &str {
    while text.starts_with('(') && matching_paren(text, 0) == Some(text.len() - 1) {
        text = text[1..text.len() - 1].trim();
    }
    text
}

/// Drop trailing `)` while there are more closing than opening parentheses
fn trim_excess_close_parens(text: &str) -> String {
    let mut text = text.trim_end().to_string();
    let opens = text.matches('(').count();
    let mut closes = text.matches(')').count();
    while closes > opens && text.ends_with(')') {
        text.pop();
        text.truncate(text.trim_end().len());
        closes -= 1;
    }
    text
}

fn remove_orphan_connectors(text: &str) -> String {
    let mut text = DUPLICATE_CONNECTOR.replace_all(text, "$1").into_owned();
    loop {
        let stripped = LEADING_CONNECTOR.replace(&text, "");
        let stripped = TRAILING_CONNECTOR.replace(&stripped, "").into_owned();
        if stripped == text {
            return text;
        }
        text = stripped;
    }
}
