//! Quote masking for expression rewrites
//!
//! Rewrites run on text where every quoted section has been swapped for a
//! sentinel, so keyword and function rewriting can never reach into string
//! literals or identifiers. String literals become `\x01n\x01` and quoted
//! identifiers `\x02n\x02`, where `n` indexes the stored original.

use std::sync::LazyLock;

use regex::{Captures, Regex};

pub(super) const LITERAL_MARK: char = '\u{1}';
pub(super) const IDENT_MARK: char = '\u{2}';

/// Regex fragment matching one masked identifier
pub(super) const IDENT_PATTERN: &str = r"\x02\d+\x02";

/// Regex fragment matching one masked string literal
pub(super) const LITERAL_PATTERN: &str = r"\x01\d+\x01";

static SENTINEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x01\x02](\d+)[\x01\x02]").expect("Invalid regex"));

pub(super) struct Masked {
    pub text: String,
    originals: Vec<String>,
}

impl Masked {
    /// Mask single-quoted literals and double-quoted identifiers
    ///
    /// Doubled quotes inside a section are escapes. An unterminated section
    /// runs to the end of the input.
    pub fn new(expr: &str) -> Self {
        let mut masked = Masked {
            text: String::with_capacity(expr.len()),
            originals: Vec::new(),
        };
        let chars: Vec<char> = expr.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\'' || c == '"' {
                let start = i;
                i += 1;
                while i < chars.len() {
                    if chars[i] == c {
                        if chars.get(i + 1) == Some(&c) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                let end = (i + 1).min(chars.len());
                let section: String = chars[start..end].iter().collect();
                let sentinel = if c == '\'' {
                    masked.push_literal(section)
                } else {
                    masked.push_identifier(section)
                };
                masked.text.push_str(&sentinel);
                i = end;
            } else {
                masked.text.push(c);
                i += 1;
            }
        }
        masked
    }

    /// Store a quoted identifier and return its sentinel
    pub fn push_identifier(&mut self, quoted: String) -> String {
        self.push(quoted, IDENT_MARK)
    }

    fn push_literal(&mut self, quoted: String) -> String {
        self.push(quoted, LITERAL_MARK)
    }

    fn push(&mut self, original: String, mark: char) -> String {
        self.originals.push(original);
        format!("{mark}{}{mark}", self.originals.len() - 1)
    }

    /// Put the original quoted sections back into `text`
    pub fn restore(&self, text: &str) -> String {
        SENTINEL
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| self.originals.get(idx))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }

    /// Original text of every masked identifier, in order of appearance
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.originals
            .iter()
            .filter(|s| s.starts_with('"'))
            .map(String::as_str)
    }
}

/// Find the closing parenthesis matching the one at byte offset `open`
pub(super) fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested inside parentheses
pub(super) fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_and_restore() {
        let expr = r#""name" = 'O''Brien' AND "x""y" > 1"#;
        let masked = Masked::new(expr);
        assert!(!masked.text.contains('\''));
        assert!(!masked.text.contains('"'));
        assert!(masked.text.contains("AND"));
        assert_eq!(masked.restore(&masked.text), expr);
        assert_eq!(
            masked.identifiers().collect::<Vec<_>>(),
            vec!["\"name\"", "\"x\"\"y\""]
        );
    }

    #[test]
    fn test_unterminated_literal_runs_to_end() {
        let masked = Masked::new("\"a\" = 'open");
        assert_eq!(masked.restore(&masked.text), "\"a\" = 'open");
        assert!(!masked.text.contains("open"));
    }

    #[test]
    fn test_matching_paren() {
        let text = "f(a, g(b), c) + 1";
        assert_eq!(matching_paren(text, 1), Some(12));
        assert_eq!(matching_paren("f(a", 1), None);
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_top_level("a, f(b, c), d"), vec!["a", " f(b, c)", " d"]);
        assert_eq!(split_top_level("single"), vec!["single"]);
    }
}
