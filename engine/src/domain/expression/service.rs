//! Expression validation, parsing and dialect translation
//!
//! Expressions arrive in the provider-neutral form used by the host
//! (`"field" > 10 AND intersects($geometry, ...)`) and leave as SQL for one
//! of the supported dialects. All rewrites run on masked text so string
//! literals and quoted identifiers are never touched.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use super::lexer::{IDENT_PATTERN, LITERAL_PATTERN, Masked, matching_paren, split_top_level};
use super::model::{FilterExpression, ProviderType, SpatialPredicate};
use crate::core::constants::{
    DEFAULT_BUFFER_SEGMENTS, DEFAULT_GEOMETRY_COLUMN, EXPRESSION_LONG_LENGTH,
    EXPRESSION_MAX_COMPLEXITY,
};
use crate::data::sql::{GeometryToken, SqlDialect};
use crate::domain::error::FilterError;

static GEOMETRY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$(perimeter|geometry|length|area|x|y)\b").expect("Invalid regex")
});

static GEOMETRY_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\$geometry|@geometry)\b").expect("Invalid regex"));

static IF_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bif\s*\(").expect("Invalid regex"));

static FUNCTION_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)(\s*\()").expect("Invalid regex"));

static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(and|or|not|in|like|ilike|between|is|null|case|when|then|else|end|true|false)\b",
    )
    .expect("Invalid regex")
});

static NUMERIC_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"({IDENT_PATTERN})(\s*(?:>=|<=|<>|!=|=|>|<)\s*-?\d+(?:\.\d+)?)"
    ))
    .expect("Invalid regex")
});

static TEXT_MATCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({IDENT_PATTERN})(\s+(?:NOT\s+)?I?LIKE\b)")).expect("Invalid regex")
});

static ILIKE: LazyLock<Regex> = LazyLock::new(|| {
    let operand = format!(r"{IDENT_PATTERN}|{LITERAL_PATTERN}|[A-Za-z_]\w*\([^()]*\)|[\w.]+");
    Regex::new(&format!(r"({operand})\s+(NOT\s+)?ILIKE\s+({operand})")).expect("Invalid regex")
});

static TYPE_CAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"({IDENT_PATTERN}|{LITERAL_PATTERN}|[A-Za-z_]\w*\([^()]*\)|[\w.]+)\s*::\s*([A-Za-z_]\w*)"
    ))
    .expect("Invalid regex")
});

static BOOLEAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(TRUE|FALSE)\b").expect("Invalid regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid regex"));

static OPERATOR_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(and|or|not|like|ilike|in|between|is)\b").expect("Invalid regex")
});

static OPERATOR_SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">=|<=|<>|!=|==|=|>|<|\|\||&&").expect("Invalid regex"));

// =============================================================================
// Validation
// =============================================================================

/// Outcome of a syntax check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Character offset of the offending token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_position: Option<usize>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn invalid(message: impl Into<String>, position: Option<usize>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message.into()),
            error_position: position,
            warnings,
        }
    }

    /// Convert a failed validation into an error
    pub fn into_result(self) -> Result<Vec<String>, FilterError> {
        if self.is_valid {
            Ok(self.warnings)
        } else {
            Err(FilterError::invalid_expression(
                self.error_message.unwrap_or_else(|| "Invalid expression".into()),
                self.error_position,
            ))
        }
    }
}

/// Check quotes and parentheses, collecting warnings for suspicious syntax
pub fn validate(expression: &str) -> ValidationResult {
    if expression.trim().is_empty() {
        return ValidationResult::invalid("Expression is empty", None, Vec::new());
    }

    let warnings = collect_warnings(expression);
    let chars: Vec<char> = expression.chars().collect();
    let mut parens: Vec<usize> = Vec::new();
    let mut quote: Option<(char, usize)> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some((q, _)) => {
                if c == q {
                    if chars.get(i + 1) == Some(&q) {
                        i += 2;
                        continue;
                    }
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some((c, i)),
                '(' => parens.push(i),
                ')' => {
                    if parens.pop().is_none() {
                        return ValidationResult::invalid(
                            format!("Unexpected closing parenthesis at position {}", i),
                            Some(i),
                            warnings,
                        );
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    if let Some((q, pos)) = quote {
        let kind = if q == '\'' { "single" } else { "double" };
        return ValidationResult::invalid(
            format!("Unclosed {} quote at position {}", kind, pos),
            Some(pos),
            warnings,
        );
    }
    if let Some(&pos) = parens.last() {
        return ValidationResult::invalid(
            format!("Unclosed parenthesis at position {}", pos),
            Some(pos),
            warnings,
        );
    }

    ValidationResult {
        is_valid: true,
        error_message: None,
        error_position: None,
        warnings,
    }
}

fn collect_warnings(expression: &str) -> Vec<String> {
    let masked = Masked::new(expression);
    let text = masked.text.as_str();
    let mut warnings = Vec::new();

    if text.contains("==") {
        warnings.push("Use '=' instead of '==' for comparison".to_string());
    }
    if text.contains("!=") {
        warnings.push("Use '<>' instead of '!=' for portable SQL".to_string());
    }
    if text.contains("&&") {
        warnings.push("Use AND instead of '&&'".to_string());
    }
    if text.contains("||") && !expression.to_lowercase().contains("concat") {
        warnings.push("'||' is string concatenation in SQL, use OR for logic".to_string());
    }
    for token in [";", "--", "/*", "*/"] {
        if text.contains(token) {
            warnings.push(format!("Suspicious token '{}' in expression", token));
        }
    }
    warnings
}

// =============================================================================
// Parsing
// =============================================================================

/// Structural facts about an expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedExpression {
    /// Quoted field names, first-seen order
    pub fields: Vec<String>,
    pub spatial_predicates: Vec<SpatialPredicate>,
    pub has_geometry_ref: bool,
    pub has_layer_ref: bool,
    pub operators: Vec<String>,
    /// 1 (trivial) to 10 (heavy)
    pub complexity: u8,
}

/// Extract fields, spatial predicates, operators and a complexity score
///
/// Spatial predicates are found by case-insensitive substring match, so a
/// field named `contains_data` also reports `contains`.
pub fn parse(expression: &str) -> ParsedExpression {
    let masked = Masked::new(expression);
    let lower = expression.to_lowercase();

    let mut fields: Vec<String> = Vec::new();
    for ident in masked.identifiers() {
        let name = unquote_identifier(ident);
        if !fields.contains(&name) {
            fields.push(name);
        }
    }

    let spatial_predicates: Vec<SpatialPredicate> = SpatialPredicate::all()
        .into_iter()
        .filter(|p| lower.contains(p.as_str()))
        .collect();

    let has_geometry_ref = ["$geometry", "@geometry", "geometry("]
        .iter()
        .any(|token| lower.contains(token));
    let has_layer_ref = ["@layer", "layer_property(", "get_feature(", "aggregate("]
        .iter()
        .any(|token| lower.contains(token));

    let mut operators: Vec<String> = Vec::new();
    let mut logical_count = 0usize;
    for m in OPERATOR_WORD.find_iter(&masked.text) {
        let op = m.as_str().to_ascii_uppercase();
        if op == "AND" || op == "OR" {
            logical_count += 1;
        }
        if !operators.contains(&op) {
            operators.push(op);
        }
    }
    for m in OPERATOR_SYMBOL.find_iter(&masked.text) {
        let op = m.as_str().to_string();
        if !operators.contains(&op) {
            operators.push(op);
        }
    }

    let mut complexity = 1usize;
    complexity += logical_count.min(3);
    complexity += 2 * spatial_predicates.len();
    if has_geometry_ref {
        complexity += 1;
    }
    if fields.len() > 3 {
        complexity += 1;
    }
    if expression.chars().count() > EXPRESSION_LONG_LENGTH {
        complexity += 1;
    }
    let complexity = complexity.min(EXPRESSION_MAX_COMPLEXITY as usize) as u8;

    ParsedExpression {
        fields,
        spatial_predicates,
        has_geometry_ref,
        has_layer_ref,
        operators,
        complexity,
    }
}

fn unquote_identifier(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .map(|s| s.strip_suffix('"').unwrap_or(s))
        .unwrap_or(quoted);
    inner.replace("\"\"", "\"")
}

// =============================================================================
// Translation
// =============================================================================

/// Translate a provider-neutral expression into the provider's SQL
///
/// File-backed and in-memory providers evaluate the neutral language
/// themselves and get the expression back unchanged.
pub fn to_sql(
    expression: &str,
    provider: ProviderType,
    geometry_column: &str,
) -> Result<String, FilterError> {
    let dialect = dialect_for(provider)?;
    if !dialect.rewrites_expressions() {
        return Ok(expression.to_string());
    }

    let mut masked = Masked::new(expression);
    let geom = masked.push_identifier(quote_geometry_column(dialect, geometry_column));

    let mut sql = replace_geometry_tokens(&masked.text, dialect, &geom);
    sql = rewrite_if(&sql);
    sql = map_functions(&sql, dialect.function_map());
    sql = KEYWORD
        .replace_all(&sql, |caps: &Captures| caps[1].to_ascii_uppercase())
        .into_owned();

    match provider {
        ProviderType::PostgreSql => {
            sql = NUMERIC_COMPARISON
                .replace_all(&sql, "$1::numeric$2")
                .into_owned();
            sql = TEXT_MATCH.replace_all(&sql, "$1::text$2").into_owned();
        }
        ProviderType::Spatialite => {
            // ILIKE first so the LIKE it produces is not rewritten again
            sql = ILIKE
                .replace_all(&sql, |caps: &Captures| {
                    format!(
                        "LOWER({}) {}LIKE LOWER({})",
                        &caps[1],
                        caps.get(2).map_or("", |m| m.as_str()),
                        &caps[3]
                    )
                })
                .into_owned();
            sql = TYPE_CAST
                .replace_all(&sql, |caps: &Captures| dialect.cast(&caps[1], &caps[2]))
                .into_owned();
            sql = BOOLEAN
                .replace_all(&sql, |caps: &Captures| dialect.bool_literal(&caps[1] == "TRUE"))
                .into_owned();
        }
        _ => {}
    }

    let sql = WHITESPACE.replace_all(sql.trim(), " ");
    let sql = masked.restore(&sql);
    tracing::trace!(provider = %provider, sql = %sql, "Expression translated");
    Ok(sql)
}

fn dialect_for(provider: ProviderType) -> Result<&'static dyn SqlDialect, FilterError> {
    provider
        .dialect()
        .ok_or_else(|| FilterError::UnsupportedProvider(provider.to_string()))
}

fn quote_geometry_column(dialect: &dyn SqlDialect, geometry_column: &str) -> String {
    let column = geometry_column.trim();
    let column = if column.is_empty() {
        DEFAULT_GEOMETRY_COLUMN
    } else {
        column
    };
    if column.len() >= 2 && column.starts_with('"') && column.ends_with('"') {
        column.to_string()
    } else {
        dialect.quote_identifier(column)
    }
}

fn replace_geometry_tokens(text: &str, dialect: &dyn SqlDialect, geom: &str) -> String {
    GEOMETRY_TOKEN
        .replace_all(text, |caps: &Captures| {
            let name = caps[1].to_ascii_lowercase();
            GeometryToken::ALL
                .iter()
                .find(|token| token.as_str() == name)
                .map(|token| dialect.geometry_token(*token, geom))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Rewrite `if(cond, a, b)` into `CASE WHEN cond THEN a ELSE b END`
///
/// Calls without exactly three arguments are left alone.
fn rewrite_if(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut search = 0;

    while let Some(m) = IF_CALL.find_at(text, search) {
        let open = m.end() - 1;
        let Some(close) = matching_paren(text, open) else {
            break;
        };
        let args = split_top_level(&text[open + 1..close]);
        if let [condition, then, otherwise] = args.as_slice() {
            out.push_str(&text[cursor..m.start()]);
            out.push_str(&format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                rewrite_if(condition.trim()),
                rewrite_if(then.trim()),
                rewrite_if(otherwise.trim())
            ));
            cursor = close + 1;
            search = cursor;
        } else {
            search = open + 1;
        }
    }

    out.push_str(&text[cursor..]);
    out
}

fn map_functions(text: &str, map: &[(&str, &str)]) -> String {
    FUNCTION_CALL
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            match map.iter().find(|(from, _)| from.eq_ignore_ascii_case(name)) {
                Some((_, to)) => format!("{}{}", to, &caps[2]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// =============================================================================
// Composition
// =============================================================================

/// Wrap every geometry reference in the provider's buffer function
///
/// Applying a buffer twice nests the calls.
pub fn add_buffer(
    expression: &str,
    distance: f64,
    provider: ProviderType,
    segments: u32,
) -> Result<String, FilterError> {
    let dialect = dialect_for(provider)?;
    if !distance.is_finite() {
        return Err(FilterError::InvalidCriteria(format!(
            "Buffer distance must be finite, got {}",
            distance
        )));
    }
    let masked = Masked::new(expression);
    let buffered = GEOMETRY_REF.replace_all(&masked.text, |caps: &Captures| {
        dialect.buffer(&caps[1], distance, segments.max(1))
    });
    Ok(masked.restore(&buffered))
}

/// Join expressions with a logical operator
///
/// Empty members are dropped. No members gives an empty string and a single
/// member is returned as is.
pub fn combine_expressions<S: AsRef<str>>(expressions: &[S], operator: &str) -> String {
    let members: Vec<&str> = expressions
        .iter()
        .map(|e| e.as_ref().trim())
        .filter(|e| !e.is_empty())
        .collect();
    match members.as_slice() {
        [] => String::new(),
        [single] => single.to_string(),
        _ => {
            let separator = format!(" {} ", operator.trim().to_uppercase());
            members
                .iter()
                .map(|m| format!("({})", m))
                .collect::<Vec<_>>()
                .join(&separator)
        }
    }
}

pub fn negate(expression: &str) -> String {
    format!("NOT ({})", expression)
}

/// Validate, parse and translate a raw expression in one go
pub fn build_expression(
    raw: &str,
    provider: ProviderType,
    geometry_column: &str,
) -> Result<FilterExpression, FilterError> {
    let warnings = validate(raw).into_result()?;
    if !warnings.is_empty() {
        tracing::debug!(?warnings, "Expression has warnings");
    }
    let parsed = parse(raw);
    let sql = to_sql(raw, provider, geometry_column)?;
    Ok(FilterExpression::new(raw, provider)?
        .with_sql(sql)
        .with_spatial_predicates(parsed.spatial_predicates))
}

/// Render a spatial predicate between the layer geometry and a source geometry
///
/// A positive buffer grows the source geometry, except for `dwithin` which
/// takes the buffer as its distance argument.
pub fn spatial_predicate_sql(
    predicate: SpatialPredicate,
    provider: ProviderType,
    geometry_column: &str,
    source_geometry_sql: &str,
    buffer: Option<f64>,
) -> Result<String, FilterError> {
    let dialect = dialect_for(provider)?;
    let geom = if dialect.rewrites_expressions() {
        quote_geometry_column(dialect, geometry_column)
    } else {
        "$geometry".to_string()
    };
    let distance = buffer.filter(|b| *b > 0.0 && b.is_finite()).unwrap_or(0.0);
    let other = if distance > 0.0 && predicate != SpatialPredicate::Dwithin {
        dialect.buffer(source_geometry_sql, distance, DEFAULT_BUFFER_SEGMENTS)
    } else {
        source_geometry_sql.to_string()
    };
    Ok(dialect.spatial_predicate(predicate, &geom, &other, distance))
}
