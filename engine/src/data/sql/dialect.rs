//! SQL dialect trait for multi-backend filter generation
//!
//! This trait defines the interface for generating backend-specific spatial SQL.

use crate::domain::expression::{BoundingBox, SpatialPredicate};

/// Geometry shorthand tokens accepted in provider-neutral expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryToken {
    Area,
    Length,
    Perimeter,
    X,
    Y,
    Geometry,
}

impl GeometryToken {
    /// Longest tokens first so `$perimeter` never loses to a shorter prefix
    pub const ALL: [GeometryToken; 6] = [
        GeometryToken::Perimeter,
        GeometryToken::Geometry,
        GeometryToken::Length,
        GeometryToken::Area,
        GeometryToken::X,
        GeometryToken::Y,
    ];

    /// Token text without the leading `$`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Length => "length",
            Self::Perimeter => "perimeter",
            Self::X => "x",
            Self::Y => "y",
            Self::Geometry => "geometry",
        }
    }
}

/// SQL dialect trait for generating backend-specific filter SQL
///
/// Backends differ in:
/// - Spatial function names (ST_Length vs GLength)
/// - Envelope construction and index-overlap operators
/// - Type casting and boolean literals
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier, doubling embedded quotes
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Provider-neutral function name → dialect function name
    ///
    /// Empty for dialects that keep expressions untouched.
    fn function_map(&self) -> &'static [(&'static str, &'static str)];

    /// Whether expressions are rewritten at all for this dialect
    fn rewrites_expressions(&self) -> bool {
        !self.function_map().is_empty()
    }

    /// Render a `$token` shorthand against a geometry column
    fn geometry_token(&self, token: GeometryToken, geom: &str) -> String;

    /// Wrap a geometry in a buffer
    ///
    /// - PostgreSQL/SQLite: `ST_Buffer(geom, distance)`
    /// - Pass-through: `buffer(geom, distance, segments)`
    fn buffer(&self, geom: &str, distance: f64, segments: u32) -> String;

    /// Build a rectangular envelope geometry
    fn envelope(&self, bbox: &BoundingBox) -> String;

    /// Index-assisted bounding box overlap test
    ///
    /// - PostgreSQL: `geom && ST_MakeEnvelope(...)`
    /// - SQLite: `MbrIntersects(geom, BuildMbr(...))`
    fn bbox_filter(&self, geom_col: &str, bbox: &BoundingBox) -> String;

    /// Geometry literal from WKT text
    fn geom_from_wkt(&self, wkt: &str, srid: Option<i32>) -> String;

    /// Reproject a geometry between two SRIDs
    ///
    /// - PostgreSQL/SQLite: `ST_Transform(geom, target)`
    /// - Pass-through: `transform(geom, 'EPSG:source', 'EPSG:target')`
    fn transform(&self, geom: &str, _source_srid: i32, target_srid: i32) -> String {
        format!("ST_Transform({}, {})", geom, target_srid)
    }

    /// Spatial predicate between a layer geometry and another geometry
    ///
    /// `distance` is only used by `dwithin`.
    fn spatial_predicate(
        &self,
        predicate: SpatialPredicate,
        geom: &str,
        other: &str,
        distance: f64,
    ) -> String;

    /// Boolean literal
    fn bool_literal(&self, value: bool) -> &'static str;

    /// Cast an expression to a SQL type
    ///
    /// - PostgreSQL: `expr::type`
    /// - SQLite: `CAST(expr AS TYPE)`
    fn cast(&self, expr: &str, sql_type: &str) -> String;

    /// Generate LIMIT clause
    fn limit(&self, limit: u64) -> String {
        format!("LIMIT {}", limit)
    }
}

/// Format a coordinate without trailing noise (`10` instead of `10.0`)
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Escape a string literal for embedding in single quotes
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
