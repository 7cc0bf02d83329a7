//! Expression value objects
//!
//! Immutable descriptions of a filter expression, the provider it targets,
//! the spatial predicates it uses and the extents it is evaluated against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::constants::DEFAULT_BUFFER_SEGMENTS;
use crate::data::sql::{Backend, PassthroughDialect, PostgresDialect, SqlDialect, SqliteDialect};
use crate::domain::error::FilterError;

// =============================================================================
// ProviderType
// =============================================================================

/// Storage provider a layer is backed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Networked relational database with PostGIS
    PostgreSql,
    /// Embedded SQLite database with SpatiaLite (includes GeoPackage via SQL)
    Spatialite,
    /// Generic file-backed provider
    Ogr,
    /// In-memory layer
    Memory,
    Unknown,
}

impl ProviderType {
    /// Map a host runtime provider identifier onto a provider type
    pub fn from_host_provider(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "postgis" => Self::PostgreSql,
            "spatialite" | "sqlite" => Self::Spatialite,
            "ogr" | "gdal" | "gpkg" | "geopackage" | "shapefile" | "shp" | "geojson"
            | "delimitedtext" | "csv" => Self::Ogr,
            "memory" | "mem" => Self::Memory,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSql => "postgresql",
            Self::Spatialite => "spatialite",
            Self::Ogr => "ogr",
            Self::Memory => "memory",
            Self::Unknown => "unknown",
        }
    }

    /// SQL dialect for this provider, `None` when the provider is unknown
    pub fn dialect(&self) -> Option<&'static dyn SqlDialect> {
        match self {
            Self::PostgreSql => Some(&PostgresDialect),
            Self::Spatialite => Some(&SqliteDialect),
            Self::Ogr | Self::Memory => Some(&PassthroughDialect),
            Self::Unknown => None,
        }
    }

    /// Whether layers of this provider can be queried through a connection
    pub fn is_sql_backed(&self) -> bool {
        matches!(self, Self::PostgreSql | Self::Spatialite)
    }

    /// Connection backend serving this provider
    pub fn backend(&self) -> Option<Backend> {
        match self {
            Self::PostgreSql => Some(Backend::Postgres),
            Self::Spatialite => Some(Backend::Sqlite),
            _ => None,
        }
    }
}

impl From<Backend> for ProviderType {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Postgres => Self::PostgreSql,
            Backend::Sqlite => Self::Spatialite,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SpatialPredicate
// =============================================================================

/// OGC spatial predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialPredicate {
    Intersects,
    Contains,
    Within,
    Crosses,
    Touches,
    Overlaps,
    Disjoint,
    Equals,
    Dwithin,
}

impl SpatialPredicate {
    pub fn all() -> [SpatialPredicate; 9] {
        [
            Self::Intersects,
            Self::Contains,
            Self::Within,
            Self::Crosses,
            Self::Touches,
            Self::Overlaps,
            Self::Disjoint,
            Self::Equals,
            Self::Dwithin,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intersects => "intersects",
            Self::Contains => "contains",
            Self::Within => "within",
            Self::Crosses => "crosses",
            Self::Touches => "touches",
            Self::Overlaps => "overlaps",
            Self::Disjoint => "disjoint",
            Self::Equals => "equals",
            Self::Dwithin => "dwithin",
        }
    }
}

impl FromStr for SpatialPredicate {
    type Err = FilterError;

    /// Accepts bare names and `ST_` prefixed function names, any case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("st_").unwrap_or(&lower);
        Self::all()
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| {
                FilterError::InvalidCriteria(format!("Unknown spatial predicate: {}", s))
            })
    }
}

impl fmt::Display for SpatialPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BoundingBox
// =============================================================================

/// Axis-aligned extent with an optional spatial reference id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<i32>,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            srid: None,
        }
    }

    pub fn with_srid(mut self, srid: i32) -> Self {
        self.srid = Some(srid);
        self
    }

    /// Attach the srid of an authority id such as `EPSG:4326`
    ///
    /// Ids without a numeric EPSG code leave the srid unset.
    pub fn with_authid(mut self, authid: &str) -> Self {
        self.srid = srid_from_authid(authid);
        self
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Inverted or non-finite boxes are empty
    pub fn is_empty(&self) -> bool {
        !(self.xmin.is_finite() && self.ymin.is_finite())
            || !(self.xmax.is_finite() && self.ymax.is_finite())
            || self.xmin > self.xmax
            || self.ymin > self.ymax
    }

    pub fn area(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// Overlapping region, `None` when the boxes do not meet
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if self.is_empty() || other.is_empty() {
            return None;
        }
        let result = BoundingBox {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
            srid: self.srid.or(other.srid),
        };
        (!result.is_empty()).then_some(result)
    }

    /// Grow the box by `distance` on every side
    pub fn expand(&self, distance: f64) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin - distance,
            ymin: self.ymin - distance,
            xmax: self.xmax + distance,
            ymax: self.ymax + distance,
            srid: self.srid,
        }
    }
}

/// Parse the numeric code of an `EPSG:<code>` authority id
pub fn srid_from_authid(authid: &str) -> Option<i32> {
    let (authority, code) = authid.trim().split_once(':')?;
    if !authority.eq_ignore_ascii_case("epsg") {
        return None;
    }
    code.trim().parse().ok()
}

// =============================================================================
// FilterExpression
// =============================================================================

/// A filter expression with its translated SQL and spatial metadata
///
/// Instances are immutable; the `with_*` methods return modified copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterExpression {
    raw: String,
    sql: String,
    provider: ProviderType,
    is_spatial: bool,
    spatial_predicates: Vec<SpatialPredicate>,
    source_layer_id: Option<String>,
    target_layer_ids: Vec<String>,
    buffer_value: Option<f64>,
    buffer_segments: u32,
}

impl FilterExpression {
    /// Create an expression whose SQL is the raw text
    pub fn new(raw: impl Into<String>, provider: ProviderType) -> Result<Self, FilterError> {
        let raw = raw.into();
        let expression = Self {
            sql: raw.clone(),
            raw,
            provider,
            is_spatial: false,
            spatial_predicates: Vec::new(),
            source_layer_id: None,
            target_layer_ids: Vec::new(),
            buffer_value: None,
            buffer_segments: DEFAULT_BUFFER_SEGMENTS,
        };
        expression.validated()
    }

    fn validated(self) -> Result<Self, FilterError> {
        if self.raw.trim().is_empty() {
            return Err(FilterError::invalid_expression("Expression is empty", None));
        }
        if let Some(buffer) = self.buffer_value
            && !(buffer >= 0.0 && buffer.is_finite())
        {
            return Err(FilterError::InvalidCriteria(format!(
                "Buffer value must be a non-negative number, got {}",
                buffer
            )));
        }
        if self.buffer_segments == 0 {
            return Err(FilterError::InvalidCriteria(
                "Buffer segments must be at least 1".into(),
            ));
        }
        Ok(self)
    }

    pub fn with_sql(&self, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..self.clone()
        }
    }

    pub fn with_buffer(&self, value: f64, segments: u32) -> Result<Self, FilterError> {
        Self {
            buffer_value: Some(value),
            buffer_segments: segments,
            ..self.clone()
        }
        .validated()
    }

    pub fn with_targets(
        &self,
        source_layer_id: Option<String>,
        target_layer_ids: Vec<String>,
    ) -> Self {
        Self {
            source_layer_id,
            target_layer_ids,
            ..self.clone()
        }
    }

    pub fn with_provider(&self, provider: ProviderType) -> Self {
        Self {
            provider,
            ..self.clone()
        }
    }

    pub fn with_spatial_predicates(&self, predicates: Vec<SpatialPredicate>) -> Self {
        Self {
            is_spatial: !predicates.is_empty(),
            spatial_predicates: predicates,
            ..self.clone()
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    pub fn is_spatial(&self) -> bool {
        self.is_spatial
    }

    pub fn spatial_predicates(&self) -> &[SpatialPredicate] {
        &self.spatial_predicates
    }

    pub fn source_layer_id(&self) -> Option<&str> {
        self.source_layer_id.as_deref()
    }

    pub fn target_layer_ids(&self) -> &[String] {
        &self.target_layer_ids
    }

    pub fn buffer_value(&self) -> Option<f64> {
        self.buffer_value
    }

    pub fn buffer_segments(&self) -> u32 {
        self.buffer_segments
    }

    /// A buffer of zero is treated as no buffer
    pub fn has_buffer(&self) -> bool {
        self.buffer_value.is_some_and(|b| b > 0.0)
    }

    /// No spatial predicate and no buffer
    pub fn is_simple(&self) -> bool {
        !self.is_spatial && !self.has_buffer()
    }

    pub fn target_count(&self) -> usize {
        self.target_layer_ids.len()
    }
}
