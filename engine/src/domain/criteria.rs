//! Filter criteria
//!
//! Typed descriptions of what to filter. Vector criteria carry an attribute
//! expression and/or a spatial relation to a source layer; raster criteria
//! carry a band, a value condition and an optional mask. `FilterCriteria` is
//! the closed union the strategy layer dispatches on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::FilterError;
use crate::domain::expression::SpatialPredicate;

// =============================================================================
// LayerType
// =============================================================================

/// Kind of map layer a strategy handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    Vector,
    Raster,
    Mesh,
    PointCloud,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Raster => "raster",
            Self::Mesh => "mesh",
            Self::PointCloud => "point_cloud",
        }
    }
}

impl FromStr for LayerType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "raster" => Ok(Self::Raster),
            "mesh" => Ok(Self::Mesh),
            "point_cloud" | "pointcloud" => Ok(Self::PointCloud),
            other => Err(FilterError::UnknownLayerType(other.to_string())),
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Vector criteria
// =============================================================================

/// What to filter on a vector layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFilterCriteria {
    pub layer_id: String,
    #[serde(default)]
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_layer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_predicate: Option<SpatialPredicate>,
    /// Buffer around the source geometry in layer units
    #[serde(default)]
    pub buffer_value: f64,
    /// Only use the selected features of the source layer
    #[serde(default)]
    pub use_selection: bool,
}

impl VectorFilterCriteria {
    pub fn new(layer_id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            layer_id: layer_id.into(),
            expression: expression.into(),
            source_layer_id: None,
            spatial_predicate: None,
            buffer_value: 0.0,
            use_selection: false,
        }
    }

    pub fn with_spatial(
        mut self,
        predicate: SpatialPredicate,
        source_layer_id: impl Into<String>,
    ) -> Self {
        self.spatial_predicate = Some(predicate);
        self.source_layer_id = Some(source_layer_id.into());
        self
    }

    pub fn with_buffer(mut self, buffer_value: f64) -> Self {
        self.buffer_value = buffer_value;
        self
    }

    pub fn with_selection(mut self, use_selection: bool) -> Self {
        self.use_selection = use_selection;
        self
    }

    pub fn has_expression(&self) -> bool {
        !self.expression.trim().is_empty()
    }

    /// Both a predicate and a non-empty source layer are set
    pub fn has_spatial(&self) -> bool {
        self.spatial_predicate.is_some()
            && self
                .source_layer_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.layer_id.trim().is_empty() {
            return Err(FilterError::InvalidCriteria("layer_id is required".into()));
        }
        if !self.has_expression() && !self.has_spatial() {
            return Err(FilterError::InvalidCriteria(
                "Vector criteria need an expression or a spatial predicate with a source layer"
                    .into(),
            ));
        }
        if !(self.buffer_value >= 0.0 && self.buffer_value.is_finite()) {
            return Err(FilterError::InvalidCriteria(format!(
                "buffer_value must be a non-negative number, got {}",
                self.buffer_value
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for VectorFilterCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector[{}]", self.layer_id)?;
        if self.has_expression() {
            write!(f, ": {}", self.expression.trim())?;
        }
        if let (Some(predicate), Some(source)) = (self.spatial_predicate, &self.source_layer_id) {
            write!(f, " {} {}", predicate, source)?;
            if self.buffer_value > 0.0 {
                write!(f, " (buffer {})", self.buffer_value)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Raster criteria
// =============================================================================

/// Pixel test applied to band values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterPredicate {
    #[default]
    WithinRange,
    OutsideRange,
    AboveValue,
    BelowValue,
    EqualsValue,
    IsNodata,
    IsNotNodata,
}

impl RasterPredicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WithinRange => "within_range",
            Self::OutsideRange => "outside_range",
            Self::AboveValue => "above_value",
            Self::BelowValue => "below_value",
            Self::EqualsValue => "equals_value",
            Self::IsNodata => "is_nodata",
            Self::IsNotNodata => "is_not_nodata",
        }
    }

    /// Predicates that test nodata instead of a value
    pub fn is_nodata(&self) -> bool {
        matches!(self, Self::IsNodata | Self::IsNotNodata)
    }
}

fn default_band_index() -> i32 {
    1
}

/// What to filter on a raster layer
///
/// `predicate` always has a value, so it never counts as an active condition
/// on its own; only a value bound, a mask layer or a nodata predicate do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterFilterCriteria {
    pub layer_id: String,
    /// 1-based band number
    #[serde(default = "default_band_index")]
    pub band_index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub predicate: RasterPredicate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_layer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_feature_ids: Option<Vec<i64>>,
    /// Slack applied to value comparisons
    #[serde(default)]
    pub tolerance: f64,
}

impl RasterFilterCriteria {
    pub fn new(layer_id: impl Into<String>, band_index: i32) -> Self {
        Self {
            layer_id: layer_id.into(),
            band_index,
            min_value: None,
            max_value: None,
            predicate: RasterPredicate::default(),
            mask_layer_id: None,
            mask_feature_ids: None,
            tolerance: 0.0,
        }
    }

    pub fn with_range(mut self, min_value: Option<f64>, max_value: Option<f64>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn with_predicate(mut self, predicate: RasterPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_mask(
        mut self,
        mask_layer_id: impl Into<String>,
        feature_ids: Option<Vec<i64>>,
    ) -> Self {
        self.mask_layer_id = Some(mask_layer_id.into());
        self.mask_feature_ids = feature_ids;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// At least one bound is set
    pub fn has_value_range(&self) -> bool {
        self.min_value.is_some() || self.max_value.is_some()
    }

    pub fn has_mask(&self) -> bool {
        self.mask_layer_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    pub fn has_nodata_predicate(&self) -> bool {
        self.predicate.is_nodata()
    }

    pub fn has_active_condition(&self) -> bool {
        self.has_value_range() || self.has_mask() || self.has_nodata_predicate()
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.layer_id.trim().is_empty() {
            return Err(FilterError::InvalidCriteria("layer_id is required".into()));
        }
        if self.band_index < 1 {
            return Err(FilterError::InvalidCriteria(format!(
                "band_index must be >= 1, got {}",
                self.band_index
            )));
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value)
            && min > max
        {
            return Err(FilterError::InvalidCriteria(format!(
                "min_value ({}) is greater than max_value ({})",
                min, max
            )));
        }
        if !self.has_active_condition() {
            return Err(FilterError::InvalidCriteria(
                "Raster criteria need a value range, a mask layer or a nodata predicate".into(),
            ));
        }
        if !(self.tolerance >= 0.0 && self.tolerance.is_finite()) {
            return Err(FilterError::InvalidCriteria(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for RasterFilterCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Raster[{}] band {} {}",
            self.layer_id,
            self.band_index,
            self.predicate.as_str()
        )?;
        if self.has_value_range() {
            let bound = |v: Option<f64>| v.map_or_else(|| "*".to_string(), |v| v.to_string());
            write!(f, " [{}, {}]", bound(self.min_value), bound(self.max_value))?;
        }
        if let Some(mask) = self.mask_layer_id.as_deref() {
            write!(f, " mask {}", mask)?;
        }
        Ok(())
    }
}

// =============================================================================
// FilterCriteria
// =============================================================================

/// Criteria for any supported layer kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer_type", rename_all = "snake_case")]
pub enum FilterCriteria {
    Vector(VectorFilterCriteria),
    Raster(RasterFilterCriteria),
}

impl FilterCriteria {
    pub fn layer_id(&self) -> &str {
        match self {
            Self::Vector(c) => &c.layer_id,
            Self::Raster(c) => &c.layer_id,
        }
    }

    pub fn layer_type(&self) -> LayerType {
        match self {
            Self::Vector(_) => LayerType::Vector,
            Self::Raster(_) => LayerType::Raster,
        }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        match self {
            Self::Vector(c) => c.validate(),
            Self::Raster(c) => c.validate(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl From<VectorFilterCriteria> for FilterCriteria {
    fn from(criteria: VectorFilterCriteria) -> Self {
        Self::Vector(criteria)
    }
}

impl From<RasterFilterCriteria> for FilterCriteria {
    fn from(criteria: RasterFilterCriteria) -> Self {
        Self::Raster(criteria)
    }
}

impl fmt::Display for FilterCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector(c) => c.fmt(f),
            Self::Raster(c) => c.fmt(f),
        }
    }
}

/// Build criteria from their JSON wire form
///
/// `layer_type` selects the variant; a missing or unrecognized value is an
/// error naming the accepted types.
pub fn criteria_from_value(value: &Value) -> Result<FilterCriteria, FilterError> {
    let object = value
        .as_object()
        .ok_or_else(|| FilterError::InvalidCriteria("Criteria must be a JSON object".into()))?;
    let layer_type = object
        .get("layer_type")
        .ok_or_else(|| FilterError::InvalidCriteria("Missing 'layer_type' in criteria".into()))?;
    let layer_type = layer_type.as_str().ok_or_else(|| {
        FilterError::InvalidCriteria(format!("'layer_type' must be a string, got {}", layer_type))
    })?;

    match layer_type.parse::<LayerType>() {
        Ok(LayerType::Vector) => serde_json::from_value(value.clone())
            .map(FilterCriteria::Vector)
            .map_err(|e| FilterError::InvalidCriteria(format!("Invalid vector criteria: {}", e))),
        Ok(LayerType::Raster) => serde_json::from_value(value.clone())
            .map(FilterCriteria::Raster)
            .map_err(|e| FilterError::InvalidCriteria(format!("Invalid raster criteria: {}", e))),
        _ => Err(FilterError::UnknownLayerType(format!(
            "'{}' (expected 'vector' or 'raster')",
            layer_type
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raster() -> RasterFilterCriteria {
        RasterFilterCriteria::new("dem", 1).with_range(Some(100.0), Some(500.0))
    }

    // --- vector ---

    #[test]
    fn test_vector_requires_layer_id() {
        assert!(!VectorFilterCriteria::new("", "\"a\" = 1").is_valid());
        assert!(!VectorFilterCriteria::new("   ", "\"a\" = 1").is_valid());
    }

    #[test]
    fn test_vector_expression_or_spatial() {
        assert!(VectorFilterCriteria::new("L", "\"a\" = 1").is_valid());
        assert!(!VectorFilterCriteria::new("L", "").is_valid());
        assert!(
            VectorFilterCriteria::new("L", "")
                .with_spatial(SpatialPredicate::Intersects, "src")
                .is_valid()
        );
        let mut no_source = VectorFilterCriteria::new("L", "");
        no_source.spatial_predicate = Some(SpatialPredicate::Within);
        assert!(!no_source.is_valid());
    }

    #[test]
    fn test_vector_negative_buffer() {
        let criteria = VectorFilterCriteria::new("L", "\"a\" = 1").with_buffer(-5.0);
        assert!(matches!(criteria.validate(), Err(FilterError::InvalidCriteria(_))));
    }

    #[test]
    fn test_vector_display() {
        let criteria = VectorFilterCriteria::new("roads", "\"type\" = 'A'")
            .with_spatial(SpatialPredicate::Intersects, "communes")
            .with_buffer(10.0);
        assert_eq!(
            criteria.to_string(),
            "Vector[roads]: \"type\" = 'A' intersects communes (buffer 10)"
        );
    }

    // --- raster: each validity clause on its own ---

    #[test]
    fn test_raster_valid_baseline() {
        assert!(raster().is_valid());
    }

    #[test]
    fn test_raster_empty_layer_id() {
        let mut criteria = raster();
        criteria.layer_id = String::new();
        assert!(!criteria.is_valid());
    }

    #[test]
    fn test_raster_band_below_one() {
        let mut criteria = raster();
        criteria.band_index = 0;
        assert!(!criteria.is_valid());
        criteria.band_index = -2;
        assert!(!criteria.is_valid());
    }

    #[test]
    fn test_raster_inverted_range() {
        let criteria = raster().with_range(Some(10.0), Some(5.0));
        let err = criteria.validate().unwrap_err();
        assert!(err.to_string().contains("greater than"));
        assert!(raster().with_range(Some(5.0), Some(5.0)).is_valid());
    }

    #[test]
    fn test_raster_no_active_condition() {
        let criteria = RasterFilterCriteria::new("dem", 1);
        assert_eq!(criteria.predicate, RasterPredicate::WithinRange);
        assert!(!criteria.has_active_condition());
        assert!(!criteria.is_valid());
    }

    #[test]
    fn test_raster_each_condition_alone_is_enough() {
        assert!(
            RasterFilterCriteria::new("dem", 1)
                .with_range(None, Some(3.0))
                .is_valid()
        );
        assert!(
            RasterFilterCriteria::new("dem", 1)
                .with_mask("zones", None)
                .is_valid()
        );
        assert!(
            RasterFilterCriteria::new("dem", 2)
                .with_predicate(RasterPredicate::IsNodata)
                .is_valid()
        );
        assert!(
            !RasterFilterCriteria::new("dem", 1)
                .with_mask("  ", Some(vec![1]))
                .is_valid()
        );
    }

    #[test]
    fn test_raster_negative_tolerance() {
        assert!(!raster().with_tolerance(-0.1).is_valid());
    }

    // --- wire format ---

    #[test]
    fn test_criteria_from_value_vector() {
        let value = json!({
            "layer_type": "vector",
            "layer_id": "L",
            "expression": "\"pop\" > 10000",
            "spatial_predicate": "intersects",
            "source_layer_id": "S",
            "buffer_value": 25.0
        });
        let criteria = criteria_from_value(&value).unwrap();
        assert_eq!(criteria.layer_type(), LayerType::Vector);
        assert_eq!(criteria.layer_id(), "L");
        match criteria {
            FilterCriteria::Vector(v) => {
                assert_eq!(v.spatial_predicate, Some(SpatialPredicate::Intersects));
                assert_eq!(v.buffer_value, 25.0);
                assert!(!v.use_selection);
            }
            FilterCriteria::Raster(_) => panic!("expected vector criteria"),
        }
    }

    #[test]
    fn test_criteria_from_value_raster_defaults() {
        let value = json!({"layer_type": "raster", "layer_id": "dem", "min_value": 1.5});
        let FilterCriteria::Raster(r) = criteria_from_value(&value).unwrap() else {
            panic!("expected raster criteria");
        };
        assert_eq!(r.band_index, 1);
        assert_eq!(r.predicate, RasterPredicate::WithinRange);
        assert_eq!(r.min_value, Some(1.5));
        assert!(r.is_valid());
    }

    #[test]
    fn test_criteria_from_value_errors() {
        let err = criteria_from_value(&json!({"layer_id": "L"})).unwrap_err();
        assert!(err.to_string().contains("Missing 'layer_type'"));

        let err = criteria_from_value(&json!({"layer_type": "mesh", "layer_id": "L"})).unwrap_err();
        assert!(matches!(err, FilterError::UnknownLayerType(_)));
        assert!(err.to_string().contains("expected 'vector' or 'raster'"));

        let err = criteria_from_value(&json!({"layer_type": "raster"})).unwrap_err();
        assert!(err.to_string().contains("Invalid raster criteria"));

        assert!(criteria_from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_to_value_carries_layer_type() {
        let criteria = FilterCriteria::from(VectorFilterCriteria::new("L", "\"a\" = 1"));
        let value = criteria.to_value();
        assert_eq!(value["layer_type"], "vector");
        assert_eq!(criteria_from_value(&value).unwrap(), criteria);
    }

    #[test]
    fn test_layer_type_parse() {
        assert_eq!("Raster".parse::<LayerType>().unwrap(), LayerType::Raster);
        assert_eq!("pointcloud".parse::<LayerType>().unwrap(), LayerType::PointCloud);
        assert!("tiles".parse::<LayerType>().is_err());
    }
}
