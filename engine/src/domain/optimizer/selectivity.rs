//! Selectivity estimation
//!
//! Selectivity is the fraction of rows expected to pass a predicate:
//! 0.0 keeps nothing, 1.0 keeps everything. Attribute estimates use the
//! store's column statistics when present and fixed heuristics otherwise.
//! Spatial estimates compare the source extent against the layer extent.

use std::sync::LazyLock;

use regex::Regex;

use super::statistics::{ColumnStats, LayerStatistics};
use crate::domain::expression::{BoundingBox, SpatialPredicate, parse};

const DEFAULT_EQUALITY: f64 = 0.01;
const IN_VALUE_WEIGHT: f64 = 0.05;
const IN_MAX: f64 = 0.5;
const BETWEEN: f64 = 0.10;
const IS_NULL: f64 = 0.05;
const IS_NOT_NULL: f64 = 0.95;
const PREFIX_LIKE: f64 = 0.05;
const GENERAL_LIKE: f64 = 0.25;
const RANGE: f64 = 0.33;
const FALLBACK: f64 = 0.5;

const MIN_SPATIAL: f64 = 0.001;

static IS_NOT_NULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIS\s+NOT\s+NULL\b").expect("Invalid regex"));
static IS_NULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIS\s+NULL\b").expect("Invalid regex"));
static BETWEEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bBETWEEN\b").expect("Invalid regex"));
static IN_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bIN\s*\(([^)]*)\)").expect("Invalid regex"));
static LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bI?LIKE\s+'([^']*)'").expect("Invalid regex"));
static EQUALITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^<>!=])=(?:[^=]|$)").expect("Invalid regex"));
static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<>|!=|>=|<=|>|<").expect("Invalid regex"));
static QUOTED_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"]|"")+)""#).expect("Invalid regex"));

/// Estimate the selectivity of an attribute predicate
///
/// Equality uses `1 / n_distinct`. A negative `n_distinct` is the store's
/// distinct-to-rows ratio and its magnitude is used as the selectivity.
pub fn estimate_attribute_selectivity(expression: &str, column_stats: Option<&ColumnStats>) -> f64 {
    let expression = expression.trim();
    if expression.is_empty() {
        return 1.0;
    }

    let selectivity = if IS_NOT_NULL_RE.is_match(expression) {
        column_stats.map_or(IS_NOT_NULL, |s| 1.0 - s.null_fraction)
    } else if IS_NULL_RE.is_match(expression) {
        column_stats.map_or(IS_NULL, |s| s.null_fraction)
    } else if BETWEEN_RE.is_match(expression) {
        BETWEEN
    } else if let Some(caps) = IN_LIST_RE.captures(expression) {
        let values = caps[1].split(',').filter(|v| !v.trim().is_empty()).count();
        (values as f64 * IN_VALUE_WEIGHT).min(IN_MAX)
    } else if let Some(caps) = LIKE_RE.captures(expression) {
        let pattern = &caps[1];
        let prefix_anchored = !pattern.is_empty() && !pattern.starts_with(['%', '_']);
        if prefix_anchored { PREFIX_LIKE } else { GENERAL_LIKE }
    } else if EQUALITY_RE.is_match(expression) {
        equality_selectivity(column_stats)
    } else if RANGE_RE.is_match(expression) {
        RANGE
    } else {
        FALLBACK
    };

    selectivity.clamp(0.0, 1.0)
}

fn equality_selectivity(column_stats: Option<&ColumnStats>) -> f64 {
    match column_stats {
        Some(stats) if stats.n_distinct > 0.0 => 1.0 / stats.n_distinct,
        Some(stats) if stats.n_distinct < 0.0 => stats.n_distinct.abs(),
        _ => DEFAULT_EQUALITY,
    }
}

/// Selectivity used when the layer extent is unknown
pub fn default_spatial_selectivity(predicate: SpatialPredicate) -> f64 {
    match predicate {
        SpatialPredicate::Intersects
        | SpatialPredicate::Overlaps
        | SpatialPredicate::Crosses
        | SpatialPredicate::Dwithin => 0.10,
        SpatialPredicate::Contains | SpatialPredicate::Within => 0.05,
        SpatialPredicate::Touches => 0.01,
        SpatialPredicate::Equals => 0.001,
        SpatialPredicate::Disjoint => 0.9,
    }
}

/// Estimate the selectivity of a spatial predicate from extent overlap
pub fn estimate_spatial_selectivity(
    source_bbox: &BoundingBox,
    layer_bbox: Option<&BoundingBox>,
    predicate: SpatialPredicate,
) -> f64 {
    let Some(layer_bbox) = layer_bbox.filter(|b| b.area() > 0.0) else {
        return default_spatial_selectivity(predicate);
    };

    let Some(overlap) = source_bbox.intersection(layer_bbox) else {
        return if predicate == SpatialPredicate::Disjoint {
            1.0
        } else {
            0.0
        };
    };

    let ratio = overlap.area() / layer_bbox.area();
    let value = match predicate {
        SpatialPredicate::Contains | SpatialPredicate::Within => ratio * 0.5,
        SpatialPredicate::Touches => ratio * 0.1,
        SpatialPredicate::Disjoint => 1.0 - ratio,
        _ => ratio,
    };
    value.clamp(MIN_SPATIAL, 1.0)
}

/// Estimator bound to one table's statistics
pub struct SelectivityEstimator<'a> {
    stats: &'a LayerStatistics,
}

impl<'a> SelectivityEstimator<'a> {
    pub fn new(stats: &'a LayerStatistics) -> Self {
        Self { stats }
    }

    /// Attribute selectivity, using stats of the first quoted field
    pub fn attribute(&self, expression: &str) -> f64 {
        let column = QUOTED_FIELD_RE
            .captures(expression)
            .and_then(|caps| self.stats.column(&caps[1].replace("\"\"", "\"")));
        estimate_attribute_selectivity(expression, column)
    }

    pub fn spatial(&self, source_bbox: &BoundingBox, predicate: SpatialPredicate) -> f64 {
        estimate_spatial_selectivity(source_bbox, self.stats.bounding_box.as_ref(), predicate)
    }

    /// `(attribute, spatial)` selectivities, each 1.0 when its input is absent
    ///
    /// The spatial predicate is read from the spatial expression; without a
    /// source box only the per-predicate default is available.
    pub fn estimate_combined(
        &self,
        attribute: Option<&str>,
        spatial: Option<&str>,
        source_bbox: Option<&BoundingBox>,
    ) -> (f64, f64) {
        let attribute_selectivity = attribute
            .filter(|e| !e.trim().is_empty())
            .map_or(1.0, |e| self.attribute(e));

        let spatial = spatial.filter(|e| !e.trim().is_empty());
        let spatial_selectivity = match (spatial, source_bbox) {
            (Some(expr), Some(bbox)) => self.spatial(bbox, detect_predicate(expr)),
            (Some(expr), None) => default_spatial_selectivity(detect_predicate(expr)),
            (None, Some(bbox)) => self.spatial(bbox, SpatialPredicate::Intersects),
            (None, None) => 1.0,
        };

        (attribute_selectivity, spatial_selectivity)
    }
}

/// Predicate named by a spatial expression, preferring the longest name
/// (`ST_DWithin` also contains `within`)
pub(super) fn detect_predicate(expression: &str) -> SpatialPredicate {
    parse(expression)
        .spatial_predicates
        .into_iter()
        .max_by_key(|p| p.as_str().len())
        .unwrap_or(SpatialPredicate::Intersects)
}
