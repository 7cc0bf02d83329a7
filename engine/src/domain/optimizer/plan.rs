//! Filter plan construction
//!
//! The builder decides, from the table size and predicate selectivities, in
//! which order the attribute predicate, the bounding box prefilter and the
//! exact spatial predicate run. Every plan returns exactly the rows the
//! conjunction of its inputs returns; ordering only changes the cost.

use std::fmt;

use serde::Serialize;

use super::selectivity::{SelectivityEstimator, detect_predicate};
use super::statistics::LayerStatistics;
use crate::core::config::OptimizerConfig;
use crate::data::SqlDialect;
use crate::domain::expression::{BoundingBox, SpatialPredicate, combine_expressions};

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    BboxPrefilter,
    AttributeFilter,
    SpatialPredicate,
    IndexScan,
    ResultLimit,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BboxPrefilter => "bbox_prefilter",
            Self::AttributeFilter => "attribute_filter",
            Self::SpatialPredicate => "spatial_predicate",
            Self::IndexScan => "index_scan",
            Self::ResultLimit => "result_limit",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering chosen for a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// One query with every predicate
    Direct,
    AttributeFirst,
    BboxThenFull,
    AttributeBboxSpatial,
}

impl PlanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::AttributeFirst => "attribute_first",
            Self::BboxThenFull => "bbox_then_full",
            Self::AttributeBboxSpatial => "attribute_bbox_spatial",
        }
    }
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterStep {
    pub step_type: StepType,
    /// SQL predicate; empty for result-limit steps
    pub expression: String,
    /// 1-based execution order
    pub priority: u32,
    pub estimated_selectivity: f64,
    /// Whether the step runs over the previous step's candidates
    pub requires_previous_ids: bool,
    pub chunk_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPlan {
    pub strategy: PlanStrategy,
    pub steps: Vec<FilterStep>,
    pub estimated_row_count: u64,
    pub attribute_selectivity: f64,
    pub spatial_selectivity: f64,
}

impl FilterPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Rows expected to survive every step
    pub fn estimated_result_count(&self) -> u64 {
        let fraction: f64 = self.steps.iter().map(|s| s.estimated_selectivity).product();
        (self.estimated_row_count as f64 * fraction).round() as u64
    }

    /// One-line description
    ///
    /// `attribute_first: attribute_filter(0.010) -> spatial_predicate(0.100)`
    pub fn summary(&self) -> String {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}({:.3})", s.step_type, s.estimated_selectivity))
            .collect();
        format!("{}: {}", self.strategy, steps.join(" -> "))
    }
}

/// Builds plans for one table
pub struct FilterPlanBuilder<'a> {
    stats: &'a LayerStatistics,
    dialect: &'static dyn SqlDialect,
    geometry_column: String,
    config: &'a OptimizerConfig,
    result_limit: Option<u64>,
}

struct PlanInputs<'e> {
    attribute: Option<&'e str>,
    spatial: Option<&'e str>,
    bbox: Option<String>,
    attribute_selectivity: f64,
    spatial_selectivity: f64,
    bbox_selectivity: f64,
}

impl<'a> FilterPlanBuilder<'a> {
    /// `geometry_column` is used as given; quote it beforehand
    pub fn new(
        stats: &'a LayerStatistics,
        dialect: &'static dyn SqlDialect,
        geometry_column: impl Into<String>,
        config: &'a OptimizerConfig,
    ) -> Self {
        Self {
            stats,
            dialect,
            geometry_column: geometry_column.into(),
            config,
            result_limit: None,
        }
    }

    /// Append a result-limit step to every plan
    pub fn with_result_limit(mut self, limit: Option<u64>) -> Self {
        self.result_limit = limit.filter(|l| *l > 0);
        self
    }

    pub fn build(
        &self,
        attribute: Option<&str>,
        spatial: Option<&str>,
        source_bbox: Option<&BoundingBox>,
    ) -> FilterPlan {
        let inputs = self.inputs(attribute, spatial, source_bbox);
        let rows = self.stats.estimated_row_count;
        let high = self.config.high_selectivity_threshold;
        let medium = self.config.medium_selectivity_threshold;

        let (strategy, mut steps) = if rows < self.config.small_dataset_threshold {
            (PlanStrategy::Direct, self.direct_steps(&inputs))
        } else if inputs.attribute.is_some() && inputs.attribute_selectivity < high {
            (PlanStrategy::AttributeFirst, self.attribute_first_steps(&inputs, rows))
        } else if inputs.bbox.is_some()
            && (inputs.attribute.is_none() || inputs.attribute_selectivity > medium)
        {
            (PlanStrategy::BboxThenFull, self.bbox_then_full_steps(&inputs))
        } else if inputs.attribute.is_some() && inputs.bbox.is_some() && inputs.spatial.is_some() {
            (
                PlanStrategy::AttributeBboxSpatial,
                self.attribute_bbox_spatial_steps(&inputs),
            )
        } else {
            (PlanStrategy::Direct, self.direct_steps(&inputs))
        };

        if let Some(limit) = self.result_limit
            && !steps.is_empty()
        {
            steps.push(FilterStep {
                step_type: StepType::ResultLimit,
                expression: String::new(),
                priority: 0,
                estimated_selectivity: 1.0,
                requires_previous_ids: true,
                chunk_size: self.config.chunk_size,
                limit: Some(limit),
            });
        }
        for (idx, step) in steps.iter_mut().enumerate() {
            step.priority = idx as u32 + 1;
            step.requires_previous_ids = idx > 0;
        }

        let plan = FilterPlan {
            strategy,
            steps,
            estimated_row_count: rows,
            attribute_selectivity: inputs.attribute_selectivity,
            spatial_selectivity: inputs.spatial_selectivity,
        };
        tracing::debug!(
            rows,
            attribute_selectivity = inputs.attribute_selectivity,
            spatial_selectivity = inputs.spatial_selectivity,
            plan = %plan.summary(),
            "Filter plan built"
        );
        plan
    }

    fn inputs<'e>(
        &self,
        attribute: Option<&'e str>,
        spatial: Option<&'e str>,
        source_bbox: Option<&BoundingBox>,
    ) -> PlanInputs<'e> {
        let attribute = attribute.map(str::trim).filter(|e| !e.is_empty());
        let spatial = spatial.map(str::trim).filter(|e| !e.is_empty());
        let predicate = spatial.map(detect_predicate);

        // Features disjoint from the source are outside its box, so a box
        // prefilter would drop exactly the rows a disjoint test keeps
        let source_bbox = source_bbox
            .filter(|b| !b.is_empty())
            .filter(|_| predicate != Some(SpatialPredicate::Disjoint));

        let estimator = SelectivityEstimator::new(self.stats);
        let (attribute_selectivity, spatial_selectivity) =
            estimator.estimate_combined(attribute, spatial, source_bbox);
        let bbox_selectivity =
            source_bbox.map_or(1.0, |b| estimator.spatial(b, SpatialPredicate::Intersects));

        PlanInputs {
            attribute,
            spatial,
            bbox: source_bbox.map(|b| self.dialect.bbox_filter(&self.geometry_column, b)),
            attribute_selectivity,
            spatial_selectivity,
            bbox_selectivity,
        }
    }

    fn step(&self, step_type: StepType, expression: &str, selectivity: f64) -> FilterStep {
        FilterStep {
            step_type,
            expression: expression.to_string(),
            priority: 0,
            estimated_selectivity: selectivity,
            requires_previous_ids: false,
            chunk_size: self.config.chunk_size,
            limit: None,
        }
    }

    fn attribute_step(&self, inputs: &PlanInputs<'_>, expression: &str) -> FilterStep {
        self.step(
            StepType::AttributeFilter,
            expression,
            inputs.attribute_selectivity,
        )
    }

    fn bbox_step(&self, inputs: &PlanInputs<'_>, expression: &str) -> FilterStep {
        self.step(StepType::BboxPrefilter, expression, inputs.bbox_selectivity)
    }

    fn spatial_step(&self, inputs: &PlanInputs<'_>, expression: &str) -> FilterStep {
        // Conditional on the box having run, the exact test keeps a share
        // of the box candidates rather than of the whole table
        let selectivity = if inputs.bbox.is_some() && inputs.bbox_selectivity > 0.0 {
            (inputs.spatial_selectivity / inputs.bbox_selectivity).min(1.0)
        } else {
            inputs.spatial_selectivity
        };
        self.step(StepType::SpatialPredicate, expression, selectivity)
    }

    fn direct_steps(&self, inputs: &PlanInputs<'_>) -> Vec<FilterStep> {
        let parts: Vec<&str> = [inputs.attribute, inputs.bbox.as_deref(), inputs.spatial]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            return Vec::new();
        }
        let expression = combine_expressions(&parts, "AND");
        let selectivity = inputs.attribute_selectivity * inputs.spatial_selectivity;
        let step_type = if inputs.attribute.is_some() {
            StepType::AttributeFilter
        } else if inputs.spatial.is_some() {
            StepType::SpatialPredicate
        } else {
            StepType::BboxPrefilter
        };
        vec![self.step(step_type, &expression, selectivity)]
    }

    /// Attribute, then box and exact test while enough candidates remain
    ///
    /// A skipped exact test is folded into the attribute step. A skipped box
    /// is folded only when it is the sole spatial condition, since the exact
    /// test already implies it otherwise.
    fn attribute_first_steps(&self, inputs: &PlanInputs<'_>, rows: u64) -> Vec<FilterStep> {
        let min_candidates = self.config.min_candidates_for_step as f64;
        let mut folded: Vec<&str> = inputs.attribute.into_iter().collect();
        let mut remaining = rows as f64 * inputs.attribute_selectivity;
        let mut tail = Vec::new();

        if let Some(bbox) = inputs.bbox.as_deref() {
            if remaining > min_candidates {
                tail.push(self.bbox_step(inputs, bbox));
                remaining *= inputs.bbox_selectivity;
            } else if inputs.spatial.is_none() {
                folded.push(bbox);
            }
        }
        if let Some(spatial) = inputs.spatial {
            if remaining > min_candidates {
                tail.push(self.spatial_step(inputs, spatial));
            } else {
                folded.push(spatial);
            }
        }

        let expression = combine_expressions(&folded, "AND");
        let mut steps = vec![self.attribute_step(inputs, &expression)];
        if folded.len() > 1 {
            steps[0].estimated_selectivity *= inputs.spatial_selectivity;
        }
        steps.extend(tail);
        steps
    }

    fn bbox_then_full_steps(&self, inputs: &PlanInputs<'_>) -> Vec<FilterStep> {
        let mut steps = Vec::new();
        if let Some(bbox) = inputs.bbox.as_deref() {
            steps.push(self.bbox_step(inputs, bbox));
        }
        if let Some(attribute) = inputs.attribute {
            steps.push(self.attribute_step(inputs, attribute));
        }
        if let Some(spatial) = inputs.spatial {
            steps.push(self.spatial_step(inputs, spatial));
        }
        steps
    }

    /// The more restrictive of attribute and spatial runs first; the box
    /// always directly precedes the exact test it prefilters
    fn attribute_bbox_spatial_steps(&self, inputs: &PlanInputs<'_>) -> Vec<FilterStep> {
        let (Some(attribute), Some(bbox), Some(spatial)) =
            (inputs.attribute, inputs.bbox.as_deref(), inputs.spatial)
        else {
            return self.direct_steps(inputs);
        };
        let attribute_step = self.attribute_step(inputs, attribute);
        let bbox_step = self.bbox_step(inputs, bbox);
        let spatial_step = self.spatial_step(inputs, spatial);
        if inputs.attribute_selectivity <= inputs.spatial_selectivity {
            vec![attribute_step, bbox_step, spatial_step]
        } else {
            vec![bbox_step, spatial_step, attribute_step]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Backend;
    use crate::domain::optimizer::ColumnStats;

    const GEOM: &str = "\"geom\"";
    const SPATIAL: &str =
        "ST_Intersects(\"geom\", ST_GeomFromText('POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))', 4326))";

    fn layer(rows: u64) -> LayerStatistics {
        LayerStatistics::new("public.parcels", rows)
            .with_bounding_box(BoundingBox::new(0.0, 0.0, 100.0, 100.0).with_srid(4326))
    }

    fn build(
        stats: &LayerStatistics,
        attribute: Option<&str>,
        spatial: Option<&str>,
        bbox: Option<&BoundingBox>,
    ) -> FilterPlan {
        let config = OptimizerConfig::default();
        FilterPlanBuilder::new(stats, Backend::Postgres.dialect(), GEOM, &config)
            .build(attribute, spatial, bbox)
    }

    fn kinds(plan: &FilterPlan) -> Vec<StepType> {
        plan.steps.iter().map(|s| s.step_type).collect()
    }

    #[test]
    fn test_small_dataset_is_single_direct_step() {
        let stats = layer(5_000);
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0).with_srid(4326);
        let plan = build(&stats, Some("\"pop\" > 10"), Some(SPATIAL), Some(&bbox));
        assert_eq!(plan.strategy, PlanStrategy::Direct);
        assert_eq!(plan.steps.len(), 1);
        let expr = &plan.steps[0].expression;
        assert!(expr.contains("(\"pop\" > 10)"));
        assert!(expr.contains("\"geom\" && ST_MakeEnvelope(0, 0, 1, 1, 4326)"));
        assert!(expr.contains("ST_Intersects"));
        assert!(!plan.steps[0].requires_previous_ids);
    }

    #[test]
    fn test_selective_attribute_runs_first() {
        let stats = layer(1_000_000);
        let bbox = BoundingBox::new(0.0, 0.0, 50.0, 50.0).with_srid(4326);
        let plan = build(&stats, Some("\"code\" = 'A1'"), Some(SPATIAL), Some(&bbox));
        assert_eq!(plan.strategy, PlanStrategy::AttributeFirst);
        // 1M * 0.01 = 10k candidates, then 10k * 0.25 = 2.5k
        assert_eq!(
            kinds(&plan),
            vec![
                StepType::AttributeFilter,
                StepType::BboxPrefilter,
                StepType::SpatialPredicate
            ]
        );
        assert_eq!(plan.steps[0].priority, 1);
        assert!(plan.steps[1].requires_previous_ids);
    }

    #[test]
    fn test_attribute_first_folds_spatial_when_few_candidates() {
        let stats = layer(50_000).with_column(
            "code",
            ColumnStats {
                n_distinct: 1_000.0,
                null_fraction: 0.0,
            },
        );
        let bbox = BoundingBox::new(0.0, 0.0, 50.0, 50.0).with_srid(4326);
        let plan = build(&stats, Some("\"code\" = 'A1'"), Some(SPATIAL), Some(&bbox));
        assert_eq!(plan.strategy, PlanStrategy::AttributeFirst);
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].expression.contains("ST_Intersects"));
        assert!(!plan.steps[0].expression.contains("ST_MakeEnvelope"));
    }

    #[test]
    fn test_attribute_first_folds_lone_bbox() {
        let stats = layer(50_000);
        let bbox = BoundingBox::new(0.0, 0.0, 50.0, 50.0).with_srid(4326);
        let plan = build(&stats, Some("\"code\" = 'A1'"), None, Some(&bbox));
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].expression.contains("ST_MakeEnvelope"));
    }

    #[test]
    fn test_unselective_attribute_uses_bbox_first() {
        let stats = layer(200_000);
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0).with_srid(4326);
        let plan = build(&stats, Some("some_function(\"x\")"), Some(SPATIAL), Some(&bbox));
        assert_eq!(plan.strategy, PlanStrategy::BboxThenFull);
        assert_eq!(
            kinds(&plan),
            vec![
                StepType::BboxPrefilter,
                StepType::AttributeFilter,
                StepType::SpatialPredicate
            ]
        );
    }

    #[test]
    fn test_bbox_only_uses_bbox_first() {
        let stats = layer(200_000);
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0).with_srid(4326);
        let plan = build(&stats, None, Some(SPATIAL), Some(&bbox));
        assert_eq!(plan.strategy, PlanStrategy::BboxThenFull);
        assert_eq!(
            kinds(&plan),
            vec![StepType::BboxPrefilter, StepType::SpatialPredicate]
        );
    }

    #[test]
    fn test_medium_attribute_orders_by_restrictiveness() {
        let stats = layer(200_000);
        // 4 values -> 0.2, between the high and medium thresholds
        let attribute = "\"c\" IN (1, 2, 3, 4)";

        let small = BoundingBox::new(0.0, 0.0, 10.0, 10.0).with_srid(4326);
        let plan = build(&stats, Some(attribute), Some(SPATIAL), Some(&small));
        assert_eq!(plan.strategy, PlanStrategy::AttributeBboxSpatial);
        assert_eq!(
            kinds(&plan),
            vec![
                StepType::BboxPrefilter,
                StepType::SpatialPredicate,
                StepType::AttributeFilter
            ]
        );

        let large = BoundingBox::new(0.0, 0.0, 90.0, 90.0).with_srid(4326);
        let plan = build(&stats, Some(attribute), Some(SPATIAL), Some(&large));
        assert_eq!(plan.strategy, PlanStrategy::AttributeBboxSpatial);
        assert_eq!(
            kinds(&plan),
            vec![
                StepType::AttributeFilter,
                StepType::BboxPrefilter,
                StepType::SpatialPredicate
            ]
        );
    }

    #[test]
    fn test_fallback_direct_without_bbox() {
        let stats = layer(200_000);
        let plan = build(&stats, Some("\"c\" IN (1, 2, 3, 4)"), Some(SPATIAL), None);
        assert_eq!(plan.strategy, PlanStrategy::Direct);
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn test_disjoint_never_uses_bbox() {
        let stats = layer(200_000);
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0).with_srid(4326);
        let disjoint = "ST_Disjoint(\"geom\", ST_GeomFromText('POINT(1 1)', 4326))";
        let plan = build(&stats, None, Some(disjoint), Some(&bbox));
        assert!(plan.steps.iter().all(|s| s.step_type != StepType::BboxPrefilter));
        assert!(!plan.steps[0].expression.contains("ST_MakeEnvelope"));
    }

    #[test]
    fn test_no_predicates_gives_empty_plan() {
        let stats = layer(200_000);
        let plan = build(&stats, Some("  "), None, None);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_result_limit_step_appended() {
        let stats = layer(100);
        let config = OptimizerConfig::default();
        let plan = FilterPlanBuilder::new(&stats, Backend::Sqlite.dialect(), GEOM, &config)
            .with_result_limit(Some(10))
            .build(Some("\"a\" = 1"), None, None);
        assert_eq!(kinds(&plan), vec![StepType::AttributeFilter, StepType::ResultLimit]);
        assert_eq!(plan.steps[1].limit, Some(10));
        assert_eq!(plan.steps[1].priority, 2);
    }

    #[test]
    fn test_summary() {
        let stats = layer(100);
        let plan = build(&stats, Some("\"a\" = 1"), None, None);
        assert_eq!(plan.summary(), "direct: attribute_filter(0.010)");
        assert_eq!(plan.estimated_result_count(), 1);
    }
}
