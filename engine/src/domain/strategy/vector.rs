//! Vector layer filtering
//!
//! Criteria are turned into an attribute fragment and a spatial fragment in
//! the layer provider's SQL. Layers backed by a SQL table run both through a
//! [`QueryOptimizer`] and receive a primary key subset; every other layer
//! receives the combined fragment as its subset string.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::{CancellationState, FilterPreview, FilterStrategy, UnifiedFilterResult, vector_of};
use crate::core::config::OptimizerConfig;
use crate::core::constants::DEFAULT_GEOMETRY_COLUMN;
use crate::data::QueryConnection;
use crate::domain::criteria::{FilterCriteria, LayerType, VectorFilterCriteria};
use crate::domain::error::FilterError;
use crate::domain::execution::{FilterStatus, ProgressReporter};
use crate::domain::expression::{
    BoundingBox, ProviderType, SpatialPredicate, combine_expressions, sanitize_subset_string,
    spatial_predicate_sql, srid_from_authid, to_sql, validate,
};
use crate::domain::layer::{ExportOptions, FeatureSelection, LayerHandle, LayerLookup};
use crate::domain::optimizer::{QueryOptimizer, TableRef};

/// SQL fragments derived from vector criteria
struct VectorFilter {
    provider: ProviderType,
    attribute: Option<String>,
    spatial: Option<String>,
    source_bbox: Option<BoundingBox>,
}

impl VectorFilter {
    fn combined(&self) -> String {
        let parts: Vec<&str> = [self.attribute.as_deref(), self.spatial.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        combine_expressions(&parts, "AND")
    }
}

/// Subset ready to be applied to, or exported from, a layer
struct ComputedSubset {
    subset: String,
    feature_ids: Option<Vec<i64>>,
    backend_name: String,
    statistics: Map<String, Value>,
}

pub struct VectorFilterStrategy {
    layers: Arc<dyn LayerLookup>,
    config: OptimizerConfig,
    /// One optimizer per layer so table statistics are fetched once
    optimizers: RwLock<HashMap<String, Arc<QueryOptimizer>>>,
    cancel: CancellationState,
}

impl VectorFilterStrategy {
    pub fn new(layers: Arc<dyn LayerLookup>, config: OptimizerConfig) -> Self {
        Self {
            layers,
            config,
            optimizers: RwLock::new(HashMap::new()),
            cancel: CancellationState::default(),
        }
    }

    fn resolve(&self, layer_id: &str) -> Result<Arc<dyn LayerHandle>, FilterError> {
        let handle = self
            .layers
            .layer(layer_id)
            .ok_or_else(|| FilterError::LayerNotFound(layer_id.to_string()))?;
        vector_of(handle.as_ref())?;
        Ok(handle)
    }

    fn optimizer_for(
        &self,
        layer_id: &str,
        table: TableRef,
        conn: Arc<dyn QueryConnection>,
    ) -> Arc<QueryOptimizer> {
        if let Some(existing) = self.optimizers.read().get(layer_id)
            && existing.table() == &table
        {
            return existing.clone();
        }
        let optimizer = Arc::new(QueryOptimizer::new(conn, table, self.config.clone()));
        self.optimizers
            .write()
            .insert(layer_id.to_string(), optimizer.clone());
        optimizer
    }

    fn build_filter(
        &self,
        handle: &dyn LayerHandle,
        criteria: &VectorFilterCriteria,
    ) -> Result<VectorFilter, FilterError> {
        let vector = vector_of(handle)?;
        let provider = handle.provider();
        let dialect = provider
            .dialect()
            .ok_or_else(|| FilterError::UnsupportedProvider(provider.to_string()))?;
        let geometry_column = vector
            .source()
            .map(|t| t.geometry_column)
            .unwrap_or_else(|| DEFAULT_GEOMETRY_COLUMN.to_string());

        let attribute = match clean_expression(criteria) {
            Some(expression) => {
                let warnings = validate(&expression).into_result()?;
                if !warnings.is_empty() {
                    tracing::debug!(
                        layer_id = %criteria.layer_id,
                        ?warnings,
                        "Expression warnings"
                    );
                }
                Some(to_sql(&expression, provider, &geometry_column)?)
            }
            None => None,
        };

        let (spatial, source_bbox) = match (criteria.spatial_predicate, &criteria.source_layer_id) {
            (Some(predicate), Some(source_id)) if criteria.has_spatial() => {
                let source = self
                    .layers
                    .layer(source_id)
                    .ok_or_else(|| FilterError::LayerNotFound(source_id.clone()))?;
                let source_vector = vector_of(source.as_ref())?;
                let selection = if criteria.use_selection {
                    FeatureSelection::Selected
                } else {
                    FeatureSelection::All
                };

                let geometries = source_vector.geometry_wkt(&selection)?;
                let wkt = match geometries.as_slice() {
                    [] => {
                        return Err(FilterError::InvalidCriteria(format!(
                            "Source layer '{}' has no {}features",
                            source_id,
                            if criteria.use_selection { "selected " } else { "" }
                        )));
                    }
                    [single] => single.clone(),
                    many => format!("GEOMETRYCOLLECTION({})", many.join(", ")),
                };

                let target_crs = handle.crs();
                let source_crs = source.crs();
                let same_crs = target_crs == source_crs;
                let target_srid = target_crs.as_deref().and_then(srid_from_authid);
                let source_srid = source_crs.as_deref().and_then(srid_from_authid);

                let mut source_sql = dialect.geom_from_wkt(&wkt, source_srid);
                if !same_crs
                    && let (Some(source), Some(target)) = (source_srid, target_srid)
                {
                    source_sql = dialect.transform(&source_sql, source, target);
                }

                let buffer = (criteria.buffer_value > 0.0).then_some(criteria.buffer_value);
                let sql = spatial_predicate_sql(
                    predicate,
                    provider,
                    &geometry_column,
                    &source_sql,
                    buffer,
                )?;

                // The source extent is only comparable in the layer's own CRS
                let bbox = if same_crs && predicate != SpatialPredicate::Disjoint {
                    source_vector.geometry_extent(&selection).map(|extent| {
                        let extent = extent.expand(criteria.buffer_value);
                        match target_srid {
                            Some(srid) => extent.with_srid(srid),
                            None => extent,
                        }
                    })
                } else {
                    None
                };
                (Some(sql), bbox)
            }
            _ => (None, None),
        };

        tracing::trace!(
            layer_id = %criteria.layer_id,
            provider = %provider,
            attribute = ?attribute,
            spatial = ?spatial,
            "Vector filter translated"
        );

        Ok(VectorFilter {
            provider,
            attribute,
            spatial,
            source_bbox,
        })
    }

    async fn compute_subset(
        &self,
        handle: &dyn LayerHandle,
        criteria: &VectorFilterCriteria,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ComputedSubset, FilterError> {
        let vector = vector_of(handle)?;
        progress.report(0, "Preparing filter");
        let filter = self.build_filter(handle, criteria)?;
        if cancel.is_cancelled() {
            return Err(FilterError::Cancelled);
        }

        if filter.provider.is_sql_backed()
            && let (Some(table), Some(conn)) = (vector.source(), vector.connection())
        {
            let optimizer = self.optimizer_for(handle.id(), table, conn);
            let result = optimizer
                .filter_optimal(
                    filter.attribute.as_deref(),
                    filter.spatial.as_deref(),
                    filter.source_bbox.as_ref(),
                    &progress.scaled(5, 95),
                    cancel,
                )
                .await;
            match result.status {
                FilterStatus::Success => {}
                FilterStatus::Cancelled => return Err(FilterError::Cancelled),
                FilterStatus::Error => {
                    return Err(FilterError::Execution(
                        result
                            .error_message
                            .unwrap_or_else(|| "Filter plan failed".to_string()),
                    ));
                }
            }

            let primary_key = optimizer
                .table()
                .quoted_primary_key(optimizer.backend().dialect());
            let mut statistics = Map::new();
            statistics.insert("strategy".into(), json!(result.strategy.as_str()));
            statistics.insert("initial_count".into(), json!(result.initial_count));
            statistics.insert("steps".into(), json!(result.steps.len()));
            statistics.insert(
                "reduction_ratio".into(),
                json!(result.overall_reduction_ratio),
            );
            return Ok(ComputedSubset {
                subset: id_subset(&primary_key, &result.feature_ids),
                feature_ids: Some(result.feature_ids),
                backend_name: optimizer.backend_name().to_string(),
                statistics,
            });
        }

        Ok(ComputedSubset {
            subset: filter.combined(),
            feature_ids: None,
            backend_name: filter.provider.as_str().to_string(),
            statistics: Map::new(),
        })
    }

    async fn run_filter(
        &self,
        criteria: &FilterCriteria,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<UnifiedFilterResult, FilterError> {
        let criteria = vector_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let vector = vector_of(handle.as_ref())?;

        let computed = self
            .compute_subset(handle.as_ref(), criteria, progress, cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(FilterError::Cancelled);
        }
        vector.set_subset_string(&computed.subset)?;

        let affected_count = match &computed.feature_ids {
            Some(ids) => ids.len() as u64,
            None => vector.feature_count(),
        };
        progress.report(100, "Filter applied");
        tracing::info!(
            layer_id = %criteria.layer_id,
            backend = %computed.backend_name,
            affected_count,
            "Vector filter applied"
        );

        Ok(UnifiedFilterResult::vector_success(
            &criteria.layer_id,
            affected_count,
            computed.feature_ids,
            started,
        )
        .with_backend(computed.backend_name)
        .with_statistics(computed.statistics))
    }

    async fn run_export(
        &self,
        criteria: &FilterCriteria,
        path: &Path,
        options: &ExportOptions,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<UnifiedFilterResult, FilterError> {
        let criteria = vector_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let vector = vector_of(handle.as_ref())?;

        let computed = self
            .compute_subset(handle.as_ref(), criteria, &progress.scaled(0, 80), cancel)
            .await?;
        if cancel.is_cancelled() {
            return Err(FilterError::Cancelled);
        }
        progress.report(80, "Writing features");
        let written = vector
            .export_features(path, options, &computed.subset)
            .await?;
        progress.report(100, "Export complete");
        tracing::info!(
            layer_id = %criteria.layer_id,
            path = %path.display(),
            written,
            "Vector layer exported"
        );

        let mut result = UnifiedFilterResult::vector_success(
            &criteria.layer_id,
            written,
            computed.feature_ids,
            started,
        )
        .with_backend(computed.backend_name)
        .with_statistics(computed.statistics)
        .with_statistic("output_path", path.display().to_string());
        if let Some(format) = &options.format {
            result = result.with_statistic("format", format.as_str());
        }
        Ok(result)
    }
}

#[async_trait]
impl FilterStrategy for VectorFilterStrategy {
    fn supported_layer_type(&self) -> LayerType {
        LayerType::Vector
    }

    fn validate_criteria(&self, criteria: &FilterCriteria) -> Result<(), FilterError> {
        let criteria = vector_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let provider = handle.provider();
        if provider.dialect().is_none() {
            return Err(FilterError::UnsupportedProvider(provider.to_string()));
        }
        if let Some(expression) = clean_expression(criteria) {
            validate(&expression).into_result()?;
        }
        if criteria.has_spatial()
            && let Some(source_id) = &criteria.source_layer_id
        {
            let source = self
                .layers
                .layer(source_id)
                .ok_or_else(|| FilterError::LayerNotFound(source_id.clone()))?;
            vector_of(source.as_ref())?;
        }
        Ok(())
    }

    async fn apply_filter(
        &self,
        criteria: &FilterCriteria,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult {
        let started = Instant::now();
        let cancel = self.cancel.begin();
        match self.run_filter(criteria, progress, &cancel, started).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(layer_id = %criteria.layer_id(), error = %e, "Vector filter failed");
                UnifiedFilterResult::from_error(criteria.layer_id(), LayerType::Vector, &e, started)
            }
        }
    }

    async fn get_preview(&self, criteria: &FilterCriteria) -> Result<FilterPreview, FilterError> {
        let criteria = vector_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let vector = vector_of(handle.as_ref())?;
        let filter = self.build_filter(handle.as_ref(), criteria)?;

        let mut details = Map::new();
        details.insert("provider".into(), json!(filter.provider.as_str()));
        if let Some(attribute) = &filter.attribute {
            details.insert("attribute_sql".into(), json!(attribute));
        }
        if let Some(spatial) = &filter.spatial {
            details.insert("spatial_sql".into(), json!(spatial));
        }
        if let Some(bbox) = &filter.source_bbox {
            details.insert("source_bbox".into(), json!(bbox));
        }

        let mut estimated_count = None;
        if filter.provider.is_sql_backed()
            && let (Some(table), Some(conn)) = (vector.source(), vector.connection())
        {
            let optimizer = self.optimizer_for(handle.id(), table, conn);
            let plan = optimizer
                .plan(
                    filter.attribute.as_deref(),
                    filter.spatial.as_deref(),
                    filter.source_bbox.as_ref(),
                    None,
                )
                .await?;
            details.insert("strategy".into(), json!(plan.strategy.as_str()));
            details.insert("plan".into(), json!(plan.summary()));
            details.insert("estimated_row_count".into(), json!(plan.estimated_row_count));
            estimated_count = Some(plan.estimated_result_count());
        } else {
            details.insert("subset".into(), json!(filter.combined()));
        }

        Ok(FilterPreview {
            layer_id: criteria.layer_id.clone(),
            layer_type: LayerType::Vector,
            summary: criteria.to_string(),
            estimated_count,
            details,
        })
    }

    async fn export(
        &self,
        criteria: &FilterCriteria,
        path: &Path,
        options: &ExportOptions,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult {
        let started = Instant::now();
        let cancel = self.cancel.begin();
        match self
            .run_export(criteria, path, options, progress, &cancel, started)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(layer_id = %criteria.layer_id(), error = %e, "Vector export failed");
                UnifiedFilterResult::from_error(criteria.layer_id(), LayerType::Vector, &e, started)
            }
        }
    }

    fn cancel(&self) {
        tracing::debug!("Vector filter cancellation requested");
        self.cancel.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn vector_criteria(criteria: &FilterCriteria) -> Result<&VectorFilterCriteria, FilterError> {
    match criteria {
        FilterCriteria::Vector(c) => Ok(c),
        other => Err(FilterError::InvalidCriteria(format!(
            "Vector strategy cannot handle {} criteria",
            other.layer_type()
        ))),
    }
}

/// Sanitized expression, `None` when nothing filterable is left
fn clean_expression(criteria: &VectorFilterCriteria) -> Option<String> {
    if !criteria.has_expression() {
        return None;
    }
    let cleaned = sanitize_subset_string(&criteria.expression);
    (!cleaned.trim().is_empty()).then_some(cleaned)
}

/// `pk IN (...)` over the surviving ids; an empty set matches nothing
fn id_subset(primary_key: &str, ids: &[i64]) -> String {
    if ids.is_empty() {
        return "1 = 0".to_string();
    }
    let list: Vec<String> = ids.iter().map(i64::to_string).collect();
    format!("{} IN ({})", primary_key, list.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use crate::domain::layer::VectorLayer;
    use crate::domain::strategy::testing::{FakeLookup, FakeVectorLayer, parcels_connection};

    const SQUARE: &str = "POLYGON((0 0, 1 0, 1 1, 0 1, 0 0))";

    async fn sql_layer() -> Arc<FakeVectorLayer> {
        Arc::new(
            FakeVectorLayer::new("parcels", ProviderType::Spatialite).with_source(
                TableRef::new("parcels", "geom", "fid"),
                parcels_connection().await,
            ),
        )
    }

    fn strategy(lookup: FakeLookup) -> VectorFilterStrategy {
        VectorFilterStrategy::new(Arc::new(lookup), OptimizerConfig::default())
    }

    #[tokio::test]
    async fn test_sql_layer_receives_id_subset() {
        let layer = sql_layer().await;
        let strategy = strategy(FakeLookup::default().with(layer.clone()));
        let criteria = VectorFilterCriteria::new("parcels", "\"zone\" = 'commercial'").into();

        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(result.affected_count, 10);
        assert_eq!(
            result.feature_ids.as_deref(),
            Some(&[5, 10, 15, 20, 25, 30, 35, 40, 45, 50][..])
        );
        assert_eq!(result.backend_name, "sqlite");
        assert_eq!(result.statistics["strategy"], "direct");
        assert_eq!(
            layer.subset_string(),
            "\"fid\" IN (5,10,15,20,25,30,35,40,45,50)"
        );
    }

    #[tokio::test]
    async fn test_no_match_subset_matches_nothing() {
        let layer = sql_layer().await;
        let strategy = strategy(FakeLookup::default().with(layer.clone()));
        let criteria = VectorFilterCriteria::new("parcels", "\"zone\" = 'industrial'").into();

        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert!(result.is_success());
        assert_eq!(result.affected_count, 0);
        assert_eq!(layer.subset_string(), "1 = 0");
    }

    #[tokio::test]
    async fn test_file_layer_receives_expression() {
        let layer =
            Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr).with_feature_count(7));
        let strategy = strategy(FakeLookup::default().with(layer.clone()));
        let criteria = VectorFilterCriteria::new("roads", "\"name\" = 'x'").into();

        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert!(result.is_success());
        assert_eq!(result.feature_ids, None);
        assert_eq!(result.affected_count, 7);
        assert_eq!(result.backend_name, "ogr");
        assert_eq!(layer.subset_string(), "\"name\" = 'x'");
    }

    #[tokio::test]
    async fn test_spatial_predicate_from_source_layer() {
        let roads = Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr));
        let zones = Arc::new(
            FakeVectorLayer::new("zones", ProviderType::Ogr)
                .with_geometries(vec![SQUARE.to_string()], BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
        );
        let strategy = strategy(FakeLookup::default().with(roads.clone()).with(zones));

        let criteria = VectorFilterCriteria::new("roads", "")
            .with_spatial(SpatialPredicate::Intersects, "zones")
            .into();
        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(
            roads.subset_string(),
            format!("intersects($geometry, geom_from_wkt('{}'))", SQUARE)
        );

        let criteria = VectorFilterCriteria::new("roads", "\"lanes\" > 2")
            .with_spatial(SpatialPredicate::Within, "zones")
            .with_buffer(10.0)
            .into();
        strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert_eq!(
            roads.subset_string(),
            format!(
                "(\"lanes\" > 2) AND (within($geometry, buffer(geom_from_wkt('{}'), 10, 5)))",
                SQUARE
            )
        );
    }

    #[tokio::test]
    async fn test_file_layer_transforms_source_in_other_crs() {
        let roads = Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr));
        let zones = Arc::new(
            FakeVectorLayer::new("zones", ProviderType::Ogr)
                .with_crs(Some("EPSG:4326"))
                .with_geometries(vec![SQUARE.to_string()], BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
        );
        let strategy = strategy(FakeLookup::default().with(roads.clone()).with(zones));
        let criteria = VectorFilterCriteria::new("roads", "")
            .with_spatial(SpatialPredicate::Intersects, "zones")
            .into();

        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(
            roads.subset_string(),
            format!(
                "intersects($geometry, transform(geom_from_wkt('{}'), 'EPSG:4326', 'EPSG:3857'))",
                SQUARE
            )
        );
    }

    #[tokio::test]
    async fn test_multiple_source_geometries_are_collected() {
        let roads = Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr));
        let zones = Arc::new(FakeVectorLayer::new("zones", ProviderType::Ogr).with_geometries(
            vec!["POINT(0 0)".to_string(), "POINT(1 1)".to_string()],
            BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        ));
        let strategy = strategy(FakeLookup::default().with(roads.clone()).with(zones));
        let criteria = VectorFilterCriteria::new("roads", "")
            .with_spatial(SpatialPredicate::Touches, "zones")
            .into();

        strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert!(
            roads
                .subset_string()
                .contains("GEOMETRYCOLLECTION(POINT(0 0), POINT(1 1))")
        );
    }

    #[tokio::test]
    async fn test_selection_without_selected_features_fails() {
        let roads = Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr));
        let zones = Arc::new(
            FakeVectorLayer::new("zones", ProviderType::Ogr)
                .with_geometries(vec![SQUARE.to_string()], BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
        );
        let strategy = strategy(FakeLookup::default().with(roads).with(zones));
        let criteria = VectorFilterCriteria::new("roads", "")
            .with_spatial(SpatialPredicate::Intersects, "zones")
            .with_selection(true)
            .into();

        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert_eq!(result.status, FilterStatus::Error);
        assert!(
            result
                .error_message
                .unwrap()
                .contains("has no selected features")
        );
    }

    #[tokio::test]
    async fn test_missing_layer_is_error_result() {
        let strategy = strategy(FakeLookup::default());
        let criteria = VectorFilterCriteria::new("nowhere", "\"a\" = 1").into();
        let result = strategy
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert_eq!(result.status, FilterStatus::Error);
        assert_eq!(result.error_message.as_deref(), Some("Layer not found: nowhere"));
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_expression_and_provider() {
        let roads = Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr));
        let odd = Arc::new(FakeVectorLayer::new("odd", ProviderType::Unknown));
        let strategy = strategy(FakeLookup::default().with(roads).with(odd));

        let bad = VectorFilterCriteria::new("roads", "(\"a\" = 1").into();
        assert!(matches!(
            strategy.validate_criteria(&bad),
            Err(FilterError::InvalidExpression { .. })
        ));
        let unknown = VectorFilterCriteria::new("odd", "\"a\" = 1").into();
        assert!(matches!(
            strategy.validate_criteria(&unknown),
            Err(FilterError::UnsupportedProvider(_))
        ));
        let good = VectorFilterCriteria::new("roads", "\"a\" = 1").into();
        assert!(strategy.validate_criteria(&good).is_ok());
    }

    #[tokio::test]
    async fn test_preview_reports_plan_without_applying() {
        let layer = sql_layer().await;
        let strategy = strategy(FakeLookup::default().with(layer.clone()));
        let criteria = VectorFilterCriteria::new("parcels", "\"zone\" = 'commercial'").into();

        let preview = strategy.get_preview(&criteria).await.unwrap();
        assert_eq!(preview.details["strategy"], "direct");
        assert_eq!(preview.details["estimated_row_count"], 50);
        // Equality without column statistics estimates 1%
        assert_eq!(preview.estimated_count, Some(1));
        assert_eq!(layer.subset_string(), "");
    }

    #[tokio::test]
    async fn test_preview_transforms_source_in_other_crs() {
        let layer = sql_layer().await;
        let zones = Arc::new(
            FakeVectorLayer::new("zones", ProviderType::Ogr)
                .with_crs(Some("EPSG:4326"))
                .with_geometries(vec![SQUARE.to_string()], BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
        );
        let strategy = strategy(FakeLookup::default().with(layer).with(zones));
        let criteria = VectorFilterCriteria::new("parcels", "")
            .with_spatial(SpatialPredicate::Intersects, "zones")
            .into();

        let preview = strategy.get_preview(&criteria).await.unwrap();
        assert_eq!(
            preview.details["spatial_sql"],
            format!(
                "ST_Intersects(\"geom\", ST_Transform(GeomFromText('{}', 4326), 3857)) = 1",
                SQUARE
            )
        );
        assert!(preview.details.get("source_bbox").is_none());
    }

    #[tokio::test]
    async fn test_preview_uses_selected_extent_in_same_crs() {
        let layer = sql_layer().await;
        let zones = Arc::new(
            FakeVectorLayer::new("zones", ProviderType::Ogr)
                .with_geometries(
                    vec!["POINT(0 0)".to_string(), "POINT(5 5)".to_string()],
                    BoundingBox::new(0.0, 0.0, 5.0, 5.0),
                )
                .with_selected(vec![1]),
        );
        let strategy = strategy(FakeLookup::default().with(layer).with(zones));
        let criteria = VectorFilterCriteria::new("parcels", "")
            .with_spatial(SpatialPredicate::Dwithin, "zones")
            .with_buffer(2.0)
            .with_selection(true)
            .into();

        let preview = strategy.get_preview(&criteria).await.unwrap();
        assert_eq!(
            preview.details["spatial_sql"],
            "ST_Distance(\"geom\", GeomFromText('POINT(5 5)', 3857)) <= 2"
        );
        assert_eq!(preview.details["source_bbox"]["xmin"], -2.0);
        assert_eq!(preview.details["source_bbox"]["srid"], 3857);
    }

    #[tokio::test]
    async fn test_export_writes_subset_without_changing_layer() {
        let layer = sql_layer().await;
        let strategy = strategy(FakeLookup::default().with(layer.clone()));
        let criteria = VectorFilterCriteria::new("parcels", "\"area\" > 450").into();
        let options = ExportOptions {
            format: Some("GPKG".into()),
            ..Default::default()
        };

        let result = strategy
            .export(
                &criteria,
                Path::new("/tmp/out.gpkg"),
                &options,
                &ProgressReporter::none(),
            )
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(result.statistics["format"], "GPKG");
        assert_eq!(
            layer.exported(),
            vec![(
                PathBuf::from("/tmp/out.gpkg"),
                "\"fid\" IN (46,47,48,49,50)".to_string()
            )]
        );
        assert_eq!(layer.subset_string(), "");
    }

    #[tokio::test]
    async fn test_cancel_from_progress_callback() {
        let layer = sql_layer().await;
        let strategy = Arc::new(strategy(FakeLookup::default().with(layer.clone())));
        let handle = strategy.clone();
        let progress = ProgressReporter::new(move |_, _| handle.cancel());
        let criteria = VectorFilterCriteria::new("parcels", "\"zone\" = 'commercial'").into();

        let result = strategy.apply_filter(&criteria, &progress).await;
        assert_eq!(result.status, FilterStatus::Cancelled);
        assert!(strategy.is_cancelled());
        assert_eq!(layer.subset_string(), "");
    }

    #[test]
    fn test_id_subset() {
        assert_eq!(id_subset("\"fid\"", &[]), "1 = 0");
        assert_eq!(id_subset("\"fid\"", &[3, 9]), "\"fid\" IN (3,9)");
    }
}
