//! Unified entry point for filtering any layer kind

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use super::{FilterPreview, FilterStrategy, FilterStrategyFactory, UnifiedFilterResult};
use crate::domain::criteria::{
    FilterCriteria, RasterFilterCriteria, RasterPredicate, VectorFilterCriteria,
    criteria_from_value,
};
use crate::domain::error::FilterError;
use crate::domain::execution::ProgressReporter;
use crate::domain::layer::ExportOptions;

/// Validates criteria, picks the strategy for the layer type and delegates
///
/// Every failure comes back as an error result; callers never see a raw
/// `FilterError` from `apply_filter` or `export`.
pub struct UnifiedFilterService {
    factory: Arc<FilterStrategyFactory>,
    active: Mutex<Option<Arc<dyn FilterStrategy>>>,
}

impl UnifiedFilterService {
    pub fn new(factory: Arc<FilterStrategyFactory>) -> Self {
        Self {
            factory,
            active: Mutex::new(None),
        }
    }

    pub fn factory(&self) -> &Arc<FilterStrategyFactory> {
        &self.factory
    }

    /// Strategy for validated criteria
    fn prepare(&self, criteria: &FilterCriteria) -> Result<Arc<dyn FilterStrategy>, FilterError> {
        criteria.validate()?;
        let strategy = self.factory.for_criteria(criteria)?;
        strategy.validate_criteria(criteria)?;
        Ok(strategy)
    }

    fn rejected(
        criteria: &FilterCriteria,
        error: &FilterError,
        started: Instant,
    ) -> UnifiedFilterResult {
        tracing::warn!(criteria = %criteria, error = %error, "Filter criteria rejected");
        UnifiedFilterResult::error(
            criteria.layer_id(),
            criteria.layer_type(),
            format!("{} [{}]", error, criteria),
            started,
        )
    }

    pub async fn apply_filter(
        &self,
        criteria: &FilterCriteria,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult {
        let started = Instant::now();
        let strategy = match self.prepare(criteria) {
            Ok(strategy) => strategy,
            Err(e) => return Self::rejected(criteria, &e, started),
        };

        tracing::debug!(criteria = %criteria, "Applying filter");
        *self.active.lock() = Some(strategy.clone());
        let result = strategy.apply_filter(criteria, progress).await;
        *self.active.lock() = None;
        result
    }

    pub async fn export(
        &self,
        criteria: &FilterCriteria,
        path: &Path,
        options: &ExportOptions,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult {
        let started = Instant::now();
        let strategy = match self.prepare(criteria) {
            Ok(strategy) => strategy,
            Err(e) => return Self::rejected(criteria, &e, started),
        };

        tracing::debug!(criteria = %criteria, path = %path.display(), "Exporting filtered layer");
        *self.active.lock() = Some(strategy.clone());
        let result = strategy.export(criteria, path, options, progress).await;
        *self.active.lock() = None;
        result
    }

    /// Describe the filter without applying it
    pub async fn preview(&self, criteria: &FilterCriteria) -> Result<FilterPreview, FilterError> {
        let strategy = self.prepare(criteria)?;
        strategy.get_preview(criteria).await
    }

    /// Cancel the running operation; false when nothing is running
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(strategy) => {
                strategy.cancel();
                tracing::info!(
                    layer_type = %strategy.supported_layer_type(),
                    "Filter cancellation requested"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|strategy| strategy.is_cancelled())
    }

    pub async fn filter_vector(
        &self,
        layer_id: &str,
        expression: &str,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult {
        let criteria = VectorFilterCriteria::new(layer_id, expression).into();
        self.apply_filter(&criteria, progress).await
    }

    pub async fn filter_raster_range(
        &self,
        layer_id: &str,
        band_index: i32,
        min_value: Option<f64>,
        max_value: Option<f64>,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult {
        let criteria = RasterFilterCriteria::new(layer_id, band_index)
            .with_range(min_value, max_value)
            .with_predicate(RasterPredicate::WithinRange)
            .into();
        self.apply_filter(&criteria, progress).await
    }

    /// Apply criteria given in their JSON wire form
    ///
    /// Malformed JSON is an `Err`; everything after parsing is reported in
    /// the result like `apply_filter`.
    pub async fn apply_filter_from_value(
        &self,
        value: &Value,
        progress: &ProgressReporter,
    ) -> Result<UnifiedFilterResult, FilterError> {
        let criteria = criteria_from_value(value)?;
        Ok(self.apply_filter(&criteria, progress).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::config::OptimizerConfig;
    use crate::domain::criteria::LayerType;
    use crate::domain::execution::FilterStatus;
    use crate::domain::expression::ProviderType;
    use crate::domain::layer::{LayerLookup, VectorLayer};
    use crate::domain::strategy::testing::{FakeLookup, FakeRasterLayer, FakeVectorLayer};

    struct Fixture {
        service: Arc<UnifiedFilterService>,
        roads: Arc<FakeVectorLayer>,
        dem: Arc<FakeRasterLayer>,
    }

    fn fixture() -> Fixture {
        let roads =
            Arc::new(FakeVectorLayer::new("roads", ProviderType::Ogr).with_feature_count(7));
        let dem = Arc::new(FakeRasterLayer::new(
            "dem",
            vec![vec![Some(1.0), Some(5.0), None, Some(12.0), Some(8.0)]],
        ));
        let lookup: Arc<dyn LayerLookup> =
            Arc::new(FakeLookup::default().with(roads.clone()).with(dem.clone()));
        let factory = Arc::new(FilterStrategyFactory::with_defaults(
            lookup,
            OptimizerConfig::default(),
        ));
        Fixture {
            service: Arc::new(UnifiedFilterService::new(factory)),
            roads,
            dem,
        }
    }

    #[tokio::test]
    async fn test_filter_vector_sets_subset() {
        let f = fixture();
        let result = f
            .service
            .filter_vector("roads", "\"lanes\" > 2", &ProgressReporter::none())
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(result.layer_type, LayerType::Vector);
        assert_eq!(result.affected_count, 7);
        assert_eq!(result.backend_name, "ogr");
        assert_eq!(f.roads.subset_string(), "\"lanes\" > 2");
    }

    #[tokio::test]
    async fn test_filter_raster_range_counts_pixels() {
        let f = fixture();
        let result = f
            .service
            .filter_raster_range("dem", 1, Some(4.0), Some(10.0), &ProgressReporter::none())
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(result.pixel_count, Some(2));
        assert_eq!(result.statistics["nodata_pixels"], 1);
        assert!(f.dem.exported().is_none());
    }

    #[tokio::test]
    async fn test_invalid_criteria_become_error_result() {
        let f = fixture();
        let criteria = RasterFilterCriteria::new("dem", 1).into();
        let result = f
            .service
            .apply_filter(&criteria, &ProgressReporter::none())
            .await;
        assert_eq!(result.status, FilterStatus::Error);
        let message = result.error_message.unwrap();
        assert!(message.starts_with("Invalid criteria:"), "{}", message);
        assert!(message.ends_with("[Raster[dem] band 1 within_range]"), "{}", message);
    }

    #[tokio::test]
    async fn test_strategy_validation_runs_before_apply() {
        let f = fixture();
        let result = f
            .service
            .filter_vector("roads", "\"lanes\" > (2", &ProgressReporter::none())
            .await;
        assert_eq!(result.status, FilterStatus::Error);
        assert!(
            result
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("Vector[roads]"))
        );
        assert_eq!(f.roads.subset_string(), "");
    }

    #[tokio::test]
    async fn test_unregistered_layer_type_is_error_result() {
        let f = fixture();
        f.service.factory().unregister(LayerType::Raster);
        let result = f
            .service
            .filter_raster_range("dem", 1, Some(0.0), None, &ProgressReporter::none())
            .await;
        assert_eq!(result.status, FilterStatus::Error);
        assert!(
            result
                .error_message
                .as_deref()
                .is_some_and(|m| m.starts_with("Unknown layer type: raster"))
        );
    }

    #[tokio::test]
    async fn test_export_delegates_to_strategy() {
        let f = fixture();
        let criteria = RasterFilterCriteria::new("dem", 1)
            .with_range(None, Some(5.0))
            .into();
        let result = f
            .service
            .export(
                &criteria,
                Path::new("/tmp/dem_low.tif"),
                &ExportOptions::default(),
                &ProgressReporter::none(),
            )
            .await;
        assert!(result.is_success(), "{:?}", result.error_message);
        let (path, band, keep) = f.dem.exported().unwrap();
        assert_eq!(path, Path::new("/tmp/dem_low.tif"));
        assert_eq!(band, 1);
        assert_eq!(keep, vec![true, true, false, false, false]);
    }

    #[tokio::test]
    async fn test_apply_filter_from_value() {
        let f = fixture();
        let value = json!({
            "layer_type": "vector",
            "layer_id": "roads",
            "expression": "\"name\" IS NOT NULL"
        });
        let result = f
            .service
            .apply_filter_from_value(&value, &ProgressReporter::none())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(f.roads.subset_string(), "\"name\" IS NOT NULL");

        let err = f
            .service
            .apply_filter_from_value(&json!({"layer_id": "roads"}), &ProgressReporter::none())
            .await
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidCriteria(_)));
    }

    #[tokio::test]
    async fn test_preview_does_not_apply() {
        let f = fixture();
        let criteria = VectorFilterCriteria::new("roads", "\"lanes\" > 2").into();
        let preview = f.service.preview(&criteria).await.unwrap();
        assert_eq!(preview.summary, "Vector[roads]: \"lanes\" > 2");
        assert_eq!(preview.details["subset"], "\"lanes\" > 2");
        assert_eq!(f.roads.subset_string(), "");

        let bad = VectorFilterCriteria::new("roads", "").into();
        assert!(f.service.preview(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_reaches_running_strategy() {
        let f = fixture();
        assert!(!f.service.cancel());
        assert!(!f.service.is_cancelled());

        let service = f.service.clone();
        let cancelled = Arc::new(Mutex::new(false));
        let seen = cancelled.clone();
        let progress = ProgressReporter::new(move |_, _| {
            let mut seen = seen.lock();
            if !*seen {
                *seen = service.cancel();
            }
        });
        let criteria = RasterFilterCriteria::new("dem", 1)
            .with_range(Some(0.0), None)
            .into();
        let result = f.service.apply_filter(&criteria, &progress).await;
        assert!(*cancelled.lock());
        assert_eq!(result.status, FilterStatus::Cancelled);
        assert!(!f.service.is_cancelled());
    }
}
