//! Raster layer filtering
//!
//! Band values come from the host as a flat pixel vector. Each pixel is
//! tested against the criteria's value condition and optional mask, in
//! chunks so a cancel request is noticed on large rasters.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::{CancellationState, FilterPreview, FilterStrategy, UnifiedFilterResult, vector_of};
use crate::core::constants::RASTER_CHUNK_PIXELS;
use crate::domain::criteria::{FilterCriteria, LayerType, RasterFilterCriteria, RasterPredicate};
use crate::domain::error::FilterError;
use crate::domain::execution::ProgressReporter;
use crate::domain::layer::{ExportOptions, FeatureSelection, LayerHandle, LayerLookup, RasterLayer};

/// Outcome of testing every pixel of a band
#[derive(Debug, Default)]
struct PixelEvaluation {
    keep: Vec<bool>,
    matched: u64,
    /// Matches carrying a value
    valued: u64,
    nodata: u64,
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
}

impl PixelEvaluation {
    fn record(&mut self, value: Option<f64>, matched: bool) {
        self.keep.push(matched);
        if value.is_none() {
            self.nodata += 1;
        }
        if !matched {
            return;
        }
        self.matched += 1;
        if let Some(v) = value {
            self.valued += 1;
            self.sum += v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    fn statistics(&self, criteria: &RasterFilterCriteria) -> Map<String, Value> {
        let mut stats = Map::new();
        stats.insert("band".into(), json!(criteria.band_index));
        stats.insert("predicate".into(), json!(criteria.predicate.as_str()));
        stats.insert("total_pixels".into(), json!(self.keep.len()));
        stats.insert("nodata_pixels".into(), json!(self.nodata));
        if let (Some(min), Some(max)) = (self.min, self.max) {
            stats.insert("min".into(), json!(min));
            stats.insert("max".into(), json!(max));
        }
        if let Some(mean) = self.mean() {
            stats.insert("mean".into(), json!(mean));
        }
        if let Some(mask) = &criteria.mask_layer_id {
            stats.insert("mask_layer_id".into(), json!(mask));
        }
        stats
    }

    fn mean(&self) -> Option<f64> {
        (self.valued > 0).then(|| self.sum / self.valued as f64)
    }
}

pub struct RasterFilterStrategy {
    layers: Arc<dyn LayerLookup>,
    chunk_pixels: usize,
    cancel: CancellationState,
}

impl RasterFilterStrategy {
    pub fn new(layers: Arc<dyn LayerLookup>) -> Self {
        Self {
            layers,
            chunk_pixels: RASTER_CHUNK_PIXELS,
            cancel: CancellationState::default(),
        }
    }

    /// Pixels evaluated between cancellation checks
    pub fn with_chunk_pixels(mut self, chunk_pixels: usize) -> Self {
        self.chunk_pixels = chunk_pixels.max(1);
        self
    }

    fn resolve(&self, layer_id: &str) -> Result<Arc<dyn LayerHandle>, FilterError> {
        let handle = self
            .layers
            .layer(layer_id)
            .ok_or_else(|| FilterError::LayerNotFound(layer_id.to_string()))?;
        raster_of(handle.as_ref())?;
        Ok(handle)
    }

    fn check_band(
        &self,
        raster: &dyn RasterLayer,
        criteria: &RasterFilterCriteria,
    ) -> Result<(), FilterError> {
        let band_count = raster.band_count();
        if criteria.band_index > band_count {
            return Err(FilterError::InvalidCriteria(format!(
                "band_index {} exceeds the {} band(s) of layer '{}'",
                criteria.band_index, band_count, criteria.layer_id
            )));
        }
        Ok(())
    }

    /// Per-pixel inside flags for the mask layer's geometries
    fn mask_for(
        &self,
        raster: &dyn RasterLayer,
        criteria: &RasterFilterCriteria,
        pixels: usize,
    ) -> Result<Option<Vec<bool>>, FilterError> {
        let Some(mask_id) = criteria.mask_layer_id.as_deref().filter(|_| criteria.has_mask()) else {
            return Ok(None);
        };
        let mask_layer = self
            .layers
            .layer(mask_id)
            .ok_or_else(|| FilterError::LayerNotFound(mask_id.to_string()))?;
        let selection = criteria
            .mask_feature_ids
            .clone()
            .map_or(FeatureSelection::All, FeatureSelection::Ids);
        let geometries = vector_of(mask_layer.as_ref())?.geometry_wkt(&selection)?;
        if geometries.is_empty() {
            return Err(FilterError::InvalidCriteria(format!(
                "Mask layer '{}' has no features to mask with",
                mask_id
            )));
        }

        let mask = raster.mask_pixels(&geometries)?;
        if mask.len() != pixels {
            return Err(FilterError::Host(format!(
                "mask covers {} pixels but band has {}",
                mask.len(),
                pixels
            )));
        }
        Ok(Some(mask))
    }

    fn evaluate(
        &self,
        raster: &dyn RasterLayer,
        criteria: &RasterFilterCriteria,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<PixelEvaluation, FilterError> {
        self.check_band(raster, criteria)?;
        let values = raster.band_values(criteria.band_index)?;
        let mask = self.mask_for(raster, criteria, values.len())?;
        let total = values.len().max(1);

        let mut evaluation = PixelEvaluation {
            keep: Vec::with_capacity(values.len()),
            ..Default::default()
        };
        for (chunk_idx, chunk) in values.chunks(self.chunk_pixels).enumerate() {
            if cancel.is_cancelled() {
                return Err(FilterError::Cancelled);
            }
            let offset = chunk_idx * self.chunk_pixels;
            for (i, value) in chunk.iter().enumerate() {
                let inside = mask
                    .as_ref()
                    .is_none_or(|m| m.get(offset + i).copied().unwrap_or(false));
                evaluation.record(*value, inside && pixel_matches(criteria, *value));
            }
            let done = offset + chunk.len();
            progress.report((done * 100 / total) as u8, "Evaluating pixels");
        }

        tracing::debug!(
            layer_id = %criteria.layer_id,
            band = criteria.band_index,
            pixels = values.len(),
            matched = evaluation.matched,
            "Raster pixels evaluated"
        );
        Ok(evaluation)
    }

    fn run_filter(
        &self,
        criteria: &FilterCriteria,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<UnifiedFilterResult, FilterError> {
        let criteria = raster_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let raster = raster_of(handle.as_ref())?;
        let evaluation = self.evaluate(raster, criteria, progress, cancel)?;
        if cancel.is_cancelled() {
            return Err(FilterError::Cancelled);
        }

        tracing::info!(
            layer_id = %criteria.layer_id,
            matched = evaluation.matched,
            "Raster filter applied"
        );
        Ok(
            UnifiedFilterResult::raster_success(&criteria.layer_id, evaluation.matched, started)
                .with_backend(handle.provider().as_str())
                .with_statistics(evaluation.statistics(criteria)),
        )
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
        let criteria = raster_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let raster = raster_of(handle.as_ref())?;
        let evaluation = self.evaluate(raster, criteria, &progress.scaled(0, 80), cancel)?;
        if cancel.is_cancelled() {
            return Err(FilterError::Cancelled);
        }

        progress.report(80, "Writing raster");
        let written = raster
            .export_masked(path, criteria.band_index, &evaluation.keep, options)
            .await?;
        progress.report(100, "Export complete");
        tracing::info!(
            layer_id = %criteria.layer_id,
            path = %path.display(),
            written,
            "Raster layer exported"
        );

        Ok(
            UnifiedFilterResult::raster_success(&criteria.layer_id, evaluation.matched, started)
                .with_backend(handle.provider().as_str())
                .with_statistics(evaluation.statistics(criteria))
                .with_statistic("output_path", path.display().to_string())
                .with_statistic("written_pixels", written),
        )
    }
}

#[async_trait]
impl FilterStrategy for RasterFilterStrategy {
    fn supported_layer_type(&self) -> LayerType {
        LayerType::Raster
    }

    fn validate_criteria(&self, criteria: &FilterCriteria) -> Result<(), FilterError> {
        let criteria = raster_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        self.check_band(raster_of(handle.as_ref())?, criteria)?;
        if criteria.has_mask()
            && let Some(mask_id) = &criteria.mask_layer_id
        {
            let mask = self
                .layers
                .layer(mask_id)
                .ok_or_else(|| FilterError::LayerNotFound(mask_id.clone()))?;
            vector_of(mask.as_ref())?;
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
        match self.run_filter(criteria, progress, &cancel, started) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(layer_id = %criteria.layer_id(), error = %e, "Raster filter failed");
                UnifiedFilterResult::from_error(criteria.layer_id(), LayerType::Raster, &e, started)
            }
        }
    }

    async fn get_preview(&self, criteria: &FilterCriteria) -> Result<FilterPreview, FilterError> {
        let criteria = raster_criteria(criteria)?;
        let handle = self.resolve(&criteria.layer_id)?;
        let raster = raster_of(handle.as_ref())?;
        let evaluation = self.evaluate(
            raster,
            criteria,
            &ProgressReporter::none(),
            &CancellationToken::new(),
        )?;

        let mut details = evaluation.statistics(criteria);
        details.insert("band_count".into(), json!(raster.band_count()));
        if let Some(min) = criteria.min_value {
            details.insert("min_value".into(), json!(min));
        }
        if let Some(max) = criteria.max_value {
            details.insert("max_value".into(), json!(max));
        }

        Ok(FilterPreview {
            layer_id: criteria.layer_id.clone(),
            layer_type: LayerType::Raster,
            summary: criteria.to_string(),
            estimated_count: Some(evaluation.matched),
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
                tracing::warn!(layer_id = %criteria.layer_id(), error = %e, "Raster export failed");
                UnifiedFilterResult::from_error(criteria.layer_id(), LayerType::Raster, &e, started)
            }
        }
    }

    fn cancel(&self) {
        tracing::debug!("Raster filter cancellation requested");
        self.cancel.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn raster_criteria(criteria: &FilterCriteria) -> Result<&RasterFilterCriteria, FilterError> {
    match criteria {
        FilterCriteria::Raster(c) => Ok(c),
        other => Err(FilterError::InvalidCriteria(format!(
            "Raster strategy cannot handle {} criteria",
            other.layer_type()
        ))),
    }
}

fn raster_of(handle: &dyn LayerHandle) -> Result<&dyn RasterLayer, FilterError> {
    handle.as_raster().ok_or_else(|| {
        FilterError::InvalidCriteria(format!("Layer '{}' is not a raster layer", handle.id()))
    })
}

/// Whether one pixel satisfies the value condition
///
/// Nodata pixels only ever match `is_nodata`. A missing bound does not
/// restrict, and single-value predicates use whichever bound is set.
fn pixel_matches(criteria: &RasterFilterCriteria, value: Option<f64>) -> bool {
    let tol = criteria.tolerance;
    let (min, max) = (criteria.min_value, criteria.max_value);
    match (criteria.predicate, value) {
        (RasterPredicate::IsNodata, v) => v.is_none(),
        (RasterPredicate::IsNotNodata, v) => v.is_some(),
        (_, None) => false,
        (RasterPredicate::WithinRange, Some(v)) => {
            min.is_none_or(|m| v >= m - tol) && max.is_none_or(|m| v <= m + tol)
        }
        (RasterPredicate::OutsideRange, Some(v)) => {
            if min.is_none() && max.is_none() {
                return true;
            }
            min.is_some_and(|m| v < m - tol) || max.is_some_and(|m| v > m + tol)
        }
        (RasterPredicate::AboveValue, Some(v)) => min.or(max).is_none_or(|b| v > b - tol),
        (RasterPredicate::BelowValue, Some(v)) => max.or(min).is_none_or(|b| v < b + tol),
        (RasterPredicate::EqualsValue, Some(v)) => min.or(max).is_none_or(|b| (v - b).abs() <= tol),
    }
}
