//! Filter strategies
//!
//! - `vector` - Attribute and spatial filtering of vector layers
//! - `raster` - Band value and mask filtering of raster layers
//! - `factory` - Registry of strategies keyed by layer type
//! - `service` - Entry point that validates criteria and dispatches

mod factory;
mod raster;
mod service;
mod vector;

#[cfg(test)]
pub(crate) mod testing;

pub use factory::FilterStrategyFactory;
pub use raster::RasterFilterStrategy;
pub use service::UnifiedFilterService;
pub use vector::VectorFilterStrategy;

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::domain::criteria::{FilterCriteria, LayerType};
use crate::domain::error::FilterError;
use crate::domain::execution::{FilterStatus, ProgressReporter};
use crate::domain::layer::{ExportOptions, LayerHandle, VectorLayer};

/// Filter, preview and export for one layer kind
#[async_trait]
pub trait FilterStrategy: Send + Sync {
    fn supported_layer_type(&self) -> LayerType;

    /// Checks beyond the criteria's own structural validation
    fn validate_criteria(&self, criteria: &FilterCriteria) -> Result<(), FilterError>;

    /// Apply the filter to the layer
    ///
    /// Failures and cancellation are reported in the result.
    async fn apply_filter(
        &self,
        criteria: &FilterCriteria,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult;

    /// Describe what the filter would do without applying it
    async fn get_preview(&self, criteria: &FilterCriteria) -> Result<FilterPreview, FilterError>;

    /// Write the filtered layer to `path`
    async fn export(
        &self,
        criteria: &FilterCriteria,
        path: &Path,
        options: &ExportOptions,
        progress: &ProgressReporter,
    ) -> UnifiedFilterResult;

    /// Request cancellation of the running operation
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Cancellation token shared between a strategy and its callers
///
/// Each operation starts with a fresh token, so a cancel only affects the
/// operation running when it was requested.
#[derive(Debug, Default)]
pub struct CancellationState {
    token: Mutex<CancellationToken>,
}

impl CancellationState {
    /// Install a fresh token for a new operation
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.token.lock() = token.clone();
        token
    }

    pub fn cancel(&self) {
        self.token.lock().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.lock().is_cancelled()
    }
}

/// Result returned for every filter and export, whatever the layer kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedFilterResult {
    pub layer_id: String,
    pub layer_type: LayerType,
    pub status: FilterStatus,
    /// Matching features or pixels
    pub affected_count: u64,
    pub execution_time_ms: f64,
    pub backend_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pixel_count: Option<u64>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub statistics: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl UnifiedFilterResult {
    fn base(layer_id: &str, layer_type: LayerType, status: FilterStatus, started: Instant) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            layer_type,
            status,
            affected_count: 0,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            backend_name: String::new(),
            feature_ids: None,
            pixel_count: None,
            statistics: Map::new(),
            error_message: None,
        }
    }

    pub fn vector_success(
        layer_id: &str,
        affected_count: u64,
        feature_ids: Option<Vec<i64>>,
        started: Instant,
    ) -> Self {
        Self {
            affected_count,
            feature_ids,
            ..Self::base(layer_id, LayerType::Vector, FilterStatus::Success, started)
        }
    }

    pub fn raster_success(layer_id: &str, pixel_count: u64, started: Instant) -> Self {
        Self {
            affected_count: pixel_count,
            pixel_count: Some(pixel_count),
            ..Self::base(layer_id, LayerType::Raster, FilterStatus::Success, started)
        }
    }

    pub fn error(
        layer_id: &str,
        layer_type: LayerType,
        message: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::base(layer_id, layer_type, FilterStatus::Error, started)
        }
    }

    pub fn cancelled(layer_id: &str, layer_type: LayerType, started: Instant) -> Self {
        Self {
            error_message: Some(FilterError::Cancelled.to_string()),
            ..Self::base(layer_id, layer_type, FilterStatus::Cancelled, started)
        }
    }

    /// Error or cancelled result for a failed operation
    pub fn from_error(
        layer_id: &str,
        layer_type: LayerType,
        error: &FilterError,
        started: Instant,
    ) -> Self {
        if error.is_cancelled() {
            Self::cancelled(layer_id, layer_type, started)
        } else {
            Self::error(layer_id, layer_type, error.to_string(), started)
        }
    }

    pub fn with_backend(mut self, backend_name: impl Into<String>) -> Self {
        self.backend_name = backend_name.into();
        self
    }

    pub fn with_statistic(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.statistics.insert(key.to_string(), value.into());
        self
    }

    pub fn with_statistics(mut self, statistics: Map<String, Value>) -> Self {
        self.statistics.extend(statistics);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == FilterStatus::Success
    }
}

/// What a filter would do, computed without touching the layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPreview {
    pub layer_id: String,
    pub layer_type: LayerType,
    /// Human-readable description of the filter
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_count: Option<u64>,
    pub details: Map<String, Value>,
}

/// Vector side of a layer, or an error naming the layer
fn vector_of(handle: &dyn LayerHandle) -> Result<&dyn VectorLayer, FilterError> {
    handle.as_vector().ok_or_else(|| {
        FilterError::InvalidCriteria(format!("Layer '{}' is not a vector layer", handle.id()))
    })
}
