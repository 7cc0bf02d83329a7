//! Filtering domain
//!
//! - `expression` - Expression validation, parsing and SQL translation
//! - `criteria` - Vector and raster filter criteria and their wire format
//! - `optimizer` - Selectivity estimation, plan building and multi-step execution
//! - `strategy` - Per-layer-type strategies and the unified filter service
//! - `layer` - Traits the embedding host implements for its map layers

pub mod criteria;
pub mod error;
pub mod execution;
pub mod expression;
pub mod layer;
pub mod optimizer;
pub mod strategy;

pub use criteria::{
    FilterCriteria, LayerType, RasterFilterCriteria, RasterPredicate, VectorFilterCriteria,
    criteria_from_value,
};
pub use error::FilterError;
pub use execution::{FilterStatus, ProgressReporter};
pub use layer::{
    ExportOptions, FeatureSelection, LayerHandle, LayerLookup, RasterLayer, VectorLayer,
};
pub use optimizer::{FilterPlan, FilterPlanResult, QueryOptimizer, TableRef};
pub use strategy::{
    FilterPreview, FilterStrategy, FilterStrategyFactory, UnifiedFilterResult,
    UnifiedFilterService,
};
