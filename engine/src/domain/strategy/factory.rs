//! Strategy registry

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{FilterStrategy, RasterFilterStrategy, VectorFilterStrategy};
use crate::core::config::OptimizerConfig;
use crate::domain::criteria::{FilterCriteria, LayerType};
use crate::domain::error::FilterError;
use crate::domain::layer::LayerLookup;

/// Strategies keyed by the layer type they handle
///
/// Created once at startup and shared by `Arc`. Extra layer types can be
/// registered at runtime; registering a type again replaces its strategy.
pub struct FilterStrategyFactory {
    layers: Arc<dyn LayerLookup>,
    strategies: RwLock<HashMap<LayerType, Arc<dyn FilterStrategy>>>,
}

impl FilterStrategyFactory {
    /// Empty registry
    pub fn new(layers: Arc<dyn LayerLookup>) -> Self {
        Self {
            layers,
            strategies: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the vector and raster strategies
    pub fn with_defaults(layers: Arc<dyn LayerLookup>, config: OptimizerConfig) -> Self {
        let factory = Self::new(layers.clone());
        factory.register(Arc::new(VectorFilterStrategy::new(layers.clone(), config)));
        factory.register(Arc::new(RasterFilterStrategy::new(layers)));
        factory
    }

    pub fn layers(&self) -> &Arc<dyn LayerLookup> {
        &self.layers
    }

    /// Register a strategy under its layer type, returning the one it replaced
    pub fn register(&self, strategy: Arc<dyn FilterStrategy>) -> Option<Arc<dyn FilterStrategy>> {
        let layer_type = strategy.supported_layer_type();
        let previous = self.strategies.write().insert(layer_type, strategy);
        tracing::debug!(
            layer_type = %layer_type,
            replaced = previous.is_some(),
            "Filter strategy registered"
        );
        previous
    }

    pub fn unregister(&self, layer_type: LayerType) -> Option<Arc<dyn FilterStrategy>> {
        let removed = self.strategies.write().remove(&layer_type);
        if removed.is_some() {
            tracing::debug!(layer_type = %layer_type, "Filter strategy unregistered");
        }
        removed
    }

    pub fn get(&self, layer_type: LayerType) -> Result<Arc<dyn FilterStrategy>, FilterError> {
        self.strategies
            .read()
            .get(&layer_type)
            .cloned()
            .ok_or_else(|| FilterError::UnknownLayerType(layer_type.to_string()))
    }

    pub fn for_criteria(
        &self,
        criteria: &FilterCriteria,
    ) -> Result<Arc<dyn FilterStrategy>, FilterError> {
        self.get(criteria.layer_type())
    }

    pub fn is_supported(&self, layer_type: LayerType) -> bool {
        self.strategies.read().contains_key(&layer_type)
    }

    /// Registered layer types in name order
    pub fn supported_types(&self) -> Vec<LayerType> {
        let mut types: Vec<LayerType> = self.strategies.read().keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Layer type reported by the host for a layer id
    pub fn detect_layer_type(&self, layer_id: &str) -> Result<LayerType, FilterError> {
        self.layers
            .layer(layer_id)
            .map(|handle| handle.layer_type())
            .ok_or_else(|| FilterError::LayerNotFound(layer_id.to_string()))
    }

    /// Strategy for whatever kind of layer `layer_id` is
    pub fn for_layer(&self, layer_id: &str) -> Result<Arc<dyn FilterStrategy>, FilterError> {
        self.get(self.detect_layer_type(layer_id)?)
    }
}
