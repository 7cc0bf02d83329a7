//! Host layer boundary
//!
//! The engine never owns map layers. The embedding host resolves layer ids
//! through [`LayerLookup`] and exposes each layer through a [`LayerHandle`],
//! with vector and raster capabilities behind [`VectorLayer`] and
//! [`RasterLayer`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::QueryConnection;
use crate::domain::criteria::LayerType;
use crate::domain::error::FilterError;
use crate::domain::expression::{BoundingBox, ProviderType};
use crate::domain::optimizer::TableRef;

/// Which features of a layer an operation reads
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeatureSelection {
    #[default]
    All,
    /// Features currently selected in the host
    Selected,
    Ids(Vec<i64>),
}

/// File export settings passed through to the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Driver/format name understood by the host (`GPKG`, `GTiff`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Target CRS authority id; the layer CRS when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_name: Option<String>,
}

/// Resolves layer ids to handles
pub trait LayerLookup: Send + Sync {
    fn layer(&self, layer_id: &str) -> Option<Arc<dyn LayerHandle>>;
}

/// A host layer of any kind
pub trait LayerHandle: Send + Sync {
    fn id(&self) -> &str;

    fn layer_type(&self) -> LayerType;

    /// CRS authority id such as `EPSG:4326`
    fn crs(&self) -> Option<String>;

    fn provider(&self) -> ProviderType;

    fn extent(&self) -> Option<BoundingBox>;

    fn as_vector(&self) -> Option<&dyn VectorLayer> {
        None
    }

    fn as_raster(&self) -> Option<&dyn RasterLayer> {
        None
    }
}

/// Vector capabilities of a host layer
#[async_trait]
pub trait VectorLayer: Send + Sync {
    /// Table backing the layer, for SQL-backed providers
    fn source(&self) -> Option<TableRef>;

    /// Connection to the store holding [`source`](Self::source)
    fn connection(&self) -> Option<Arc<dyn QueryConnection>>;

    fn feature_count(&self) -> u64;

    /// Geometries of the selected features as WKT
    fn geometry_wkt(&self, selection: &FeatureSelection) -> Result<Vec<String>, FilterError>;

    /// Combined extent of the selected features
    fn geometry_extent(&self, selection: &FeatureSelection) -> Option<BoundingBox>;

    fn subset_string(&self) -> String;

    fn set_subset_string(&self, subset: &str) -> Result<(), FilterError>;

    /// Write the features matching `subset` to `path`, returning the count
    async fn export_features(
        &self,
        path: &Path,
        options: &ExportOptions,
        subset: &str,
    ) -> Result<u64, FilterError>;
}

/// Raster capabilities of a host layer
#[async_trait]
pub trait RasterLayer: Send + Sync {
    fn band_count(&self) -> i32;

    /// Pixel values of a 1-based band in row-major order; `None` is nodata
    fn band_values(&self, band: i32) -> Result<Vec<Option<f64>>, FilterError>;

    /// Per-pixel flag telling whether the pixel falls inside any geometry
    fn mask_pixels(&self, geometries_wkt: &[String]) -> Result<Vec<bool>, FilterError>;

    /// Write `band` with every pixel whose `keep` flag is false set to nodata
    async fn export_masked(
        &self,
        path: &Path,
        band: i32,
        keep: &[bool],
        options: &ExportOptions,
    ) -> Result<u64, FilterError>;
}
