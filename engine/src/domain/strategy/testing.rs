//! In-memory host layers for strategy and service tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;

use crate::data::{QueryConnection, SqliteConnection};
use crate::domain::criteria::LayerType;
use crate::domain::error::FilterError;
use crate::domain::expression::{BoundingBox, ProviderType};
use crate::domain::layer::{
    ExportOptions, FeatureSelection, LayerHandle, LayerLookup, RasterLayer, VectorLayer,
};
use crate::domain::optimizer::TableRef;

#[derive(Default)]
pub struct FakeLookup {
    layers: HashMap<String, Arc<dyn LayerHandle>>,
}

impl FakeLookup {
    pub fn with(mut self, layer: Arc<dyn LayerHandle>) -> Self {
        self.layers.insert(layer.id().to_string(), layer);
        self
    }
}

impl LayerLookup for FakeLookup {
    fn layer(&self, layer_id: &str) -> Option<Arc<dyn LayerHandle>> {
        self.layers.get(layer_id).cloned()
    }
}

/// 50 parcels; every fifth is commercial and `area = fid * 10`
pub async fn parcels_connection() -> Arc<dyn QueryConnection> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    sqlx::query("CREATE TABLE parcels (fid INTEGER PRIMARY KEY, zone TEXT, area REAL)")
        .execute(&pool)
        .await
        .unwrap();
    for fid in 1..=50 {
        let zone = if fid % 5 == 0 { "commercial" } else { "residential" };
        sqlx::query("INSERT INTO parcels (fid, zone, area) VALUES (?, ?, ?)")
            .bind(fid)
            .bind(zone)
            .bind(fid as f64 * 10.0)
            .execute(&pool)
            .await
            .unwrap();
    }
    Arc::new(SqliteConnection::from_pool(pool))
}

pub struct FakeVectorLayer {
    id: String,
    provider: ProviderType,
    crs: Option<String>,
    source: Option<TableRef>,
    connection: Option<Arc<dyn QueryConnection>>,
    geometries: Vec<String>,
    selected: Vec<usize>,
    extent: Option<BoundingBox>,
    feature_count: u64,
    subset: Mutex<String>,
    exported: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeVectorLayer {
    pub fn new(id: &str, provider: ProviderType) -> Self {
        Self {
            id: id.to_string(),
            provider,
            crs: Some("EPSG:3857".to_string()),
            source: None,
            connection: None,
            geometries: Vec::new(),
            selected: Vec::new(),
            extent: None,
            feature_count: 0,
            subset: Mutex::new(String::new()),
            exported: Mutex::new(Vec::new()),
        }
    }

    pub fn with_source(mut self, table: TableRef, connection: Arc<dyn QueryConnection>) -> Self {
        self.source = Some(table);
        self.connection = Some(connection);
        self
    }

    pub fn with_geometries(mut self, geometries: Vec<String>, extent: BoundingBox) -> Self {
        self.feature_count = geometries.len() as u64;
        self.geometries = geometries;
        self.extent = Some(extent);
        self
    }

    pub fn with_selected(mut self, indices: Vec<usize>) -> Self {
        self.selected = indices;
        self
    }

    pub fn with_crs(mut self, crs: Option<&str>) -> Self {
        self.crs = crs.map(str::to_string);
        self
    }

    pub fn with_feature_count(mut self, count: u64) -> Self {
        self.feature_count = count;
        self
    }

    pub fn exported(&self) -> Vec<(PathBuf, String)> {
        self.exported.lock().clone()
    }
}

impl LayerHandle for FakeVectorLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn layer_type(&self) -> LayerType {
        LayerType::Vector
    }

    fn crs(&self) -> Option<String> {
        self.crs.clone()
    }

    fn provider(&self) -> ProviderType {
        self.provider
    }

    fn extent(&self) -> Option<BoundingBox> {
        self.extent
    }

    fn as_vector(&self) -> Option<&dyn VectorLayer> {
        Some(self)
    }
}

#[async_trait]
impl VectorLayer for FakeVectorLayer {
    fn source(&self) -> Option<TableRef> {
        self.source.clone()
    }

    fn connection(&self) -> Option<Arc<dyn QueryConnection>> {
        self.connection.clone()
    }

    fn feature_count(&self) -> u64 {
        self.feature_count
    }

    /// Feature ids are 1-based positions in the geometry list
    fn geometry_wkt(&self, selection: &FeatureSelection) -> Result<Vec<String>, FilterError> {
        Ok(match selection {
            FeatureSelection::All => self.geometries.clone(),
            FeatureSelection::Selected => self
                .selected
                .iter()
                .filter_map(|i| self.geometries.get(*i).cloned())
                .collect(),
            FeatureSelection::Ids(ids) => ids
                .iter()
                .filter_map(|id| usize::try_from(*id - 1).ok())
                .filter_map(|i| self.geometries.get(i).cloned())
                .collect(),
        })
    }

    fn geometry_extent(&self, _selection: &FeatureSelection) -> Option<BoundingBox> {
        self.extent
    }

    fn subset_string(&self) -> String {
        self.subset.lock().clone()
    }

    fn set_subset_string(&self, subset: &str) -> Result<(), FilterError> {
        *self.subset.lock() = subset.to_string();
        Ok(())
    }

    async fn export_features(
        &self,
        path: &Path,
        _options: &ExportOptions,
        subset: &str,
    ) -> Result<u64, FilterError> {
        self.exported
            .lock()
            .push((path.to_path_buf(), subset.to_string()));
        Ok(self.feature_count)
    }
}

/// Single-band-per-entry raster with a fixed mask
pub struct FakeRasterLayer {
    id: String,
    bands: Vec<Vec<Option<f64>>>,
    mask: Option<Vec<bool>>,
    mask_requests: Mutex<Vec<Vec<String>>>,
    exported: Mutex<Option<(PathBuf, i32, Vec<bool>)>>,
}

impl FakeRasterLayer {
    pub fn new(id: &str, bands: Vec<Vec<Option<f64>>>) -> Self {
        Self {
            id: id.to_string(),
            bands,
            mask: None,
            mask_requests: Mutex::new(Vec::new()),
            exported: Mutex::new(None),
        }
    }

    /// Mask returned for any geometry set; everything inside when unset
    pub fn with_mask(mut self, mask: Vec<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn mask_requests(&self) -> Vec<Vec<String>> {
        self.mask_requests.lock().clone()
    }

    pub fn exported(&self) -> Option<(PathBuf, i32, Vec<bool>)> {
        self.exported.lock().clone()
    }
}

impl LayerHandle for FakeRasterLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn layer_type(&self) -> LayerType {
        LayerType::Raster
    }

    fn crs(&self) -> Option<String> {
        Some("EPSG:3857".to_string())
    }

    fn provider(&self) -> ProviderType {
        ProviderType::Ogr
    }

    fn extent(&self) -> Option<BoundingBox> {
        Some(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
    }

    fn as_raster(&self) -> Option<&dyn RasterLayer> {
        Some(self)
    }
}

#[async_trait]
impl RasterLayer for FakeRasterLayer {
    fn band_count(&self) -> i32 {
        self.bands.len() as i32
    }

    fn band_values(&self, band: i32) -> Result<Vec<Option<f64>>, FilterError> {
        usize::try_from(band - 1)
            .ok()
            .and_then(|i| self.bands.get(i))
            .cloned()
            .ok_or_else(|| FilterError::Host(format!("band {} does not exist", band)))
    }

    fn mask_pixels(&self, geometries_wkt: &[String]) -> Result<Vec<bool>, FilterError> {
        self.mask_requests.lock().push(geometries_wkt.to_vec());
        let pixels = self.bands.first().map_or(0, Vec::len);
        Ok(self.mask.clone().unwrap_or_else(|| vec![true; pixels]))
    }

    async fn export_masked(
        &self,
        path: &Path,
        band: i32,
        keep: &[bool],
        _options: &ExportOptions,
    ) -> Result<u64, FilterError> {
        *self.exported.lock() = Some((path.to_path_buf(), band, keep.to_vec()));
        Ok(keep.iter().filter(|k| **k).count() as u64)
    }
}
