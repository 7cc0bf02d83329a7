//! Attribute and spatial filtering for map layers
//!
//! Expressions are translated into provider SQL, large filters are split
//! into selectivity-ordered steps, and vector and raster layers are served
//! through one filter service.

pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
