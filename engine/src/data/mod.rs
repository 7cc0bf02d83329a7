//! Data access layer
//!
//! Provides the database connections the filter engine runs against:
//! - `sqlite` - Embedded SpatiaLite/GeoPackage backend
//! - `postgres` - Networked PostGIS backend
//! - `sql` - SQL dialects per provider (PostGIS, SpatiaLite, passthrough)
//! - `types` - Backend-neutral row values
//! - `traits` - Query trait implemented by every backend
//! - `error` - Unified error type for all backends

pub mod error;
pub mod postgres;
pub mod sql;
pub mod sqlite;
pub mod traits;
pub mod types;

use std::sync::Arc;

pub use error::DataError;
pub use postgres::PostgresConnection;
pub use sql::{Backend, SqlDialect};
pub use sqlite::SqliteConnection;
pub use traits::QueryConnection;
pub use types::{SqlRow, SqlValue};

use crate::core::config::DatabaseConfig;

/// Open the connection selected by the database configuration
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn QueryConnection>, DataError> {
    match config.backend {
        Backend::Sqlite => {
            let conn = SqliteConnection::open(&config.sqlite).await?;
            Ok(Arc::new(conn))
        }
        Backend::Postgres => {
            let conn = PostgresConnection::connect(&config.postgres).await?;
            Ok(Arc::new(conn))
        }
    }
}
