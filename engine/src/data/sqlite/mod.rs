//! SQLite/SpatiaLite connection
//!
//! Embedded spatial backend. Layers stored in SpatiaLite databases or
//! GeoPackages are filtered through this connection. The SpatiaLite extension
//! is loaded per connection when configured; without it only attribute
//! predicates can be evaluated.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Row, TypeInfo, ValueRef};
use tracing::log::LevelFilter;

pub use sqlx::SqlitePool;

use crate::core::config::SqliteConfig;
use crate::core::constants::{
    SQLITE_BUSY_TIMEOUT_SECS, SQLITE_CACHE_SIZE, SQLITE_MAX_CONNECTIONS,
};
use crate::data::error::DataError;
use crate::data::sql::Backend;
use crate::data::traits::QueryConnection;
use crate::data::types::{SqlRow, SqlValue};

const BACKEND: &str = "sqlite";

/// SQLite connection
///
/// Wraps a small read-mostly pool. Should be created once per data source and
/// shared by every optimizer that filters tables in it.
pub struct SqliteConnection {
    pool: SqlitePool,
}

impl SqliteConnection {
    /// Open the database file described by the configuration
    pub async fn open(config: &SqliteConfig) -> Result<Self, DataError> {
        if !config.path.exists() {
            return Err(DataError::Config(format!(
                "SQLite database not found: {}",
                config.path.display()
            )));
        }

        let mut options = SqliteConnectOptions::new()
            .filename(&config.path)
            .read_only(config.read_only)
            .busy_timeout(Duration::from_secs(SQLITE_BUSY_TIMEOUT_SECS))
            .pragma("cache_size", SQLITE_CACHE_SIZE)
            .pragma("temp_store", "MEMORY")
            .log_statements(LevelFilter::Trace);

        if let Some(extension) = &config.spatialite_extension {
            options = options.extension(extension.clone());
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(SQLITE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(DataError::from_sqlite)?;

        tracing::debug!(
            path = %config.path.display(),
            spatialite = config.spatialite_extension.is_some(),
            "SqliteConnection opened"
        );
        Ok(Self { pool })
    }

    /// Create a connection from an existing pool (tests, embedding hosts)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("SQLite pool closed");
    }
}

#[async_trait]
impl QueryConnection for SqliteConnection {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DataError> {
        tracing::trace!(sql, params = params.len(), "sqlite fetch_all");
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
                SqlValue::Bool(v) => query.bind(*v),
            };
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::from_sqlite)?;
        rows.iter().map(decode_row).collect()
    }
}

/// Decode a row by the storage class of each value
fn decode_row(row: &SqliteRow) -> Result<SqlRow, DataError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx).map_err(DataError::from_sqlite)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INTEGER" => SqlValue::Integer(row.try_get(idx).map_err(DataError::from_sqlite)?),
            "REAL" => SqlValue::Real(row.try_get(idx).map_err(DataError::from_sqlite)?),
            "TEXT" => SqlValue::Text(row.try_get(idx).map_err(DataError::from_sqlite)?),
            "BOOLEAN" => SqlValue::Bool(row.try_get(idx).map_err(DataError::from_sqlite)?),
            _ => return Err(DataError::decode(BACKEND, column.name(), &type_name)),
        };
        values.push(value);
    }
    Ok(values)
}
