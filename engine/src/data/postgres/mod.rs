//! PostgreSQL/PostGIS connection
//!
//! Networked spatial backend. Provides:
//! - Connection pooling with min/max bounds
//! - Idle connection cleanup
//! - Statement timeout protection for runaway spatial queries
//!
//! Geometry functions are expected to come from PostGIS; the connection itself
//! does not check for the extension.

pub use sqlx::PgPool;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, ConnectOptions, Row, TypeInfo, ValueRef};
use tracing::log::LevelFilter;

use crate::core::config::PostgresConfig;
use crate::core::constants::{
    POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS, POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS,
    POSTGRES_DEFAULT_MAX_CONNECTIONS, POSTGRES_DEFAULT_MIN_CONNECTIONS,
    POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
};
use crate::data::error::DataError;
use crate::data::sql::Backend;
use crate::data::traits::QueryConnection;
use crate::data::types::{SqlRow, SqlValue};

const BACKEND: &str = "postgres";

/// PostgreSQL connection
///
/// Should be created once per data source and shared across every optimizer
/// that filters tables in it.
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// Connect using the given configuration
    ///
    /// Zero values in the configuration fall back to the built-in defaults.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DataError> {
        let url = config.url.as_str();
        if url.is_empty() {
            return Err(DataError::Config("PostgreSQL URL is required".into()));
        }

        let max_connections = or_default(config.max_connections, POSTGRES_DEFAULT_MAX_CONNECTIONS);
        let min_connections = or_default(config.min_connections, POSTGRES_DEFAULT_MIN_CONNECTIONS);
        let acquire_timeout = or_default(
            config.acquire_timeout_secs,
            POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS,
        );
        let idle_timeout = or_default(config.idle_timeout_secs, POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS);
        let statement_timeout = or_default(
            config.statement_timeout_secs,
            POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS,
        );

        let mut options: PgConnectOptions = url
            .parse()
            .map_err(|e| DataError::Config(format!("Invalid PostgreSQL URL: {}", e)))?;

        options = options.log_statements(LevelFilter::Trace);
        if statement_timeout > 0 {
            options = options.options([("statement_timeout", format!("{}s", statement_timeout))]);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections.min(max_connections))
            .acquire_timeout(Duration::from_secs(acquire_timeout))
            .idle_timeout(Duration::from_secs(idle_timeout))
            .connect_with(options)
            .await
            .map_err(|e| match e {
                sqlx::Error::PoolTimedOut => DataError::timeout(BACKEND, acquire_timeout),
                other => DataError::from_postgres(other),
            })?;

        tracing::debug!(
            max_connections,
            min_connections,
            acquire_timeout_secs = acquire_timeout,
            idle_timeout_secs = idle_timeout,
            statement_timeout_secs = statement_timeout,
            "PostgresConnection initialized"
        );
        Ok(Self { pool })
    }

    /// Create a connection from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the connection pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("PostgreSQL pool closed");
    }
}

fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
    if value != T::default() { value } else { default }
}

#[async_trait]
impl QueryConnection for PostgresConnection {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DataError> {
        tracing::trace!(sql, params = params.len(), "postgres fetch_all");
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
            .map_err(DataError::from_postgres)?;
        rows.iter().map(decode_row).collect()
    }
}

/// Decode a row by declared column type
///
/// Statistics queries cast `numeric` and `real` catalog columns to `float8`
/// so only the types below need handling.
fn decode_row(row: &PgRow) -> Result<SqlRow, DataError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx).map_err(DataError::from_postgres)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INT2" => SqlValue::Integer(
                row.try_get::<i16, _>(idx)
                    .map_err(DataError::from_postgres)?
                    .into(),
            ),
            "INT4" => SqlValue::Integer(
                row.try_get::<i32, _>(idx)
                    .map_err(DataError::from_postgres)?
                    .into(),
            ),
            "INT8" => SqlValue::Integer(row.try_get(idx).map_err(DataError::from_postgres)?),
            "FLOAT4" => SqlValue::Real(
                row.try_get::<f32, _>(idx)
                    .map_err(DataError::from_postgres)?
                    .into(),
            ),
            "FLOAT8" => SqlValue::Real(row.try_get(idx).map_err(DataError::from_postgres)?),
            "TEXT" | "VARCHAR" | "NAME" | "BPCHAR" => {
                SqlValue::Text(row.try_get(idx).map_err(DataError::from_postgres)?)
            }
            "BOOL" => SqlValue::Bool(row.try_get(idx).map_err(DataError::from_postgres)?),
            _ => return Err(DataError::decode(BACKEND, column.name(), &type_name)),
        };
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> PostgresConfig {
        PostgresConfig {
            url: url.to_string(),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let err = PostgresConnection::connect(&config("")).await.err().unwrap();
        assert!(matches!(err, DataError::Config(msg) if msg.contains("required")));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let err = PostgresConnection::connect(&config("not a url"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DataError::Config(msg) if msg.contains("Invalid PostgreSQL URL")));
    }

    #[test]
    fn test_or_default() {
        assert_eq!(or_default(0u32, 10), 10);
        assert_eq!(or_default(3u32, 10), 3);
        assert_eq!(or_default(0u64, 120), 120);
    }
}
