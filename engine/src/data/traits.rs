//! Connection trait for database backends
//!
//! This module defines the narrow interface the filter engine needs from a
//! store: run SQL text with positional parameters and hand back rows. Each
//! backend (SQLite, PostgreSQL) implements it with its own decoding logic.
//! Table, schema, column and primary key names are always supplied by the
//! caller; nothing here discovers schema.

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::sql::Backend;
use crate::data::types::{SqlRow, SqlValue};

/// Query interface used by the statistics fetcher and the multi-step executor
#[async_trait]
pub trait QueryConnection: Send + Sync {
    /// Backend kind, used to pick the SQL dialect
    fn backend(&self) -> Backend;

    /// Run a query and decode every row
    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>, DataError>;

    /// Run a query whose first column is an integer row identifier
    async fn fetch_ids(&self, sql: &str) -> Result<Vec<i64>, DataError> {
        let rows = self.fetch_all(sql, &[]).await?;
        rows.into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter(|value| !value.is_null())
            .map(|value| {
                value.as_i64().ok_or_else(|| {
                    DataError::unexpected(
                        self.backend().name(),
                        format!("primary key value {:?} is not an integer", value),
                    )
                })
            })
            .collect()
    }

    /// Run a query returning a single integer (first column of first row)
    async fn fetch_scalar_i64(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<i64>, DataError> {
        let rows = self.fetch_all(sql, params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64))
    }
}
