//! Unified error type for data layer
//!
//! This module provides a unified error type that can represent errors from
//! all connection backends (PostgreSQL, SQLite).

use thiserror::Error;

/// Unified error type for data layer operations
///
/// This error type wraps backend-specific errors while preserving context
/// about which backend generated the error.
#[derive(Error, Debug)]
pub enum DataError {
    /// SQLite database error (embedded spatial backend)
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// PostgreSQL database error (networked spatial backend)
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// Column value could not be decoded into a supported type
    #[error("Cannot decode column {column} ({type_name}) on {backend}")]
    Decode {
        backend: &'static str,
        column: String,
        type_name: String,
    },

    /// Query returned a shape the caller did not expect
    #[error("Unexpected result on {backend}: {reason}")]
    UnexpectedResult {
        backend: &'static str,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query timeout
    #[error("Query timeout after {timeout_secs}s on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    /// Query names a column the table does not have
    #[error("Unknown column \"{column}\" in {table} on {backend}")]
    UnknownColumn {
        backend: &'static str,
        table: String,
        column: String,
    },
}

impl DataError {
    /// Create a SQLite error with preserved context
    pub fn from_sqlite(e: sqlx::Error) -> Self {
        Self::Sqlite(e)
    }

    /// Create a PostgreSQL error with preserved context
    pub fn from_postgres(e: sqlx::Error) -> Self {
        Self::Postgres(e)
    }

    /// Create a decode error
    pub fn decode(backend: &'static str, column: &str, type_name: &str) -> Self {
        Self::Decode {
            backend,
            column: column.to_string(),
            type_name: type_name.to_string(),
        }
    }

    /// Create an unexpected result error
    pub fn unexpected(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::UnexpectedResult {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(backend: &'static str, timeout_secs: u64) -> Self {
        Self::Timeout {
            backend,
            timeout_secs,
        }
    }

    /// Create an unknown column error
    pub fn unknown_column(backend: &'static str, table: &str, column: &str) -> Self {
        Self::UnknownColumn {
            backend,
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// Check if this is a connection-related error that might be transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Sqlite(e) | Self::Postgres(e) => {
                matches!(
                    e,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            _ => false,
        }
    }

    /// Get the backend name that generated this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
            Self::Decode { backend, .. } => backend,
            Self::UnexpectedResult { backend, .. } => backend,
            Self::Timeout { backend, .. } => backend,
            Self::UnknownColumn { backend, .. } => backend,
            Self::Config(_) => "unknown",
        }
    }
}
