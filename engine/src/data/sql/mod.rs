//! SQL abstraction layer for multi-backend filter generation
//!
//! This module provides abstractions for generating filter SQL that works
//! across the supported backends (PostgreSQL/PostGIS, SQLite/SpatiaLite) and
//! the pass-through providers that evaluate expressions themselves.

mod dialect;
mod passthrough_dialect;
mod postgres_dialect;
mod sqlite_dialect;

pub use dialect::{GeometryToken, SqlDialect};
pub(crate) use dialect::{format_number, quote_literal};
pub use passthrough_dialect::PassthroughDialect;
pub use postgres_dialect::PostgresDialect;
pub use sqlite_dialect::SqliteDialect;

use serde::{Deserialize, Serialize};

/// Database backend identifier for live connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Get the SQL dialect for this backend
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Backend::Sqlite => &SqliteDialect,
            Backend::Postgres => &PostgresDialect,
        }
    }

    /// Get the backend name
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
