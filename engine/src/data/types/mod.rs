//! Shared data types for all database backends
//!
//! This module contains types that are used across the connection backends
//! (SQLite, PostgreSQL) to ensure consistent row handling.

mod value;

pub use value::{SqlRow, SqlValue};
