//! Error type for the filter domain

use thiserror::Error;

use crate::data::DataError;

/// Errors raised while validating, translating or running a filter
///
/// Validation and translation errors stop a request before anything touches
/// the store. Execution errors wrap the connection's `DataError`.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Criteria failed structural validation
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    /// Expression syntax is malformed
    #[error("Invalid expression: {message}")]
    InvalidExpression {
        message: String,
        position: Option<usize>,
    },

    /// Provider has no SQL dialect
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// No strategy is registered for the layer type
    #[error("Unknown layer type: {0}")]
    UnknownLayerType(String),

    /// Host could not resolve a layer id
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// Connection or query failure
    #[error(transparent)]
    Data(#[from] DataError),

    /// A filter plan failed while running
    #[error("Filter execution failed: {0}")]
    Execution(String),

    /// Host layer rejected an operation
    #[error("Layer operation failed: {0}")]
    Host(String),

    /// Export could not be written
    #[error("Export failed: {0}")]
    Export(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl FilterError {
    pub fn invalid_expression(message: impl Into<String>, position: Option<usize>) -> Self {
        Self::InvalidExpression {
            message: message.into(),
            position,
        }
    }

    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
