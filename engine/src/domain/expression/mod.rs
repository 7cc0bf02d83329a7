//! Filter expressions
//!
//! - `model` - Immutable expression, provider, predicate and extent types
//! - `service` - Validation, parsing, dialect translation and composition
//! - `sanitize` - Cleanup of subset strings read back from the host

mod lexer;
pub mod model;
pub mod sanitize;
pub mod service;

pub use model::{BoundingBox, FilterExpression, ProviderType, SpatialPredicate, srid_from_authid};
pub use sanitize::sanitize_subset_string;
pub use service::{
    ParsedExpression, ValidationResult, add_buffer, build_expression, combine_expressions,
    negate, parse, spatial_predicate_sql, to_sql, validate,
};
