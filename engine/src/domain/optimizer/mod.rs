//! Multi-step query optimization
//!
//! - `statistics` - Row counts, column stats and extent reported by the store
//! - `selectivity` - Heuristic selectivity estimates for attribute and spatial predicates
//! - `plan` - Ordering predicates into a multi-step plan
//! - `executor` - Running a plan step by step over candidate id sets
//! - `optimizer` - Facade combining the above for one table

mod executor;
#[allow(clippy::module_inception)]
mod optimizer;
mod plan;
mod selectivity;
mod statistics;

use std::fmt;

use serde::Serialize;

use crate::data::SqlDialect;

pub use executor::{FilterPlanResult, FilterStepResult, MultiStepFilterExecutor};
pub use optimizer::QueryOptimizer;
pub use plan::{FilterPlan, FilterPlanBuilder, FilterStep, PlanStrategy, StepType};
pub use selectivity::{
    SelectivityEstimator, default_spatial_selectivity, estimate_attribute_selectivity,
    estimate_spatial_selectivity,
};
pub use statistics::{ColumnStats, LayerStatistics, fetch_statistics};

/// Identity of the table a layer reads from
///
/// Names are supplied by the host and never discovered. They are quoted when
/// rendered into SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
    pub geometry_column: String,
    pub primary_key: String,
}

impl TableRef {
    pub fn new(
        table: impl Into<String>,
        geometry_column: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            schema: None,
            table: table.into(),
            geometry_column: geometry_column.into(),
            primary_key: primary_key.into(),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// `"schema"."table"` or `"table"`
    pub fn qualified_name(&self, dialect: &dyn SqlDialect) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                dialect.quote_identifier(schema),
                dialect.quote_identifier(&self.table)
            ),
            None => dialect.quote_identifier(&self.table),
        }
    }

    pub fn quoted_primary_key(&self, dialect: &dyn SqlDialect) -> String {
        dialect.quote_identifier(&self.primary_key)
    }

    pub fn quoted_geometry_column(&self, dialect: &dyn SqlDialect) -> String {
        dialect.quote_identifier(&self.geometry_column)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => f.write_str(&self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Backend;

    #[test]
    fn test_qualified_name() {
        let dialect = Backend::Postgres.dialect();
        let table = TableRef::new("parcels", "geom", "id").with_schema("cadastre");
        assert_eq!(table.qualified_name(dialect), "\"cadastre\".\"parcels\"");
        assert_eq!(table.to_string(), "cadastre.parcels");

        let table = TableRef::new("roads", "geom", "fid").with_schema("");
        assert_eq!(table.qualified_name(dialect), "\"roads\"");
        assert_eq!(table.quoted_primary_key(dialect), "\"fid\"");
    }
}
