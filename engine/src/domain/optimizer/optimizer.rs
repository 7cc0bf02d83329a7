//! Query optimizer facade for one table

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::executor::{FilterPlanResult, MultiStepFilterExecutor};
use super::plan::{FilterPlan, FilterPlanBuilder, PlanStrategy};
use super::statistics::{LayerStatistics, fetch_statistics};
use super::TableRef;
use crate::core::config::OptimizerConfig;
use crate::data::{Backend, DataError, QueryConnection};
use crate::domain::execution::ProgressReporter;
use crate::domain::expression::BoundingBox;

/// Plans and runs filters against one table
///
/// Statistics are fetched on first use and cached for the optimizer's
/// lifetime; call [`invalidate_statistics`](Self::invalidate_statistics)
/// after the table changes.
pub struct QueryOptimizer {
    conn: Arc<dyn QueryConnection>,
    table: TableRef,
    config: OptimizerConfig,
    statistics: RwLock<Option<Arc<LayerStatistics>>>,
}

impl QueryOptimizer {
    pub fn new(conn: Arc<dyn QueryConnection>, table: TableRef, config: OptimizerConfig) -> Self {
        Self {
            conn,
            table,
            config,
            statistics: RwLock::new(None),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn backend(&self) -> Backend {
        self.conn.backend()
    }

    pub fn backend_name(&self) -> &'static str {
        self.conn.backend().name()
    }

    /// Cached statistics, fetching them on first call
    ///
    /// A transient failure (pool timeout, dropped connection) is retried once.
    pub async fn statistics(&self) -> Result<Arc<LayerStatistics>, DataError> {
        if let Some(stats) = self.statistics.read().as_ref() {
            return Ok(stats.clone());
        }
        let stats = match fetch_statistics(self.conn.as_ref(), &self.table).await {
            Err(e) if e.is_transient() => {
                tracing::debug!(table = %self.table, error = %e, "Retrying statistics fetch");
                fetch_statistics(self.conn.as_ref(), &self.table).await?
            }
            result => result?,
        };
        let stats = Arc::new(stats);
        *self.statistics.write() = Some(stats.clone());
        Ok(stats)
    }

    pub fn invalidate_statistics(&self) {
        *self.statistics.write() = None;
        tracing::debug!(table = %self.table, "Statistics cache cleared");
    }

    /// Build a plan without running it
    pub async fn plan(
        &self,
        attribute: Option<&str>,
        spatial: Option<&str>,
        source_bbox: Option<&BoundingBox>,
        result_limit: Option<u64>,
    ) -> Result<FilterPlan, DataError> {
        let stats = self.statistics().await?;
        let dialect = self.conn.backend().dialect();
        let geometry_column = self.table.quoted_geometry_column(dialect);
        Ok(
            FilterPlanBuilder::new(&stats, dialect, geometry_column, &self.config)
                .with_result_limit(result_limit)
                .build(attribute, spatial, source_bbox),
        )
    }

    /// Statistics, plan and execution in one call
    ///
    /// Never fails; problems are reported in the returned result.
    pub async fn filter_optimal(
        &self,
        attribute: Option<&str>,
        spatial: Option<&str>,
        source_bbox: Option<&BoundingBox>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> FilterPlanResult {
        self.filter_with_limit(attribute, spatial, source_bbox, None, progress, cancel)
            .await
    }

    /// [`filter_optimal`](Self::filter_optimal) with a cap on returned ids
    pub async fn filter_with_limit(
        &self,
        attribute: Option<&str>,
        spatial: Option<&str>,
        source_bbox: Option<&BoundingBox>,
        result_limit: Option<u64>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> FilterPlanResult {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return FilterPlanResult::cancelled(PlanStrategy::Direct, 0, Vec::new(), started);
        }

        progress.report(0, "Collecting layer statistics");
        let plan = match self
            .plan(attribute, spatial, source_bbox, result_limit)
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(table = %self.table, error = %e, "Could not plan filter");
                return FilterPlanResult::failed(
                    PlanStrategy::Direct,
                    0,
                    Vec::new(),
                    started,
                    format!("Failed to read statistics for {}: {}", self.table, e),
                );
            }
        };

        if plan.is_empty() {
            return FilterPlanResult::failed(
                plan.strategy,
                plan.estimated_row_count,
                Vec::new(),
                started,
                "No filter predicates supplied",
            );
        }

        tracing::info!(
            table = %self.table,
            strategy = %plan.strategy,
            rows = plan.estimated_row_count,
            steps = plan.steps.len(),
            "Executing filter plan"
        );

        let executor = MultiStepFilterExecutor::new(self.conn.as_ref(), &self.table, &self.config);
        let mut result = executor
            .execute_plan(&plan, &progress.scaled(10, 100), cancel)
            .await;
        result.total_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        tracing::info!(
            table = %self.table,
            status = %result.status,
            final_count = result.final_count,
            total_time_ms = result.total_time_ms,
            "Filter plan finished"
        );
        tracing::debug!(summary = %result.summary(), "Filter plan steps");
        result
    }
}
