//! Step-by-step plan execution
//!
//! Each step narrows the candidate id set of the previous one. Large
//! candidate sets are sent in chunks so no single `IN (...)` list exceeds the
//! configured size. Cancellation is checked before every step and every
//! chunk; a cancelled run returns no ids.
//!
//! SQLite reads a double-quoted name that matches no column as a string
//! literal, so on that backend the quoted names of every step are checked
//! against the table's columns before anything runs.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::TableRef;
use super::plan::{FilterPlan, FilterStep, PlanStrategy, StepType};
use super::statistics::sqlite_columns;
use crate::core::config::OptimizerConfig;
use crate::data::{Backend, DataError, QueryConnection, SqlDialect};
use crate::domain::error::FilterError;
use crate::domain::execution::{FilterStatus, ProgressReporter};
use crate::domain::expression::parse;

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterStepResult {
    pub step_type: StepType,
    pub expression: String,
    pub input_count: u64,
    pub output_count: u64,
    /// `1 - output / input`, 0 when the input was empty
    pub reduction_ratio: f64,
    pub execution_time_ms: f64,
    /// Queries issued for this step
    pub chunks: usize,
}

/// Outcome of a whole plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterPlanResult {
    pub status: FilterStatus,
    pub strategy: PlanStrategy,
    /// Surviving ids, sorted; empty unless the run succeeded
    pub feature_ids: Vec<i64>,
    pub initial_count: u64,
    pub final_count: u64,
    pub overall_reduction_ratio: f64,
    pub steps: Vec<FilterStepResult>,
    pub total_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FilterPlanResult {
    pub fn failed(
        strategy: PlanStrategy,
        initial_count: u64,
        steps: Vec<FilterStepResult>,
        started: Instant,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: FilterStatus::Error,
            strategy,
            feature_ids: Vec::new(),
            initial_count,
            final_count: 0,
            overall_reduction_ratio: 0.0,
            steps,
            total_time_ms: elapsed_ms(started),
            error_message: Some(message.into()),
        }
    }

    pub fn cancelled(
        strategy: PlanStrategy,
        initial_count: u64,
        steps: Vec<FilterStepResult>,
        started: Instant,
    ) -> Self {
        Self {
            status: FilterStatus::Cancelled,
            error_message: Some(FilterError::Cancelled.to_string()),
            ..Self::failed(strategy, initial_count, steps, started, "")
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FilterStatus::Success
    }

    /// Human-readable per-step breakdown
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} [{}]: {} -> {} rows ({:.1}% reduction) in {:.1} ms",
            self.strategy,
            self.status,
            self.initial_count,
            self.final_count,
            self.overall_reduction_ratio * 100.0,
            self.total_time_ms
        );
        for (idx, step) in self.steps.iter().enumerate() {
            out.push_str(&format!(
                "\n  {}. {}: {} -> {} ({:.1}%) {:.1} ms",
                idx + 1,
                step.step_type,
                step.input_count,
                step.output_count,
                step.reduction_ratio * 100.0,
                step.execution_time_ms
            ));
        }
        if let Some(error) = &self.error_message {
            out.push_str(&format!("\n  error: {}", error));
        }
        out
    }
}

/// Runs plans against one table
pub struct MultiStepFilterExecutor<'a> {
    conn: &'a dyn QueryConnection,
    table: &'a TableRef,
    config: &'a OptimizerConfig,
}

enum StepError {
    Cancelled,
    Data(DataError),
}

impl From<DataError> for StepError {
    fn from(e: DataError) -> Self {
        Self::Data(e)
    }
}

impl<'a> MultiStepFilterExecutor<'a> {
    pub fn new(
        conn: &'a dyn QueryConnection,
        table: &'a TableRef,
        config: &'a OptimizerConfig,
    ) -> Self {
        Self {
            conn,
            table,
            config,
        }
    }

    /// Execute every step in order
    ///
    /// Never fails: errors and cancellation are reported in the result.
    pub async fn execute_plan(
        &self,
        plan: &FilterPlan,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> FilterPlanResult {
        let started = Instant::now();
        let initial_count = plan.estimated_row_count;
        let total_steps = plan.steps.len();
        let mut results: Vec<FilterStepResult> = Vec::with_capacity(total_steps);

        if plan.is_empty() {
            return FilterPlanResult::failed(
                plan.strategy,
                initial_count,
                results,
                started,
                "Filter plan has no steps",
            );
        }

        let columns = match self.known_columns(plan).await {
            Ok(columns) => columns,
            Err(e) => {
                tracing::warn!(table = %self.table, error = %e, "Could not read table columns");
                return FilterPlanResult::failed(
                    plan.strategy,
                    initial_count,
                    results,
                    started,
                    format!("Failed to read columns of {}: {}", self.table, e),
                );
            }
        };

        let mut candidates: Option<Vec<i64>> = None;

        for (idx, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!(step = idx + 1, "Plan execution cancelled");
                return FilterPlanResult::cancelled(plan.strategy, initial_count, results, started);
            }

            progress.report(
                (idx * 100 / total_steps) as u8,
                &format!("Step {}/{}: {}", idx + 1, total_steps, step.step_type),
            );

            let input_count = candidates
                .as_ref()
                .map_or(initial_count, |ids| ids.len() as u64);
            let step_started = Instant::now();

            let outcome = match self.check_columns(step, columns.as_ref()) {
                Ok(()) => self.execute_step(step, candidates.as_deref(), cancel).await,
                Err(e) => Err(e.into()),
            };
            let (ids, chunks) = match outcome {
                Ok(output) => output,
                Err(StepError::Cancelled) => {
                    tracing::debug!(step = idx + 1, "Plan execution cancelled mid-step");
                    return FilterPlanResult::cancelled(
                        plan.strategy,
                        initial_count,
                        results,
                        started,
                    );
                }
                Err(StepError::Data(e)) => {
                    tracing::warn!(
                        table = %self.table,
                        step = idx + 1,
                        step_type = %step.step_type,
                        error = %e,
                        "Filter step failed"
                    );
                    return FilterPlanResult::failed(
                        plan.strategy,
                        initial_count,
                        results,
                        started,
                        format!("Step {} ({}) failed: {}", idx + 1, step.step_type, e),
                    );
                }
            };

            let output_count = ids.len() as u64;
            results.push(FilterStepResult {
                step_type: step.step_type,
                expression: step.expression.clone(),
                input_count,
                output_count,
                reduction_ratio: reduction(input_count, output_count),
                execution_time_ms: elapsed_ms(step_started),
                chunks,
            });
            tracing::debug!(
                step = idx + 1,
                step_type = %step.step_type,
                input_count,
                output_count,
                chunks,
                "Filter step complete"
            );

            candidates = Some(ids);
            if output_count == 0 {
                tracing::debug!(step = idx + 1, "No candidates left, stopping early");
                break;
            }
        }

        let mut feature_ids = candidates.unwrap_or_default();
        feature_ids.sort_unstable();
        feature_ids.dedup();
        let final_count = feature_ids.len() as u64;

        progress.report(100, "Filter complete");

        FilterPlanResult {
            status: FilterStatus::Success,
            strategy: plan.strategy,
            feature_ids,
            initial_count,
            final_count,
            overall_reduction_ratio: reduction(initial_count, final_count),
            steps: results,
            total_time_ms: elapsed_ms(started),
            error_message: None,
        }
    }

    /// Lowercased column names when the backend needs step columns checked
    async fn known_columns(&self, plan: &FilterPlan) -> Result<Option<HashSet<String>>, DataError> {
        if self.conn.backend() != Backend::Sqlite
            || !plan.steps.iter().any(|step| step.expression.contains('"'))
        {
            return Ok(None);
        }
        sqlite_columns(self.conn, self.table).await.map(Some)
    }

    fn check_columns(
        &self,
        step: &FilterStep,
        columns: Option<&HashSet<String>>,
    ) -> Result<(), DataError> {
        let Some(columns) = columns else {
            return Ok(());
        };
        match parse(&step.expression)
            .fields
            .into_iter()
            .find(|field| !columns.contains(&field.to_lowercase()))
        {
            Some(missing) => Err(DataError::unknown_column(
                self.conn.backend().name(),
                &self.table.to_string(),
                &missing,
            )),
            None => Ok(()),
        }
    }

    /// Run one step, chunking the candidate set when it is too large
    ///
    /// A step that does not take the previous ids as input still only keeps
    /// ids that survived the earlier steps.
    async fn execute_step(
        &self,
        step: &FilterStep,
        candidates: Option<&[i64]>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<i64>, usize), StepError> {
        let Some(candidates) = candidates else {
            let sql = self.step_sql(step, None, step.limit);
            return Ok((self.conn.fetch_ids(&sql).await?, 1));
        };

        if !step.requires_previous_ids {
            let sql = self.step_sql(step, None, None);
            let matched: HashSet<i64> = self.conn.fetch_ids(&sql).await?.into_iter().collect();
            let mut ids: Vec<i64> = candidates
                .iter()
                .copied()
                .filter(|id| matched.contains(id))
                .collect();
            ids.sort_unstable();
            if let Some(limit) = step.limit {
                ids.truncate(limit as usize);
            }
            return Ok((ids, 1));
        }

        if candidates.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let chunk_size = if candidates.len() > self.config.max_in_clause_size {
            step.chunk_size.clamp(1, self.config.max_in_clause_size)
        } else {
            candidates.len()
        };

        let mut ids = Vec::new();
        let mut chunks = 0;
        for chunk in candidates.chunks(chunk_size) {
            if cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            let remaining = match step.limit {
                Some(limit) => {
                    let left = limit.saturating_sub(ids.len() as u64);
                    if left == 0 {
                        break;
                    }
                    Some(left)
                }
                None => None,
            };
            let sql = self.step_sql(step, Some(chunk), remaining);
            ids.extend(self.conn.fetch_ids(&sql).await?);
            chunks += 1;
        }
        Ok((ids, chunks))
    }

    /// `SELECT pk FROM table WHERE [pk IN (...) AND] (expr) [ORDER BY pk LIMIT n]`
    fn step_sql(&self, step: &FilterStep, ids: Option<&[i64]>, limit: Option<u64>) -> String {
        let dialect: &dyn SqlDialect = self.conn.backend().dialect();
        let pk = self.table.quoted_primary_key(dialect);

        let mut conditions: Vec<String> = Vec::with_capacity(2);
        if let Some(ids) = ids {
            let list: Vec<String> = ids.iter().map(i64::to_string).collect();
            conditions.push(format!("{} IN ({})", pk, list.join(", ")));
        }
        let expression = step.expression.trim();
        if !expression.is_empty() {
            conditions.push(format!("({})", expression));
        }

        let mut sql = format!("SELECT {} FROM {}", pk, self.table.qualified_name(dialect));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" ORDER BY {} {}", pk, dialect.limit(limit)));
        }
        tracing::trace!(sql = %sql, "Step query");
        sql
    }
}

fn reduction(input: u64, output: u64) -> f64 {
    if input == 0 {
        0.0
    } else {
        (1.0 - output as f64 / input as f64).clamp(0.0, 1.0)
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
