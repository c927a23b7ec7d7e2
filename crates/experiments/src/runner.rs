//! Experiment query runner
//!
//! Compiles one metric of an experiment, executes the plan and shapes the
//! rows into per-variant statistics.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    Action, ActionSet, CONTROL_VARIANT, Experiment, MetricKind, PropertyFilter, TeamSettings,
};
use crate::plan::{CompiledPlan, DEFAULT_EVENTS_TABLE, PlanInput, PlanStrategy, compile};
use crate::result::{
    VariantRow, VariantStatistics, order_rows, parse_rows, statistics, validate_rows,
};
use crate::sql::query::SelectQuery;
use crate::sql::render::render_query;
use tally_query::{QueryBackend, QueryError, QueryResult};

/// Something that can execute a compiled plan
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    /// Execute the plan and return its rows
    async fn execute_plan(
        &self,
        query: &SelectQuery,
    ) -> std::result::Result<QueryResult, QueryError>;

    /// Executor name for logging
    fn name(&self) -> &'static str;
}

/// Executes plans by rendering SQL for a query backend
#[derive(Clone)]
pub struct SqlExecutor {
    backend: Arc<dyn QueryBackend>,
}

impl SqlExecutor {
    /// Create an executor over a backend
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl PlanExecutor for SqlExecutor {
    async fn execute_plan(
        &self,
        query: &SelectQuery,
    ) -> std::result::Result<QueryResult, QueryError> {
        let sql = render_query(query);
        self.backend.execute(&sql).await
    }

    fn name(&self) -> &'static str {
        self.backend.name()
    }
}

/// Experiment plus the model data its metrics reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRequest {
    /// The experiment
    pub experiment: Experiment,
    /// Saved actions referenced by metrics or exposure criteria
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Team test-account filters
    #[serde(default)]
    pub test_account_filters: Vec<PropertyFilter>,
}

impl ExperimentRequest {
    /// Request without actions or test-account filters
    pub fn new(experiment: Experiment) -> Self {
        Self {
            experiment,
            actions: Vec::new(),
            test_account_filters: Vec::new(),
        }
    }
}

/// Statistics of one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentQueryResponse {
    /// Metric kind
    pub kind: MetricKind,
    /// Plan that produced the rows
    pub strategy: PlanStrategy,
    /// Variant keys with data, in canonical order
    pub variants: Vec<String>,
    /// Per-variant statistics, in the same order
    pub statistics: Vec<VariantStatistics>,
    /// Raw per-variant aggregates, in the same order
    pub rows: Vec<VariantRow>,
    /// SQL of the executed plan
    pub sql: String,
}

/// Compiles and runs experiment metrics
pub struct ExperimentQueryRunner {
    executor: Arc<dyn PlanExecutor>,
    strategy: PlanStrategy,
    events_table: String,
    control_variant: String,
}

impl ExperimentQueryRunner {
    /// Runner with the automatic plan strategy
    pub fn new(executor: Arc<dyn PlanExecutor>) -> Self {
        Self {
            executor,
            strategy: PlanStrategy::Auto,
            events_table: DEFAULT_EVENTS_TABLE.to_string(),
            control_variant: CONTROL_VARIANT.to_string(),
        }
    }

    /// Use a specific plan strategy
    pub fn with_strategy(mut self, strategy: PlanStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Read events from another table
    pub fn with_events_table(mut self, table: impl Into<String>) -> Self {
        self.events_table = table.into();
        self
    }

    /// Use another control variant key
    pub fn with_control_variant(mut self, key: impl Into<String>) -> Self {
        self.control_variant = key.into();
        self
    }

    /// Executor name
    pub fn executor_name(&self) -> &'static str {
        self.executor.name()
    }

    /// Compile metric `metric_index` of the request
    ///
    /// `now` closes the date range of experiments that are still running.
    pub fn compile(
        &self,
        request: &ExperimentRequest,
        metric_index: usize,
        now: DateTime<Utc>,
    ) -> Result<CompiledPlan> {
        let experiment = &request.experiment;
        let metric = experiment.metric(metric_index)?;
        let actions: ActionSet = request.actions.iter().cloned().collect();
        let team = TeamSettings {
            test_account_filters: request.test_account_filters.clone(),
        };

        let input = PlanInput::new(
            experiment,
            metric,
            experiment.date_range(now),
            &actions,
            &team,
        )
        .with_events_table(&self.events_table);

        compile(&input, self.strategy)
    }

    /// Compile, execute and shape metric `metric_index` of the request
    pub async fn run(
        &self,
        request: &ExperimentRequest,
        metric_index: usize,
        now: DateTime<Utc>,
    ) -> Result<ExperimentQueryResponse> {
        let plan = self.compile(request, metric_index, now)?;

        let start = Instant::now();
        let result = self.executor.execute_plan(&plan.query).await?;
        tracing::debug!(
            experiment_id = request.experiment.id,
            executor = self.executor.name(),
            strategy = %plan.strategy,
            rows = result.row_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "executed experiment plan"
        );

        let rows = parse_rows(plan.kind, &result)?;
        let rows = order_rows(rows, &request.experiment.variant_keys());

        let test_variants: Vec<String> = request
            .experiment
            .variants
            .iter()
            .filter(|key| **key != self.control_variant)
            .cloned()
            .collect();
        validate_rows(&rows, &self.control_variant, &test_variants)?;

        Ok(ExperimentQueryResponse {
            kind: plan.kind,
            strategy: plan.strategy,
            variants: rows.iter().map(|row| row.variant().to_string()).collect(),
            statistics: statistics(&rows),
            sql: plan.sql(),
            rows,
        })
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod runner_test;
