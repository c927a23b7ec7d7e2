//! Plan builders
//!
//! Two plans compute the same per-variant aggregates:
//!
//! - **join**: exposures, metric events joined to exposures, per-entity
//!   aggregation, optional winsorization, per-variant aggregation
//! - **single_scan**: one pass over the events table collecting exposure
//!   fields and `(timestamp, value)` arrays per entity, then a post-filter
//!   and the same tail stages
//!
//! Both plans are built from the same predicates and value expressions and
//! rendered through the same SQL renderer.

pub mod join;
pub mod single_scan;
pub mod winsorize;

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};
use crate::exposure::ExposureResolver;
use crate::filters::{
    TIMESTAMP_COLUMN, action_predicate, column, event_predicate, test_account_predicate,
    timestamp_within,
};
use crate::funnel::{any_step_filter, funnel_completion_predicate};
use crate::model::{
    ActionCatalog, DateRange, EntityKey, Experiment, ExperimentMetric, ExposureCriteria,
    MeanMetric, MetricKind, MetricSource, TeamSettings,
};
use crate::sql::ast::{
    AggregateFunction, Expr, Function, Literal, agg, agg_if, and, col, func, lit_int, lit_str,
};
use crate::sql::query::{FromClause, QueryBuilder, SelectQuery};
use crate::sql::render::render_query;

/// Entity id column of every stage
pub const ENTITY_ID: &str = "entity_id";
/// Variant column of every stage
pub const VARIANT: &str = "variant";
/// Per-row or per-entity value column
pub const VALUE: &str = "value";
/// Earliest exposure column
pub const FIRST_EXPOSURE_TIME: &str = "first_exposure_time";
/// Warehouse join identifier column
pub const EXPOSURE_IDENTIFIER: &str = "exposure_identifier";
/// Funnel step label column
pub const STEP: &str = "step";

/// Output columns
pub const NUM_USERS: &str = "num_users";
pub const TOTAL_SUM: &str = "total_sum";
pub const TOTAL_SUM_OF_SQUARES: &str = "total_sum_of_squares";
pub const SUCCESS_COUNT: &str = "success_count";
pub const FAILURE_COUNT: &str = "failure_count";

/// Stage aliases
pub const EXPOSURES: &str = "exposures";
pub const METRIC_EVENTS: &str = "metric_events";
pub const ENTITY_METRICS: &str = "entity_metrics";
/// Alias of the raw events table inside joins
pub const EVENTS_ALIAS: &str = "e";
/// Alias of a warehouse table inside joins
pub const WAREHOUSE_ALIAS: &str = "wh";

/// Default events table
pub const DEFAULT_EVENTS_TABLE: &str = "events";

/// Which plan to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// Single scan when the metric allows it, join otherwise
    #[default]
    Auto,
    /// Join-based plan
    Join,
    /// Single-scan plan
    SingleScan,
}

impl PlanStrategy {
    /// Resolve `Auto` and reject combinations the single scan cannot run
    pub fn resolve(self, metric: &ExperimentMetric) -> Result<Self> {
        let scannable = match metric {
            ExperimentMetric::Mean(mean) => {
                !matches!(mean.source, MetricSource::DataWarehouseNode(_))
            }
            ExperimentMetric::Funnel(_) => false,
        };

        match self {
            Self::Auto if scannable => Ok(Self::SingleScan),
            Self::Auto => Ok(Self::Join),
            Self::SingleScan if !scannable => Err(ExperimentError::UnsupportedMetric(format!(
                "single_scan plan cannot evaluate {} metrics over this source",
                metric.kind()
            ))),
            other => Ok(other),
        }
    }

    /// Name used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Join => "join",
            Self::SingleScan => "single_scan",
        }
    }
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStrategy {
    type Err = ExperimentError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "join" => Ok(Self::Join),
            "single_scan" | "single-scan" => Ok(Self::SingleScan),
            other => Err(ExperimentError::InvalidExperiment(format!(
                "unknown plan strategy '{}' (expected auto, join or single_scan)",
                other
            ))),
        }
    }
}

/// Inputs of one compilation
pub struct PlanInput<'a> {
    /// Experiment being analysed
    pub experiment: &'a Experiment,
    /// Metric to compute
    pub metric: &'a ExperimentMetric,
    /// Experiment date range
    pub date_range: DateRange,
    /// Saved actions
    pub actions: &'a dyn ActionCatalog,
    /// Team settings
    pub team: &'a TeamSettings,
    /// Events table name
    pub events_table: &'a str,
}

impl<'a> PlanInput<'a> {
    /// Inputs reading from the default events table
    pub fn new(
        experiment: &'a Experiment,
        metric: &'a ExperimentMetric,
        date_range: DateRange,
        actions: &'a dyn ActionCatalog,
        team: &'a TeamSettings,
    ) -> Self {
        Self {
            experiment,
            metric,
            date_range,
            actions,
            team,
            events_table: DEFAULT_EVENTS_TABLE,
        }
    }

    /// Read from another events table
    pub fn with_events_table(mut self, table: &'a str) -> Self {
        self.events_table = table;
        self
    }
}

/// A compiled plan
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    /// Plan that was built
    pub strategy: PlanStrategy,
    /// Kind of the compiled metric
    pub kind: MetricKind,
    /// The query
    pub query: SelectQuery,
}

impl CompiledPlan {
    /// ClickHouse SQL for the plan
    pub fn sql(&self) -> String {
        render_query(&self.query)
    }
}

/// Compile a metric into a plan
pub fn compile(input: &PlanInput<'_>, strategy: PlanStrategy) -> Result<CompiledPlan> {
    input.experiment.validate()?;
    input.metric.validate()?;

    let resolved = strategy.resolve(input.metric)?;
    let parts = PlanParts::new(input);
    let query = match resolved {
        PlanStrategy::SingleScan => single_scan::build(&parts)?,
        PlanStrategy::Join | PlanStrategy::Auto => join::build(&parts)?,
    };

    tracing::debug!(
        experiment_id = input.experiment.id,
        requested = %strategy,
        strategy = %resolved,
        metric_kind = %input.metric.kind(),
        "compiled experiment plan"
    );

    Ok(CompiledPlan {
        strategy: resolved,
        kind: input.metric.kind(),
        query,
    })
}

/// Build the join-based plan
pub fn build_join_plan(input: &PlanInput<'_>) -> Result<CompiledPlan> {
    compile(input, PlanStrategy::Join)
}

/// Build the single-scan plan
pub fn build_single_scan_plan(input: &PlanInput<'_>) -> Result<CompiledPlan> {
    compile(input, PlanStrategy::SingleScan)
}

// =============================================================================
// Shared plan parts
// =============================================================================

/// Values derived once per compilation and shared by both plans
pub(crate) struct PlanParts<'a> {
    pub input: &'a PlanInput<'a>,
    pub criteria: ExposureCriteria,
    pub variants: Vec<String>,
    pub entity: EntityKey,
    pub window_seconds: Option<i64>,
}

impl<'a> PlanParts<'a> {
    fn new(input: &'a PlanInput<'a>) -> Self {
        Self {
            input,
            criteria: input.experiment.criteria(),
            variants: input.experiment.variant_keys(),
            entity: input.experiment.entity_key(),
            window_seconds: input.metric.conversion_window_seconds(),
        }
    }

    pub fn resolver(&self) -> ExposureResolver<'_> {
        ExposureResolver {
            criteria: &self.criteria,
            feature_flag_key: &self.input.experiment.feature_flag_key,
            variants: &self.variants,
            date_range: self.input.date_range,
            actions: self.input.actions,
            team: self.input.team,
        }
    }

    /// Entity id column of an events row
    pub fn entity_column(&self, table: Option<&str>) -> Expr {
        column(table, &self.entity.column_name())
    }

    /// Exposure rows, with a non-empty group key for group experiments
    pub fn exposure_predicate(&self, table: Option<&str>) -> Result<Expr> {
        let mut parts = vec![self.resolver().predicate(table)?];
        if let EntityKey::Group(_) = self.entity {
            parts.push(self.entity_column(table).not_equals(lit_str("")));
        }
        Ok(and(parts))
    }

    /// Date range metric rows may fall in, extended by the conversion window
    pub fn metric_date_range(&self) -> DateRange {
        let range = self.input.date_range;
        match self.window_seconds {
            Some(window) => DateRange::new(range.from, range.to + Duration::seconds(window)),
            None => range,
        }
    }

    /// Metric rows of an events-backed metric (mean over events/actions, or
    /// funnel steps)
    pub fn event_metric_predicate(&self, table: Option<&str>) -> Result<Expr> {
        let source = match self.input.metric {
            ExperimentMetric::Mean(mean) => match &mean.source {
                MetricSource::EventsNode(source) => event_predicate(source, table)?,
                MetricSource::ActionsNode(source) => {
                    action_predicate(source.id, &source.properties, self.input.actions, table)?
                }
                MetricSource::DataWarehouseNode(source) => {
                    return Err(ExperimentError::UnsupportedMetric(format!(
                        "warehouse table '{}' is not an events source",
                        source.table_name
                    )));
                }
            },
            ExperimentMetric::Funnel(funnel) => {
                any_step_filter(&funnel.series, self.input.actions, table)?
            }
        };

        Ok(and(vec![
            timestamp_within(column(table, TIMESTAMP_COLUMN), &self.metric_date_range()),
            source,
            test_account_predicate(self.criteria.filter_test_accounts, self.input.team, table)?,
        ]))
    }

    /// Metric rows must not be later than the conversion window allows
    pub fn window_bound(&self, timestamp: Expr, first_exposure: Expr) -> Expr {
        let mut parts = vec![timestamp.clone().gt_eq(first_exposure.clone())];
        if let Some(window) = self.window_seconds {
            parts.push(timestamp.lt(func(
                Function::AddSeconds,
                vec![first_exposure, lit_int(window)],
            )));
        }
        and(parts)
    }

    /// Mean metric being compiled
    pub fn mean_metric(&self) -> Option<&MeanMetric> {
        match self.input.metric {
            ExperimentMetric::Mean(mean) => Some(mean),
            ExperimentMetric::Funnel(_) => None,
        }
    }

    /// Winsorization stage (when configured) and final per-variant stage
    ///
    /// Named subqueries of the entity stage are defined on the final query.
    pub fn finish(&self, entity_stage: SelectQuery) -> SelectQuery {
        let mut entity_stage = match self.mean_metric() {
            Some(mean) if mean.is_winsorized() => winsorize::winsorize(
                entity_stage,
                mean.lower_bound_percentile,
                mean.upper_bound_percentile,
            ),
            _ => entity_stage,
        };

        let ctes = entity_stage.take_ctes();
        let builder = QueryBuilder::new(FromClause::subquery(entity_stage, ENTITY_METRICS))
            .with_ctes(ctes)
            .select(col(VARIANT))
            .select_as(agg(AggregateFunction::Count, vec![col(ENTITY_ID)]), NUM_USERS);

        let builder = match self.input.metric {
            ExperimentMetric::Mean(_) => builder
                .select_as(agg(AggregateFunction::Sum, vec![col(VALUE)]), TOTAL_SUM)
                .select_as(
                    agg(
                        AggregateFunction::Sum,
                        vec![func(Function::Pow, vec![col(VALUE), lit_int(2)])],
                    ),
                    TOTAL_SUM_OF_SQUARES,
                ),
            ExperimentMetric::Funnel(funnel) => {
                let completed = funnel_completion_predicate(col(VALUE), funnel.num_steps());
                builder
                    .select_as(
                        agg_if(AggregateFunction::Count, Vec::new(), completed.clone()),
                        SUCCESS_COUNT,
                    )
                    .select_as(
                        agg(AggregateFunction::Count, vec![col(ENTITY_ID)])
                            .minus(agg_if(AggregateFunction::Count, Vec::new(), completed)),
                        FAILURE_COUNT,
                    )
            }
        };

        builder
            .group_by(col(VARIANT))
            .order_by(col(VARIANT))
            .setting("join_use_nulls", Literal::Int(1))
            .build()
    }
}

#[cfg(test)]
#[path = "plan_test.rs"]
mod plan_test;
