//! Join-based plan
//!
//! ```text
//! exposures        one row per exposed entity: variant, first exposure
//! metric_events    metric rows joined to exposures, after first exposure
//!                  and inside the conversion window
//! entity_metrics   exposures LEFT JOIN metric_events, one value per entity
//! [winsorize]      clip entity values to percentile bounds
//! final            per-variant count, sum and sum of squares (or funnel
//!                  success/failure counts)
//! ```
//!
//! `exposures` is read twice, so it is a named subquery in the `WITH` prefix
//! of the final query.

use crate::error::Result;
use crate::exposure::{exposure_identifier_expression, first_exposure_expression};
use crate::filters::{TIMESTAMP_COLUMN, column, timestamp_within, warehouse_filter_expr};
use crate::funnel::{funnel_evaluation_expression, step_level_expression};
use crate::model::{ExperimentMetric, MeanMetric, MetricSource, WarehouseSource};
use crate::plan::{
    ENTITY_ID, EVENTS_ALIAS, EXPOSURE_IDENTIFIER, EXPOSURES, FIRST_EXPOSURE_TIME, METRIC_EVENTS,
    PlanParts, STEP, VALUE, VARIANT, WAREHOUSE_ALIAS,
};
use crate::sql::ast::{Expr, Function, and, func, qcol};
use crate::sql::query::{FromClause, JoinKind, QueryBuilder, SelectQuery};
use crate::synth::MetricValue;

/// Build the full join plan
pub(crate) fn build(parts: &PlanParts<'_>) -> Result<SelectQuery> {
    let warehouse = warehouse_source(parts.input.metric);
    let exposures = exposures_stage(parts, warehouse)?;

    let entity_stage = match parts.input.metric {
        ExperimentMetric::Mean(mean) => {
            let value = MetricValue::for_metric(mean, qcol(EXPOSURES, ENTITY_ID), row_alias(mean))?;
            let metric_events = match warehouse {
                Some(source) => warehouse_events_stage(parts, source, value.value)?,
                None => event_rows_stage(parts, value.value, VALUE)?,
            };
            entity_stage(
                exposures,
                metric_events,
                value.aggregation.aggregate(qcol(METRIC_EVENTS, VALUE)),
            )
        }
        ExperimentMetric::Funnel(funnel) => {
            let step = step_level_expression(
                &funnel.series,
                parts.input.actions,
                Some(EVENTS_ALIAS),
            )?;
            let metric_events = event_rows_stage(parts, step, STEP)?;
            let level = funnel_evaluation_expression(
                funnel.num_steps(),
                parts.window_seconds,
                qcol(METRIC_EVENTS, TIMESTAMP_COLUMN),
                qcol(METRIC_EVENTS, STEP),
            );
            entity_stage(exposures, metric_events, level)
        }
    };

    Ok(parts.finish(entity_stage))
}

fn warehouse_source(metric: &ExperimentMetric) -> Option<&WarehouseSource> {
    match metric {
        ExperimentMetric::Mean(MeanMetric {
            source: MetricSource::DataWarehouseNode(source),
            ..
        }) => Some(source),
        _ => None,
    }
}

fn row_alias(mean: &MeanMetric) -> Option<&'static str> {
    match mean.source {
        MetricSource::DataWarehouseNode(_) => Some(WAREHOUSE_ALIAS),
        _ => Some(EVENTS_ALIAS),
    }
}

/// One row per exposed entity
///
/// Warehouse metrics also carry the join identifier of the entity's first
/// exposure.
pub(crate) fn exposures_stage(
    parts: &PlanParts<'_>,
    warehouse: Option<&WarehouseSource>,
) -> Result<SelectQuery> {
    let resolver = parts.resolver();
    let mut builder = QueryBuilder::from_table(parts.input.events_table)
        .select_as(parts.entity_column(None), ENTITY_ID)
        .select_as(resolver.variant_expression(None, None), VARIANT)
        .select_as(
            first_exposure_expression(column(None, TIMESTAMP_COLUMN), None),
            FIRST_EXPOSURE_TIME,
        );

    if let Some(source) = warehouse {
        builder = builder.select_as(
            exposure_identifier_expression(&source.events_join_key, None, None),
            EXPOSURE_IDENTIFIER,
        );
    }

    Ok(builder
        .where_clause(parts.exposure_predicate(None)?)
        .group_by(parts.entity_column(None))
        .build())
}

/// Events-table metric rows of exposed entities
///
/// `row_value` is evaluated against the `e` alias and exposed as
/// `value_name`.
fn event_rows_stage(
    parts: &PlanParts<'_>,
    row_value: Expr,
    value_name: &str,
) -> Result<SelectQuery> {
    let events = FromClause::table_as(parts.input.events_table, EVENTS_ALIAS);
    let from = events.join(
        FromClause::table(EXPOSURES),
        JoinKind::Inner,
        Some(
            parts
                .entity_column(Some(EVENTS_ALIAS))
                .equals(qcol(EXPOSURES, ENTITY_ID)),
        ),
    );

    let timestamp = qcol(EVENTS_ALIAS, TIMESTAMP_COLUMN);
    Ok(QueryBuilder::new(from)
        .select_as(qcol(EXPOSURES, ENTITY_ID), ENTITY_ID)
        .select_as(timestamp.clone(), TIMESTAMP_COLUMN)
        .select_as(row_value, value_name)
        .where_clause(parts.event_metric_predicate(Some(EVENTS_ALIAS))?)
        .where_clause(parts.window_bound(timestamp, qcol(EXPOSURES, FIRST_EXPOSURE_TIME)))
        .build())
}

/// Warehouse rows matched to exposures through the join identifier
fn warehouse_events_stage(
    parts: &PlanParts<'_>,
    source: &WarehouseSource,
    row_value: Expr,
) -> Result<SelectQuery> {
    let table = Some(WAREHOUSE_ALIAS);
    let on = func(
        Function::ToString,
        vec![column(table, &source.data_warehouse_join_key)],
    )
    .equals(func(
        Function::ToString,
        vec![qcol(EXPOSURES, EXPOSURE_IDENTIFIER)],
    ));

    let from = FromClause::table_as(&source.table_name, WAREHOUSE_ALIAS).join(
        FromClause::table(EXPOSURES),
        JoinKind::Inner,
        Some(on),
    );

    let filters = source
        .properties
        .iter()
        .map(|filter| warehouse_filter_expr(filter, table))
        .collect::<Result<Vec<_>>>()?;

    let timestamp = column(table, &source.timestamp_field);
    Ok(QueryBuilder::new(from)
        .select_as(qcol(EXPOSURES, ENTITY_ID), ENTITY_ID)
        .select_as(timestamp.clone(), TIMESTAMP_COLUMN)
        .select_as(row_value, VALUE)
        .where_clause(timestamp_within(timestamp.clone(), &parts.metric_date_range()))
        .where_clause(and(filters))
        .where_clause(parts.window_bound(timestamp, qcol(EXPOSURES, FIRST_EXPOSURE_TIME)))
        .build())
}

/// Every exposed entity with its aggregated metric value
///
/// Entities without metric rows survive the LEFT JOIN with NULL values. The
/// exposures stage is defined here once and read by name from the metric
/// rows as well.
fn entity_stage(exposures: SelectQuery, metric_events: SelectQuery, value: Expr) -> SelectQuery {
    let from = FromClause::table(EXPOSURES).join(
        FromClause::subquery(metric_events, METRIC_EVENTS),
        JoinKind::Left,
        Some(qcol(EXPOSURES, ENTITY_ID).equals(qcol(METRIC_EVENTS, ENTITY_ID))),
    );

    QueryBuilder::new(from)
        .with_cte(EXPOSURES, exposures)
        .select_as(qcol(EXPOSURES, ENTITY_ID), ENTITY_ID)
        .select_as(qcol(EXPOSURES, VARIANT), VARIANT)
        .select_as(value, VALUE)
        .group_by(qcol(EXPOSURES, ENTITY_ID))
        .group_by(qcol(EXPOSURES, VARIANT))
        .build()
}

#[cfg(test)]
#[path = "join_test.rs"]
mod join_test;
