//! Single-scan plan
//!
//! One pass over the events table, grouped by entity. Exposure fields are
//! conditional aggregates over exposure rows; metric rows are collected as
//! `(timestamp, value)` tuples. A post-filter keeps the tuples after the
//! first exposure and inside the conversion window, then folds them with the
//! array form of the metric's aggregation.

use crate::error::{ExperimentError, Result};
use crate::exposure::first_exposure_expression;
use crate::filters::{SESSION_COLUMN, TIMESTAMP_COLUMN, UUID_COLUMN, column};
use crate::model::ExperimentMetric;
use crate::plan::{
    ENTITY_ID, EXPOSURES, FIRST_EXPOSURE_TIME, METRIC_EVENTS, PlanParts, VALUE, VARIANT,
};
use crate::sql::ast::{
    AggregateFunction, Expr, Function, agg_if, and, col, func, lambda, lit_bool, or,
};
use crate::sql::query::{FromClause, QueryBuilder, SelectQuery};
use crate::synth::MetricValue;

/// uuid of the entity's first exposure event
pub const EXPOSURE_EVENT_UUID: &str = "exposure_event_uuid";
/// Session of the entity's first exposure event
pub const EXPOSURE_SESSION_ID: &str = "exposure_session_id";

const ELEMENT: &str = "x";

/// Build the full single-scan plan
pub(crate) fn build(parts: &PlanParts<'_>) -> Result<SelectQuery> {
    let ExperimentMetric::Mean(mean) = parts.input.metric else {
        return Err(ExperimentError::UnsupportedMetric(
            "single_scan plan only evaluates mean metrics".to_string(),
        ));
    };

    let value = MetricValue::for_metric(mean, parts.entity_column(None), None)?;
    let scan = scan_stage(parts, value.value)?;

    let element = col(ELEMENT);
    let keep = and(vec![
        parts.window_bound(element.clone().element(1), col(FIRST_EXPOSURE_TIME)),
        element.clone().element(2).is_not_null(),
    ])
    .or_else(lit_bool(false));
    let values = func(
        Function::ArrayMap,
        vec![
            lambda(ELEMENT, element.element(2)),
            func(
                Function::ArrayFilter,
                vec![lambda(ELEMENT, keep), col(METRIC_EVENTS)],
            ),
        ],
    );

    let entity_stage = QueryBuilder::new(FromClause::subquery(scan, EXPOSURES))
        .select(col(ENTITY_ID))
        .select(col(VARIANT))
        .select_as(value.aggregation.aggregate_array(values), VALUE)
        .where_clause(col(FIRST_EXPOSURE_TIME).is_not_null())
        .build();

    Ok(parts.finish(entity_stage))
}

/// Per-entity exposure fields and metric tuples in one pass
fn scan_stage(parts: &PlanParts<'_>, row_value: Expr) -> Result<SelectQuery> {
    let exposure = parts.exposure_predicate(None)?;
    let metric = parts.event_metric_predicate(None)?;
    let timestamp = column(None, TIMESTAMP_COLUMN);

    let first_exposure_of = |value: Expr| {
        agg_if(
            AggregateFunction::ArgMin,
            vec![value, timestamp.clone()],
            exposure.clone(),
        )
    };

    Ok(QueryBuilder::from_table(parts.input.events_table)
        .select_as(parts.entity_column(None), ENTITY_ID)
        .select_as(
            parts.resolver().variant_expression(None, Some(exposure.clone())),
            VARIANT,
        )
        .select_as(
            first_exposure_expression(timestamp.clone(), Some(exposure.clone())),
            FIRST_EXPOSURE_TIME,
        )
        .select_as(first_exposure_of(column(None, UUID_COLUMN)), EXPOSURE_EVENT_UUID)
        .select_as(first_exposure_of(column(None, SESSION_COLUMN)), EXPOSURE_SESSION_ID)
        .select_as(
            agg_if(
                AggregateFunction::GroupArray,
                vec![Expr::Tuple(vec![timestamp.clone(), row_value])],
                metric.clone(),
            ),
            METRIC_EVENTS,
        )
        .where_clause(or(vec![exposure, metric]))
        .group_by(parts.entity_column(None))
        .build())
}

#[cfg(test)]
#[path = "single_scan_test.rs"]
mod single_scan_test;
