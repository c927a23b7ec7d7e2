//! Funnel evaluator
//!
//! Every candidate row gets exactly one step label (first matching step
//! wins). An entity's funnel level is the number of consecutive steps it
//! reached in order inside the conversion window; it completed the funnel
//! when the level equals the number of steps.

use crate::error::Result;
use crate::filters::{action_predicate, event_predicate};
use crate::model::{ActionCatalog, StepSource};
use crate::sql::ast::{
    AggregateFunction, Expr, Function, agg, func, lit_bool, lit_int, lit_str, or,
};

/// Label of rows matching no step
pub const STEP_UNKNOWN: &str = "step_unknown";

/// Window used when a funnel has no conversion window (ten years)
pub const DEFAULT_FUNNEL_WINDOW_SECONDS: i64 = 3_650 * 86_400;

/// Label of step `index`
pub fn step_label(index: usize) -> String {
    format!("step_{}", index)
}

/// Rows matching one step
pub fn step_filter(
    step: &StepSource,
    actions: &dyn ActionCatalog,
    table: Option<&str>,
) -> Result<Expr> {
    match step {
        StepSource::EventsNode(source) => event_predicate(source, table),
        StepSource::ActionsNode(source) => {
            action_predicate(source.id, &source.properties, actions, table)
        }
    }
}

/// Rows matching any step
pub fn any_step_filter(
    series: &[StepSource],
    actions: &dyn ActionCatalog,
    table: Option<&str>,
) -> Result<Expr> {
    let filters = series
        .iter()
        .map(|step| step_filter(step, actions, table))
        .collect::<Result<Vec<_>>>()?;
    Ok(or(filters))
}

/// Step label of a row: `step_<i>` for the first matching step,
/// `step_unknown` otherwise
pub fn step_level_expression(
    series: &[StepSource],
    actions: &dyn ActionCatalog,
    table: Option<&str>,
) -> Result<Expr> {
    let branches = series
        .iter()
        .enumerate()
        .map(|(i, step)| Ok((step_filter(step, actions, table)?, lit_str(step_label(i)))))
        .collect::<Result<Vec<_>>>()?;

    Ok(Expr::MultiIf {
        branches,
        otherwise: Box::new(lit_str(STEP_UNKNOWN)),
    })
}

/// Funnel level reached by an entity, 0 when it has no step rows
///
/// `timestamp` and `step` are the row timestamp and step label columns.
pub fn funnel_evaluation_expression(
    num_steps: usize,
    window_seconds: Option<i64>,
    timestamp: Expr,
    step: Expr,
) -> Expr {
    let window = window_seconds.unwrap_or(DEFAULT_FUNNEL_WINDOW_SECONDS);

    let mut args = Vec::with_capacity(num_steps + 1);
    args.push(func(Function::ToDateTime, vec![timestamp]));
    for i in 0..num_steps {
        args.push(step.clone().equals(lit_str(step_label(i))).or_else(lit_bool(false)));
    }

    agg(AggregateFunction::WindowFunnel(window), args).or_else(lit_int(0))
}

/// True when the funnel level covers every step
pub fn funnel_completion_predicate(level: Expr, num_steps: usize) -> Expr {
    level.gt_eq(lit_int(num_steps as i64))
}
