//! Winsorization stage
//!
//! Clips every entity value into `[lower_bound, upper_bound]`, where each
//! bound is the exact quantile of the entity values at the configured
//! percentile, or the minimum/maximum when that percentile is unset.

use crate::plan::{ENTITY_ID, ENTITY_METRICS, VALUE, VARIANT};
use crate::sql::ast::{AggregateFunction, Expr, Function, agg, col, func, qcol};
use crate::sql::query::{FromClause, JoinKind, QueryBuilder, SelectQuery};

pub const LOWER_BOUND: &str = "lower_bound";
pub const UPPER_BOUND: &str = "upper_bound";
const BOUNDS: &str = "bounds";
const ENTITY_VALUES: &str = "entity_values";

/// Bound aggregate for an optional percentile
fn bound_expression(percentile: Option<f64>, fallback: AggregateFunction) -> Expr {
    match percentile {
        Some(p) => agg(AggregateFunction::QuantileExact(p), vec![col(VALUE)]),
        None => agg(fallback, vec![col(VALUE)]),
    }
}

/// `least(greatest(value, lower), upper)`
pub fn clip_expression(value: Expr, lower: Expr, upper: Expr) -> Expr {
    func(
        Function::Least,
        vec![func(Function::Greatest, vec![value, lower]), upper],
    )
}

/// Wrap an entity stage with winsorization
///
/// The stage is defined once as `entity_values` and read twice: for the
/// bounds and for the clipped rows. Named subqueries of the stage move up to
/// the result. The result has the same `entity_id, variant, value` columns.
pub fn winsorize(
    mut entity_stage: SelectQuery,
    lower_percentile: Option<f64>,
    upper_percentile: Option<f64>,
) -> SelectQuery {
    let ctes = entity_stage.take_ctes();

    let bounds = QueryBuilder::from_table(ENTITY_VALUES)
        .select_as(
            bound_expression(lower_percentile, AggregateFunction::Min),
            LOWER_BOUND,
        )
        .select_as(
            bound_expression(upper_percentile, AggregateFunction::Max),
            UPPER_BOUND,
        )
        .build();

    let from = FromClause::table_as(ENTITY_VALUES, ENTITY_METRICS).join(
        FromClause::subquery(bounds, BOUNDS),
        JoinKind::Cross,
        None,
    );

    QueryBuilder::new(from)
        .with_ctes(ctes)
        .with_cte(ENTITY_VALUES, entity_stage)
        .select_as(qcol(ENTITY_METRICS, ENTITY_ID), ENTITY_ID)
        .select_as(qcol(ENTITY_METRICS, VARIANT), VARIANT)
        .select_as(
            clip_expression(
                qcol(ENTITY_METRICS, VALUE),
                qcol(BOUNDS, LOWER_BOUND),
                qcol(BOUNDS, UPPER_BOUND),
            ),
            VALUE,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::render::render_query;

    fn entity_stage() -> SelectQuery {
        QueryBuilder::from_table("entities")
            .select(col(ENTITY_ID))
            .select(col(VARIANT))
            .select(col(VALUE))
            .build()
    }

    #[test]
    fn test_both_bounds() {
        let sql = render_query(&winsorize(entity_stage(), Some(0.05), Some(0.95)));
        assert!(sql.contains("quantileExact(0.05)(value) AS lower_bound"));
        assert!(sql.contains("quantileExact(0.95)(value) AS upper_bound"));
        assert!(sql.contains("CROSS JOIN"));
        assert!(sql.contains(
            "least(greatest(entity_metrics.value, bounds.lower_bound), bounds.upper_bound) AS value"
        ));
    }

    #[test]
    fn test_missing_bound_falls_back_to_extremes() {
        let sql = render_query(&winsorize(entity_stage(), None, Some(0.9)));
        assert!(sql.contains("min(value) AS lower_bound"));
        assert!(sql.contains("quantileExact(0.9)(value) AS upper_bound"));
    }

    #[test]
    fn test_stage_is_defined_once() {
        let sql = render_query(&winsorize(entity_stage(), Some(0.05), Some(0.95)));
        assert!(sql.starts_with(
            "WITH entity_values AS (SELECT entity_id, variant, value FROM entities) SELECT"
        ));
        assert_eq!(sql.matches("FROM entities").count(), 1);
        assert!(sql.contains("FROM entity_values AS entity_metrics CROSS JOIN (SELECT"));
        assert!(sql.contains("AS upper_bound FROM entity_values) AS bounds"));
    }

    #[test]
    fn test_stage_ctes_move_to_result() {
        let stage = QueryBuilder::from_table("exposures")
            .with_cte(
                "exposures",
                QueryBuilder::from_table("events").select(col(ENTITY_ID)).build(),
            )
            .select(col(ENTITY_ID))
            .select(col(VARIANT))
            .select(col(VALUE))
            .build();

        let query = winsorize(stage, None, Some(0.9));
        let names: Vec<&str> = query.ctes.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["exposures", ENTITY_VALUES]);
        assert!(query.ctes[1].1.ctes.is_empty());
    }

    #[test]
    fn test_output_columns_unchanged() {
        let query = winsorize(entity_stage(), Some(0.1), None);
        assert_eq!(query.output_names(), vec!["entity_id", "variant", "value"]);
    }
}
