//! Tests for the expression synthesizer

use crate::error::ExperimentError;
use crate::model::{
    ActionSource, EventSource, MathType, MeanMetric, MetricSource, WarehouseSource,
};
use crate::sql::ast::{col, lit_int, qcol};
use crate::sql::render::render_expr;
use crate::synth::{
    AggregationName, MetricValue, ValueAggregation, aggregation_expression,
    extract_aggregation_and_inner_expr, get_metric_value, value_expression,
};

fn events() -> MetricSource {
    MetricSource::EventsNode(EventSource::named("purchase"))
}

fn warehouse() -> MetricSource {
    MetricSource::DataWarehouseNode(WarehouseSource {
        table_name: "payments".into(),
        timestamp_field: "paid_at".into(),
        data_warehouse_join_key: "customer_email".into(),
        events_join_key: "person.properties.email".into(),
        properties: Vec::new(),
    })
}

// =============================================================================
// Aggregation extraction
// =============================================================================

#[test]
fn test_extract_sum_of_difference() {
    let (name, inner) = extract_aggregation_and_inner_expr("sum(a - b)").unwrap();
    assert_eq!(name, Some(AggregationName::Sum));
    assert_eq!(inner.to_string(), "a - b");
}

#[test]
fn test_extract_without_aggregation() {
    let (name, inner) = extract_aggregation_and_inner_expr("a + b").unwrap();
    assert_eq!(name, None);
    assert_eq!(inner.to_string(), "a + b");
}

#[test]
fn test_extract_count_distinct() {
    let (name, inner) =
        extract_aggregation_and_inner_expr("count(distinct properties.plan)").unwrap();
    assert_eq!(name, Some(AggregationName::Count));
    assert_eq!(inner.to_string(), "properties.plan");
}

#[test]
fn test_extract_nested_and_uppercase() {
    let (name, inner) = extract_aggregation_and_inner_expr("(MAX(x))").unwrap();
    assert_eq!(name, Some(AggregationName::Max));
    assert_eq!(inner.to_string(), "x");
}

#[test]
fn test_extract_non_aggregate_function() {
    let (name, inner) = extract_aggregation_and_inner_expr("abs(x)").unwrap();
    assert_eq!(name, None);
    assert_eq!(inner.to_string(), "abs(x)");
}

#[test]
fn test_extract_rejects_garbage() {
    assert!(matches!(
        extract_aggregation_and_inner_expr("sum("),
        Err(ExperimentError::InvalidExpression(_))
    ));
    assert!(extract_aggregation_and_inner_expr("sum(x) y z").is_err());
}

// =============================================================================
// Value expressions
// =============================================================================

#[test]
fn test_total_without_property_is_one_for_every_source() {
    let sources = [
        events(),
        MetricSource::ActionsNode(ActionSource::new(1)),
        warehouse(),
    ];
    for source in sources {
        let metric = MeanMetric::new(source);
        assert_eq!(value_expression(&metric, col("person_id"), None).unwrap(), lit_int(1));
    }
}

#[test]
fn test_property_math_without_property_is_one() {
    let metric = MeanMetric::new(events()).with_math(MathType::Sum);
    assert_eq!(get_metric_value(&metric, None), lit_int(1));
}

#[test]
fn test_event_property_is_numeric_json() {
    let metric = MeanMetric::new(events())
        .with_math(MathType::Sum)
        .with_property("amount");
    let sql = render_expr(&get_metric_value(&metric, Some("e")));
    assert!(sql.starts_with("toFloat64OrNull(replaceRegexpAll("));
    assert!(sql.contains("JSONExtractRaw(e.properties, 'amount')"));
}

#[test]
fn test_warehouse_property_is_raw_column() {
    let metric = MeanMetric::new(warehouse())
        .with_math(MathType::Avg)
        .with_property("amount");
    assert_eq!(
        render_expr(&get_metric_value(&metric, Some("wh"))),
        "toFloat64OrNull(toString(wh.amount))"
    );
}

#[test]
fn test_distinct_math_values() {
    let sessions = MeanMetric::new(events()).with_math(MathType::UniqueSession);
    assert_eq!(
        render_expr(&value_expression(&sessions, col("person_id"), Some("e")).unwrap()),
        "e.`$session_id`"
    );

    let dau = MeanMetric::new(events()).with_math(MathType::Dau);
    assert_eq!(
        value_expression(&dau, qcol("exposures", "entity_id"), Some("e")).unwrap(),
        qcol("exposures", "entity_id")
    );

    let warehouse_sessions = MeanMetric::new(warehouse()).with_math(MathType::UniqueSession);
    assert!(matches!(
        value_expression(&warehouse_sessions, col("x"), None),
        Err(ExperimentError::UnsupportedMetric(_))
    ));
}

// =============================================================================
// Aggregations
// =============================================================================

#[test]
fn test_aggregation_expressions() {
    let render = |math: MathType| {
        let metric = MeanMetric::new(events()).with_math(math);
        render_expr(&aggregation_expression(&metric, col("value")).unwrap())
    };

    assert_eq!(render(MathType::Total), "coalesce(sum(value), 0)");
    assert_eq!(render(MathType::Sum), "coalesce(sum(value), 0)");
    assert_eq!(render(MathType::Avg), "coalesce(avg(value), 0)");
    assert_eq!(render(MathType::Min), "coalesce(min(value), 0)");
    assert_eq!(render(MathType::Max), "coalesce(max(value), 0)");
    assert_eq!(render(MathType::UniqueSession), "uniqExact(value)");
    assert_eq!(render(MathType::Dau), "uniqExact(value)");
    assert_eq!(render(MathType::Unrecognized), "coalesce(sum(value), 0)");
}

#[test]
fn test_array_aggregations() {
    let render = |a: ValueAggregation| render_expr(&a.aggregate_array(col("vals")));

    assert_eq!(render(ValueAggregation::Sum), "arraySum(vals)");
    assert_eq!(render(ValueAggregation::Min), "if(empty(vals), 0, arrayMin(vals))");
    assert_eq!(render(ValueAggregation::Avg), "if(empty(vals), 0, arrayAvg(vals))");
    assert_eq!(render(ValueAggregation::Count), "length(vals)");
    assert_eq!(render(ValueAggregation::Distinct), "length(arrayDistinct(vals))");
}

// =============================================================================
// Custom expressions
// =============================================================================

#[test]
fn test_custom_expression_value() {
    let metric = MeanMetric::new(events())
        .with_expression("sum(properties.price - properties.discount)");
    let value = MetricValue::for_metric(&metric, col("person_id"), None).unwrap();

    assert_eq!(value.aggregation, ValueAggregation::Sum);
    let sql = render_expr(&value.value);
    assert!(sql.starts_with("(toFloat64OrNull("));
    assert!(sql.contains("'price'"));
    assert!(sql.contains(" - toFloat64OrNull("));
}

#[test]
fn test_custom_expression_count_distinct_uses_text() {
    let metric =
        MeanMetric::new(events()).with_expression("count(distinct person.properties.email)");
    let value = MetricValue::for_metric(&metric, col("person_id"), None).unwrap();

    assert_eq!(value.aggregation, ValueAggregation::Distinct);
    let sql = render_expr(&value.value);
    assert!(sql.starts_with("replaceRegexpAll("));
    assert!(sql.contains("person_properties"));
}

#[test]
fn test_custom_expression_without_aggregation_sums() {
    let metric = MeanMetric::new(events()).with_expression("properties.price * 2");
    let value = MetricValue::for_metric(&metric, col("person_id"), None).unwrap();
    assert_eq!(value.aggregation, ValueAggregation::Sum);
    assert!(render_expr(&value.value).ends_with(" * 2)"));
}

#[test]
fn test_custom_expression_on_warehouse_columns() {
    let metric = MeanMetric::new(warehouse()).with_expression("avg(amount - fee)");
    let value = MetricValue::for_metric(&metric, col("x"), Some("wh")).unwrap();
    assert_eq!(value.aggregation, ValueAggregation::Avg);
    assert_eq!(
        render_expr(&value.value),
        "(toFloat64OrNull(toString(wh.amount)) - toFloat64OrNull(toString(wh.fee)))"
    );
}

#[test]
fn test_custom_expression_rejects_unknown_function() {
    let metric = MeanMetric::new(events()).with_expression("sum(sqrt(properties.price))");
    assert!(matches!(
        MetricValue::for_metric(&metric, col("person_id"), None),
        Err(ExperimentError::InvalidExpression(_))
    ));
}
