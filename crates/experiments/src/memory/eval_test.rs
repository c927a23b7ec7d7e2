//! Tests for expression evaluation

use chrono::{TimeZone, Utc};

use crate::memory::eval::{Evaluator, Frame, extract_property_text};
use crate::memory::value::Value;
use crate::sql::ast::{
    AggregateFunction, Expr, Function, JsonColumn, PropertyKind, PropertyRef, agg, agg_if, and,
    col, func, lambda, lit_bool, lit_int, lit_str, or,
};

fn schema() -> Vec<(Option<String>, String)> {
    vec![
        (Some("e".to_string()), "v".to_string()),
        (Some("e".to_string()), "properties".to_string()),
        (Some("e".to_string()), "ts".to_string()),
    ]
}

fn ts(seconds: i64) -> Value {
    Value::DateTime(Utc.timestamp_opt(1_704_067_200 + seconds, 0).unwrap())
}

fn eval_row(expr: &Expr, row: &[Value]) -> Value {
    let schema = schema();
    Evaluator::new(&schema).eval(expr, Frame::Row(row)).unwrap()
}

fn eval_group(expr: &Expr, rows: &[Vec<Value>]) -> Value {
    let schema = schema();
    let rows: Vec<&[Value]> = rows.iter().map(Vec::as_slice).collect();
    Evaluator::new(&schema).eval(expr, Frame::Group(&rows)).unwrap()
}

fn row(v: Value) -> Vec<Value> {
    vec![v, Value::from("{}"), ts(0)]
}

fn property(key: &str, kind: PropertyKind) -> Expr {
    Expr::Property(PropertyRef {
        table: Some("e".to_string()),
        column: JsonColumn::Properties,
        key: key.to_string(),
        kind,
    })
}

#[test]
fn test_three_valued_logic() {
    let null_cmp = col("v").equals(lit_int(1));
    let r = row(Value::Null);

    assert_eq!(eval_row(&null_cmp, &r), Value::Null);
    assert_eq!(eval_row(&and(vec![null_cmp.clone(), lit_bool(false)]), &r), Value::bool(false));
    assert_eq!(eval_row(&or(vec![null_cmp.clone(), lit_bool(true)]), &r), Value::bool(true));
    assert_eq!(eval_row(&null_cmp.clone().negate(), &r), Value::Null);
    assert_eq!(eval_row(&null_cmp.or_else(lit_bool(true)), &r), Value::bool(true));
    assert_eq!(eval_row(&col("v").in_list(vec![lit_int(1)]), &r), Value::Null);
}

#[test]
fn test_property_extraction() {
    let props = r#"{"plan": "pro", "amount": 12.5, "count": 3, "flag": true, "gone": null,
        "text_num": "7"}"#;
    let r = vec![Value::Null, Value::from(props), ts(0)];

    assert_eq!(eval_row(&property("plan", PropertyKind::String), &r), Value::from("pro"));
    assert_eq!(eval_row(&property("flag", PropertyKind::String), &r), Value::from("true"));
    assert_eq!(eval_row(&property("count", PropertyKind::String), &r), Value::from("3"));
    assert_eq!(eval_row(&property("gone", PropertyKind::String), &r), Value::Null);
    assert_eq!(eval_row(&property("missing", PropertyKind::String), &r), Value::Null);

    assert_eq!(eval_row(&property("amount", PropertyKind::Number), &r), Value::Float(12.5));
    assert_eq!(eval_row(&property("text_num", PropertyKind::Number), &r), Value::Float(7.0));
    assert_eq!(eval_row(&property("plan", PropertyKind::Number), &r), Value::Null);

    assert_eq!(extract_property_text("not json", "plan"), None);
}

#[test]
fn test_string_functions() {
    let r = row(Value::from("Checkout Page"));
    let position = func(Function::PositionCaseInsensitive, vec![col("v"), lit_str("page")]);
    assert_eq!(eval_row(&position, &r), Value::Int(10));

    let matches = func(Function::Match, vec![col("v"), lit_str("^Check")]);
    assert_eq!(eval_row(&matches, &r), Value::bool(true));

    let invalid = func(Function::Match, vec![col("v"), lit_str("(")]);
    let schema = schema();
    assert!(Evaluator::new(&schema).eval(&invalid, Frame::Row(&r)).is_err());
}

#[test]
fn test_array_lambdas() {
    let r = row(Value::Array(vec![
        Value::Tuple(vec![Value::Int(1), Value::Float(2.0)]),
        Value::Tuple(vec![Value::Int(5), Value::Null]),
        Value::Tuple(vec![Value::Int(9), Value::Float(4.0)]),
    ]));
    let kept = func(
        Function::ArrayFilter,
        vec![
            lambda("x", col("x").element(2).is_not_null()),
            col("v"),
        ],
    );
    let values = func(Function::ArrayMap, vec![lambda("x", col("x").element(2)), kept]);

    assert_eq!(
        eval_row(&values, &r),
        Value::Array(vec![Value::Float(2.0), Value::Float(4.0)])
    );
    assert_eq!(
        eval_row(&func(Function::ArraySum, vec![values.clone()]), &r),
        Value::Float(6.0)
    );
    assert_eq!(
        eval_row(
            &func(Function::ArraySum, vec![col("v").element(1)]),
            &row(Value::Tuple(vec![Value::Array(Vec::new())]))
        ),
        Value::Int(0)
    );
}

#[test]
fn test_aggregates_skip_nulls() {
    let rows = vec![
        row(Value::Int(3)),
        row(Value::Null),
        row(Value::Int(4)),
    ];

    assert_eq!(eval_group(&agg(AggregateFunction::Count, vec![]), &rows), Value::Int(3));
    assert_eq!(eval_group(&agg(AggregateFunction::Count, vec![col("v")]), &rows), Value::Int(2));
    assert_eq!(eval_group(&agg(AggregateFunction::Sum, vec![col("v")]), &rows), Value::Int(7));
    assert_eq!(eval_group(&agg(AggregateFunction::Avg, vec![col("v")]), &rows), Value::Float(3.5));
    assert_eq!(eval_group(&agg(AggregateFunction::Min, vec![col("v")]), &rows), Value::Int(3));
    assert_eq!(
        eval_group(
            &agg_if(AggregateFunction::Sum, vec![col("v")], col("v").gt(lit_int(3))),
            &rows
        ),
        Value::Int(4)
    );

    let empty = vec![row(Value::Null)];
    assert_eq!(eval_group(&agg(AggregateFunction::Sum, vec![col("v")]), &empty), Value::Null);
    assert_eq!(
        eval_group(&agg(AggregateFunction::Sum, vec![col("v")]).or_else(lit_int(0)), &empty),
        Value::Int(0)
    );
}

#[test]
fn test_aggregate_outside_group_fails() {
    let schema = schema();
    let r = row(Value::Int(1));
    let result = Evaluator::new(&schema)
        .eval(&agg(AggregateFunction::Sum, vec![col("v")]), Frame::Row(&r));
    assert!(result.is_err());
}

#[test]
fn test_arg_min_keeps_first_on_ties() {
    let rows = vec![
        vec![Value::from("b"), Value::from("{}"), ts(10)],
        vec![Value::from("a"), Value::from("{}"), ts(5)],
        vec![Value::from("c"), Value::from("{}"), ts(5)],
    ];
    let expr = agg(AggregateFunction::ArgMin, vec![col("v"), col("ts")]);
    assert_eq!(eval_group(&expr, &rows), Value::from("a"));

    let distinct = agg(AggregateFunction::UniqExact, vec![col("v")]);
    assert_eq!(eval_group(&distinct, &rows), Value::Int(3));
}

#[test]
fn test_quantile_exact() {
    let rows: Vec<Vec<Value>> = (1..=10).map(|n| row(Value::Int(n))).collect();
    let p = |level| agg(AggregateFunction::QuantileExact(level), vec![col("v")]);

    assert_eq!(eval_group(&p(0.0), &rows), Value::Float(1.0));
    assert_eq!(eval_group(&p(0.5), &rows), Value::Float(6.0));
    assert_eq!(eval_group(&p(0.95), &rows), Value::Float(10.0));
    assert_eq!(eval_group(&p(1.0), &rows), Value::Float(10.0));
}

/// Rows of `(value = step label, ts)`
fn funnel_rows(events: &[(&str, i64)]) -> Vec<Vec<Value>> {
    events
        .iter()
        .map(|(step, seconds)| vec![Value::from(*step), Value::from("{}"), ts(*seconds)])
        .collect()
}

fn funnel(window: i64, steps: usize) -> Expr {
    let mut args = vec![func(Function::ToDateTime, vec![col("ts")])];
    for i in 0..steps {
        args.push(col("v").equals(lit_str(format!("step_{}", i))).or_else(lit_bool(false)));
    }
    agg(AggregateFunction::WindowFunnel(window), args).or_else(lit_int(0))
}

#[test]
fn test_window_funnel_levels() {
    let complete = funnel_rows(&[("step_0", 0), ("step_1", 10), ("step_2", 20)]);
    assert_eq!(eval_group(&funnel(100, 3), &complete), Value::Int(3));

    // out of order: step_1 before step_0 does not count
    let reversed = funnel_rows(&[("step_1", 0), ("step_0", 10)]);
    assert_eq!(eval_group(&funnel(100, 2), &reversed), Value::Int(1));

    // step_1 outside the window of the chain start
    let late = funnel_rows(&[("step_0", 0), ("step_1", 101)]);
    assert_eq!(eval_group(&funnel(100, 2), &late), Value::Int(1));

    // a later step_0 restarts the chain
    let restarted = funnel_rows(&[("step_0", 0), ("step_0", 90), ("step_1", 150)]);
    assert_eq!(eval_group(&funnel(100, 2), &restarted), Value::Int(2));

    let unrelated = funnel_rows(&[("step_unknown", 0)]);
    assert_eq!(eval_group(&funnel(100, 2), &unrelated), Value::Int(0));
}

#[test]
fn test_window_funnel_without_rows_is_zero() {
    let padded = vec![vec![Value::Null, Value::from("{}"), Value::Null]];
    assert_eq!(eval_group(&funnel(100, 2), &padded), Value::Int(0));
}
