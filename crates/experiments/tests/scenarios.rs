//! Golden-dataset scenarios
//!
//! Each scenario runs a request through both plans with the in-memory
//! executor and checks the per-variant rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use tally_experiments::model::{
    ActionSource, ConversionWindowUnit, EventSource, ExposureCriteria, StepSource,
    WarehouseSource,
};
use tally_experiments::result::{FunnelRow, MeanRow, VariantRow};
use tally_experiments::{
    EventRecord, Experiment, ExperimentError, ExperimentMetric, ExperimentQueryResponse,
    ExperimentQueryRunner, ExperimentRequest, FunnelMetric, MathType, MeanMetric, MemoryExecutor,
    MemoryStore, MetricSource, MultipleVariantHandling, PlanStrategy,
};
use tally_experiments::memory::Value;

const FLAG: &str = "new-checkout";

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

fn exposure(person: &str, variant: &str, ts: DateTime<Utc>) -> EventRecord {
    EventRecord::new(person, "$feature_flag_called", ts)
        .with_property("$feature_flag", FLAG)
        .with_property("$feature_flag_response", variant)
}

fn experiment(metric: ExperimentMetric) -> Experiment {
    Experiment::new(7, FLAG, vec!["control".into(), "test".into()], at(1, 0))
        .with_end_date(at(31, 0))
        .with_metric(metric)
}

fn purchases() -> MetricSource {
    MetricSource::EventsNode(EventSource::named("purchase"))
}

async fn run(
    store: &MemoryStore,
    request: &ExperimentRequest,
    strategy: PlanStrategy,
) -> Result<ExperimentQueryResponse, ExperimentError> {
    ExperimentQueryRunner::new(Arc::new(MemoryExecutor::new(store.clone())))
        .with_strategy(strategy)
        .run(request, 0, at(31, 0))
        .await
}

/// Rows of both mean plans, checked to be identical
async fn mean_rows(store: &MemoryStore, request: &ExperimentRequest) -> Vec<VariantRow> {
    let join = run(store, request, PlanStrategy::Join).await.unwrap();
    let single_scan = run(store, request, PlanStrategy::SingleScan).await.unwrap();
    assert_eq!(join.rows, single_scan.rows, "plans disagree");
    join.rows
}

fn mean(variant: &str, num_users: u64, total_sum: f64, total_sum_of_squares: f64) -> VariantRow {
    VariantRow::Mean(MeanRow {
        variant: variant.to_string(),
        num_users,
        total_sum,
        total_sum_of_squares,
    })
}

fn funnel(variant: &str, num_users: u64, success_count: u64, failure_count: u64) -> VariantRow {
    VariantRow::Funnel(FunnelRow {
        variant: variant.to_string(),
        num_users,
        success_count,
        failure_count,
    })
}

#[tokio::test]
async fn test_mean_metric_end_to_end() {
    let mut store = MemoryStore::new();
    for i in 0..5 {
        let person = format!("c{}", i);
        store.push_event(exposure(&person, "control", at(2, 0)));
        store.push_event(
            EventRecord::new(&person, "purchase", at(3, 0)).with_property("amount", 10),
        );
    }
    for i in 0..7 {
        store.push_event(exposure(&format!("t{}", i), "test", at(2, 0)));
    }

    let metric = MeanMetric::new(purchases())
        .with_math(MathType::Sum)
        .with_property("amount");
    let request = ExperimentRequest::new(experiment(ExperimentMetric::Mean(metric)));

    assert_eq!(
        mean_rows(&store, &request).await,
        vec![mean("control", 5, 50.0, 500.0), mean("test", 7, 0.0, 0.0)]
    );
}

#[tokio::test]
async fn test_metric_rows_before_exposure_and_outside_window_are_ignored() {
    let mut store = MemoryStore::new();
    store.push_event(exposure("c1", "control", at(10, 0)));
    // before exposure
    store.push_event(EventRecord::new("c1", "purchase", at(9, 0)));
    // inside the 1 hour window, then exactly at its end
    store.push_event(EventRecord::new("c1", "purchase", at(10, 0) + Duration::minutes(59)));
    store.push_event(EventRecord::new("c1", "purchase", at(10, 1)));
    store.push_event(exposure("t1", "test", at(10, 0)));
    store.push_event(EventRecord::new("t1", "purchase", at(10, 0)));

    let metric = MeanMetric::new(purchases()).with_conversion_window(1, ConversionWindowUnit::Hour);
    let request = ExperimentRequest::new(experiment(ExperimentMetric::Mean(metric)));

    assert_eq!(
        mean_rows(&store, &request).await,
        vec![mean("control", 1, 1.0, 1.0), mean("test", 1, 1.0, 1.0)]
    );
}

#[tokio::test]
async fn test_multiple_variant_policies() {
    let mut store = MemoryStore::new();
    // exposed to {control, control, test}
    store.push_event(exposure("u1", "control", at(2, 0)));
    store.push_event(exposure("u1", "control", at(3, 0)));
    store.push_event(exposure("u1", "test", at(4, 0)));
    // exposed to {test, control}
    store.push_event(exposure("u2", "test", at(2, 0)));
    store.push_event(exposure("u2", "control", at(5, 0)));
    store.push_event(exposure("c1", "control", at(2, 0)));
    store.push_event(exposure("t1", "test", at(2, 0)));

    let exclude = ExperimentRequest::new(
        experiment(ExperimentMetric::Mean(MeanMetric::new(purchases())))
            .with_criteria(ExposureCriteria::default()),
    );
    assert_eq!(
        mean_rows(&store, &exclude).await,
        vec![mean("control", 1, 0.0, 0.0), mean("test", 1, 0.0, 0.0)]
    );

    let first_seen = ExperimentRequest::new(
        experiment(ExperimentMetric::Mean(MeanMetric::new(purchases()))).with_criteria(
            ExposureCriteria::default().with_handling(MultipleVariantHandling::FirstSeen),
        ),
    );
    assert_eq!(
        mean_rows(&store, &first_seen).await,
        vec![mean("control", 2, 0.0, 0.0), mean("test", 2, 0.0, 0.0)]
    );
}

#[tokio::test]
async fn test_exposures_outside_experiment_or_for_other_flags_are_ignored() {
    let mut store = MemoryStore::new();
    store.push_event(exposure("c1", "control", at(2, 0)));
    let before_start = Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap();
    store.push_event(exposure("c2", "control", before_start));
    store.push_event(exposure("t1", "test", at(2, 0)));
    store.push_event(
        EventRecord::new("t2", "$feature_flag_called", at(2, 0))
            .with_property("$feature_flag", "other-flag")
            .with_property("$feature_flag_response", "test"),
    );
    store.push_event(exposure("t3", "unknown-variant", at(2, 0)));

    let request = ExperimentRequest::new(experiment(ExperimentMetric::Mean(MeanMetric::new(
        purchases(),
    ))));
    assert_eq!(
        mean_rows(&store, &request).await,
        vec![mean("control", 1, 0.0, 0.0), mean("test", 1, 0.0, 0.0)]
    );
}

#[tokio::test]
async fn test_funnel_completion_counts() {
    let mut store = MemoryStore::new();
    for i in 0..10 {
        let person = format!("c{}", i);
        store.push_event(exposure(&person, "control", at(10, 0)));
        store.push_event(EventRecord::new(&person, "signup", at(10, 1)));
        match i {
            0..3 => store.push_event(EventRecord::new(&person, "purchase", at(10, 2))),
            // purchase after the one day window
            3 => store.push_event(EventRecord::new(&person, "purchase", at(12, 2))),
            _ => {}
        }
    }
    for i in 0..4 {
        let person = format!("t{}", i);
        store.push_event(exposure(&person, "test", at(10, 0)));
        // purchase before signup does not complete the funnel
        store.push_event(EventRecord::new(&person, "purchase", at(10, 1)));
        store.push_event(EventRecord::new(&person, "signup", at(10, 2)));
    }

    let metric = FunnelMetric::new(vec![
        StepSource::EventsNode(EventSource::named("signup")),
        StepSource::EventsNode(EventSource::named("purchase")),
    ])
    .with_conversion_window(1, ConversionWindowUnit::Day);
    let request = ExperimentRequest::new(experiment(ExperimentMetric::Funnel(metric)));

    let response = run(&store, &request, PlanStrategy::Auto).await.unwrap();
    assert_eq!(response.strategy, PlanStrategy::Join);
    assert_eq!(
        response.rows,
        vec![funnel("control", 10, 3, 7), funnel("test", 4, 0, 4)]
    );
}

#[tokio::test]
async fn test_funnel_step_on_deleted_action_never_completes() {
    let mut store = MemoryStore::new();
    for (person, variant) in [("c1", "control"), ("t1", "test")] {
        store.push_event(exposure(person, variant, at(10, 0)));
        store.push_event(EventRecord::new(person, "signup", at(10, 1)));
        store.push_event(EventRecord::new(person, "purchase", at(10, 2)));
    }

    let metric = FunnelMetric::new(vec![
        StepSource::EventsNode(EventSource::named("signup")),
        StepSource::ActionsNode(ActionSource::new(404)),
    ]);
    let request = ExperimentRequest::new(experiment(ExperimentMetric::Funnel(metric)));

    let response = run(&store, &request, PlanStrategy::Join).await.unwrap();
    assert_eq!(
        response.rows,
        vec![funnel("control", 1, 0, 1), funnel("test", 1, 0, 1)]
    );
}

#[tokio::test]
async fn test_mean_metric_on_deleted_action_is_zero() {
    let mut store = MemoryStore::new();
    for (person, variant) in [("c1", "control"), ("t1", "test")] {
        store.push_event(exposure(person, variant, at(10, 0)));
        store.push_event(EventRecord::new(person, "purchase", at(10, 2)));
    }

    let metric = MeanMetric::new(MetricSource::ActionsNode(ActionSource::new(404)));
    let request = ExperimentRequest::new(experiment(ExperimentMetric::Mean(metric)));

    assert_eq!(
        mean_rows(&store, &request).await,
        vec![mean("control", 1, 0.0, 0.0), mean("test", 1, 0.0, 0.0)]
    );
}

#[tokio::test]
async fn test_warehouse_metric_joins_on_exposure_identifier() {
    let mut store = MemoryStore::new();
    store.push_event(exposure("c1", "control", at(10, 0)).with_distinct_id("cust-1"));
    store.push_event(exposure("t1", "test", at(10, 0)).with_distinct_id("cust-2"));

    let payment = |customer: &str, amount: f64, ts: DateTime<Utc>| {
        BTreeMap::from([
            ("customer_id".to_string(), Value::from(customer)),
            ("amount".to_string(), Value::Float(amount)),
            ("paid_at".to_string(), Value::DateTime(ts)),
        ])
    };
    store.push_warehouse_row("payments", payment("cust-1", 30.0, at(11, 0)));
    store.push_warehouse_row("payments", payment("cust-1", 12.0, at(12, 0)));
    // before exposure
    store.push_warehouse_row("payments", payment("cust-2", 99.0, at(9, 0)));

    let metric = MeanMetric::new(MetricSource::DataWarehouseNode(WarehouseSource {
        table_name: "payments".to_string(),
        timestamp_field: "paid_at".to_string(),
        data_warehouse_join_key: "customer_id".to_string(),
        events_join_key: "distinct_id".to_string(),
        properties: Vec::new(),
    }))
    .with_math(MathType::Sum)
    .with_property("amount");
    let request = ExperimentRequest::new(experiment(ExperimentMetric::Mean(metric)));

    let response = run(&store, &request, PlanStrategy::Auto).await.unwrap();
    assert_eq!(response.strategy, PlanStrategy::Join);
    assert_eq!(
        response.rows,
        vec![mean("control", 1, 42.0, 1764.0), mean("test", 1, 0.0, 0.0)]
    );
}

#[tokio::test]
async fn test_missing_test_variant_is_reported() {
    let mut store = MemoryStore::new();
    store.push_event(exposure("c1", "control", at(2, 0)));

    let request = ExperimentRequest::new(experiment(ExperimentMetric::Mean(MeanMetric::new(
        purchases(),
    ))));
    match run(&store, &request, PlanStrategy::Join).await {
        Err(ExperimentError::NoData(report)) => {
            assert!(!report.no_exposures);
            assert!(!report.no_control_variant);
            assert!(report.no_test_variant);
        }
        other => panic!("expected no-data error, got {:?}", other),
    }
}
