//! Tests for plan compilation and strategy selection

use chrono::{TimeZone, Utc};

use crate::error::ExperimentError;
use crate::model::{
    ActionSet, ConversionWindowUnit, DateRange, EventSource, Experiment, ExperimentMetric,
    FunnelMetric, MeanMetric, MetricKind, MetricSource, StepSource, TeamSettings,
    WarehouseSource,
};
use crate::plan::{PlanInput, PlanParts, PlanStrategy, compile};

fn experiment() -> Experiment {
    Experiment::new(
        7,
        "checkout",
        vec!["control".into(), "test".into()],
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .with_end_date(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap())
}

fn range() -> DateRange {
    DateRange::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
    )
}

fn mean() -> ExperimentMetric {
    ExperimentMetric::Mean(MeanMetric::new(MetricSource::EventsNode(EventSource::named(
        "purchase",
    ))))
}

fn funnel() -> ExperimentMetric {
    ExperimentMetric::Funnel(FunnelMetric::new(vec![
        StepSource::EventsNode(EventSource::named("signup")),
        StepSource::EventsNode(EventSource::named("purchase")),
    ]))
}

fn warehouse() -> ExperimentMetric {
    ExperimentMetric::Mean(MeanMetric::new(MetricSource::DataWarehouseNode(WarehouseSource {
        table_name: "payments".into(),
        timestamp_field: "paid_at".into(),
        data_warehouse_join_key: "customer_id".into(),
        events_join_key: "distinct_id".into(),
        properties: Vec::new(),
    })))
}

#[test]
fn test_auto_strategy() {
    assert_eq!(PlanStrategy::Auto.resolve(&mean()).unwrap(), PlanStrategy::SingleScan);
    assert_eq!(PlanStrategy::Auto.resolve(&funnel()).unwrap(), PlanStrategy::Join);
    assert_eq!(PlanStrategy::Auto.resolve(&warehouse()).unwrap(), PlanStrategy::Join);
    assert_eq!(PlanStrategy::Join.resolve(&mean()).unwrap(), PlanStrategy::Join);
}

#[test]
fn test_single_scan_rejects_funnels_and_warehouse() {
    assert!(matches!(
        PlanStrategy::SingleScan.resolve(&funnel()),
        Err(ExperimentError::UnsupportedMetric(_))
    ));
    assert!(matches!(
        PlanStrategy::SingleScan.resolve(&warehouse()),
        Err(ExperimentError::UnsupportedMetric(_))
    ));
}

#[test]
fn test_strategy_parse() {
    assert_eq!("auto".parse::<PlanStrategy>().unwrap(), PlanStrategy::Auto);
    assert_eq!("JOIN".parse::<PlanStrategy>().unwrap(), PlanStrategy::Join);
    assert_eq!(
        "single-scan".parse::<PlanStrategy>().unwrap(),
        PlanStrategy::SingleScan
    );
    assert!("hash".parse::<PlanStrategy>().is_err());

    let json = serde_json::to_string(&PlanStrategy::SingleScan).unwrap();
    assert_eq!(json, "\"single_scan\"");
}

#[test]
fn test_mean_output_columns() {
    let experiment = experiment();
    let metric = mean();
    let (actions, team) = (ActionSet::new(), TeamSettings::default());
    let input = PlanInput::new(&experiment, &metric, range(), &actions, &team);

    for strategy in [PlanStrategy::Join, PlanStrategy::SingleScan] {
        let plan = compile(&input, strategy).unwrap();
        assert_eq!(plan.strategy, strategy);
        assert_eq!(plan.kind, MetricKind::Mean);
        assert_eq!(
            plan.query.output_names(),
            vec!["variant", "num_users", "total_sum", "total_sum_of_squares"]
        );
        assert!(plan.sql().ends_with("SETTINGS join_use_nulls = 1"));
    }
}

#[test]
fn test_funnel_output_columns() {
    let experiment = experiment();
    let metric = funnel();
    let (actions, team) = (ActionSet::new(), TeamSettings::default());
    let input = PlanInput::new(&experiment, &metric, range(), &actions, &team);

    let plan = compile(&input, PlanStrategy::Auto).unwrap();
    assert_eq!(plan.strategy, PlanStrategy::Join);
    assert_eq!(plan.kind, MetricKind::Funnel);
    assert_eq!(
        plan.query.output_names(),
        vec!["variant", "num_users", "success_count", "failure_count"]
    );
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let experiment = experiment();
    let metric = ExperimentMetric::Mean(
        MeanMetric::new(MetricSource::EventsNode(EventSource::named("purchase")))
            .with_bounds(Some(0.9), Some(0.1)),
    );
    let (actions, team) = (ActionSet::new(), TeamSettings::default());
    let input = PlanInput::new(&experiment, &metric, range(), &actions, &team);
    assert!(matches!(
        compile(&input, PlanStrategy::Join),
        Err(ExperimentError::InvalidMetric(_))
    ));

    let mut bad = experiment.clone();
    bad.variants.clear();
    let metric = mean();
    let input = PlanInput::new(&bad, &metric, range(), &actions, &team);
    assert!(matches!(
        compile(&input, PlanStrategy::Join),
        Err(ExperimentError::InvalidExperiment(_))
    ));
}

#[test]
fn test_metric_date_range_extends_by_window() {
    let experiment = experiment();
    let metric = ExperimentMetric::Mean(
        MeanMetric::new(MetricSource::EventsNode(EventSource::named("purchase")))
            .with_conversion_window(2, ConversionWindowUnit::Day),
    );
    let (actions, team) = (ActionSet::new(), TeamSettings::default());
    let input = PlanInput::new(&experiment, &metric, range(), &actions, &team);
    let parts = PlanParts::new(&input);

    let extended = parts.metric_date_range();
    assert_eq!(extended.from, range().from);
    assert_eq!(
        extended.to,
        Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap()
    );
}

#[test]
fn test_group_experiments_skip_empty_group_keys() {
    let mut experiment = experiment();
    experiment.aggregation_group_type_index = Some(1);
    let metric = mean();
    let (actions, team) = (ActionSet::new(), TeamSettings::default());
    let input = PlanInput::new(&experiment, &metric, range(), &actions, &team);

    let sql = compile(&input, PlanStrategy::Join).unwrap().sql();
    assert!(sql.contains("`$group_1` AS entity_id"));
    assert!(sql.contains("(`$group_1` != '')"));
}

#[test]
fn test_custom_events_table() {
    let experiment = experiment();
    let metric = mean();
    let (actions, team) = (ActionSet::new(), TeamSettings::default());
    let input = PlanInput::new(&experiment, &metric, range(), &actions, &team)
        .with_events_table("sharded_events");

    let sql = compile(&input, PlanStrategy::SingleScan).unwrap().sql();
    assert!(sql.contains("FROM sharded_events"));
    assert!(!sql.contains("FROM events"));
}
