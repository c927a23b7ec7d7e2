//! Tests for the single-scan plan

use chrono::{TimeZone, Utc};

use crate::model::{
    Action, ActionSet, ActionSource, ActionStep, ConversionWindowUnit, DateRange, EventSource,
    Experiment, ExperimentMetric, MathType, MeanMetric, MetricSource, MultipleVariantHandling,
    TeamSettings,
};
use crate::plan::{PlanInput, build_single_scan_plan};

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

fn scan_sql(experiment: &Experiment, metric: MeanMetric, actions: &ActionSet) -> String {
    let metric = ExperimentMetric::Mean(metric);
    let team = TeamSettings::default();
    let input = PlanInput::new(experiment, &metric, range(), actions, &team);
    build_single_scan_plan(&input).unwrap().sql()
}

fn purchases() -> MeanMetric {
    MeanMetric::new(MetricSource::EventsNode(EventSource::named("purchase")))
}

#[test]
fn test_scan_reads_events_once() {
    let sql = scan_sql(&experiment(), purchases(), &ActionSet::new());

    assert_eq!(sql.matches("FROM events").count(), 1);
    assert!(!sql.contains(" JOIN "));
    assert!(sql.contains("GROUP BY person_id"));
}

#[test]
fn test_scan_collects_exposure_fields_conditionally() {
    let sql = scan_sql(&experiment(), purchases(), &ActionSet::new());

    assert!(sql.contains("minIf(toNullable(timestamp), "));
    assert!(sql.contains("AS first_exposure_time"));
    assert!(sql.contains("argMinIf(uuid, timestamp, "));
    assert!(sql.contains("AS exposure_event_uuid"));
    assert!(sql.contains("argMinIf(`$session_id`, timestamp, "));
    assert!(sql.contains("uniqExactIf("));
    assert!(sql.contains("groupArrayIf(tuple(timestamp, 1), "));
    assert!(sql.contains(" OR "));
}

#[test]
fn test_first_seen_variant_uses_exposure_condition() {
    let experiment = experiment().with_criteria(
        crate::model::ExposureCriteria::default()
            .with_handling(MultipleVariantHandling::FirstSeen),
    );
    let sql = scan_sql(&experiment, purchases(), &ActionSet::new());

    assert!(sql.contains("argMinIf(replaceRegexpAll("));
    assert!(!sql.contains("uniqExactIf("));
}

#[test]
fn test_post_filter() {
    let sql = scan_sql(&experiment(), purchases(), &ActionSet::new());

    assert!(sql.contains(
        "arraySum(arrayMap(x -> tupleElement(x, 2), arrayFilter(x -> coalesce((\
         (tupleElement(x, 1) >= first_exposure_time) AND (tupleElement(x, 2) IS NOT NULL)\
         ), 0), metric_events))) AS value"
    ));
    assert!(sql.contains("WHERE (first_exposure_time IS NOT NULL)"));
}

#[test]
fn test_post_filter_with_window() {
    let metric = purchases().with_conversion_window(30, ConversionWindowUnit::Minute);
    let sql = scan_sql(&experiment(), metric, &ActionSet::new());

    assert!(sql.contains("(tupleElement(x, 1) < addSeconds(first_exposure_time, 1800))"));
}

#[test]
fn test_array_aggregations() {
    let avg = scan_sql(
        &experiment(),
        purchases().with_math(MathType::Avg).with_property("amount"),
        &ActionSet::new(),
    );
    assert!(avg.contains("if(empty(arrayMap("));
    assert!(avg.contains("0, arrayAvg(arrayMap("));

    let dau = scan_sql(&experiment(), purchases().with_math(MathType::Dau), &ActionSet::new());
    assert!(dau.contains("groupArrayIf(tuple(timestamp, person_id), "));
    assert!(dau.contains("length(arrayDistinct(arrayMap("));
}

#[test]
fn test_action_metric() {
    let actions: ActionSet = [Action::new(
        12,
        "Paid",
        vec![ActionStep::event("purchase"), ActionStep::event("renewal")],
    )]
    .into_iter()
    .collect();
    let metric = MeanMetric::new(MetricSource::ActionsNode(ActionSource::new(12)));
    let sql = scan_sql(&experiment(), metric, &actions);

    assert!(sql.contains("((event = 'purchase') OR (event = 'renewal'))"));
}
