//! Tests for the experiment query runner

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use tally_query::{Column, DataType, QueryBackend, QueryError, QueryResult};

use crate::error::ExperimentError;
use crate::model::{
    EventSource, Experiment, ExperimentMetric, FunnelMetric, MeanMetric, MetricKind, MetricSource,
    StepSource,
};
use crate::plan::PlanStrategy;
use crate::runner::{ExperimentQueryRunner, ExperimentRequest, PlanExecutor, SqlExecutor};
use crate::sql::query::SelectQuery;

/// Returns canned rows, or an error
struct StubExecutor {
    result: std::result::Result<QueryResult, String>,
}

#[async_trait]
impl PlanExecutor for StubExecutor {
    async fn execute_plan(&self, _query: &SelectQuery) -> Result<QueryResult, QueryError> {
        self.result.clone().map_err(QueryError::Execution)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Records the SQL it receives
#[derive(Default)]
struct RecordingBackend {
    queries: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryBackend for RecordingBackend {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        self.queries.lock().unwrap().push(sql.to_string());
        Ok(mean_rows())
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn request() -> ExperimentRequest {
    let experiment = Experiment::new(
        3,
        "new-checkout",
        vec!["control".into(), "test".into()],
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    )
    .with_metric(ExperimentMetric::Mean(MeanMetric::new(MetricSource::EventsNode(
        EventSource::named("purchase"),
    ))))
    .with_metric(ExperimentMetric::Funnel(FunnelMetric::new(vec![
        StepSource::EventsNode(EventSource::named("signup")),
        StepSource::EventsNode(EventSource::named("purchase")),
    ])));
    ExperimentRequest::new(experiment)
}

fn mean_rows() -> QueryResult {
    QueryResult::new(
        vec![
            Column::new("variant", DataType::String, false),
            Column::new("num_users", DataType::UInt64, false),
            Column::new("total_sum", DataType::Float64, false),
            Column::new("total_sum_of_squares", DataType::Float64, false),
        ],
        vec![
            vec![json!("test"), json!(7), json!(0.0), json!(0.0)],
            vec![json!("$multiple"), json!(1), json!(10.0), json!(100.0)],
            vec![json!("control"), json!(5), json!(50.0), json!(500.0)],
        ],
        2,
    )
}

fn runner(result: std::result::Result<QueryResult, String>) -> ExperimentQueryRunner {
    ExperimentQueryRunner::new(Arc::new(StubExecutor { result }))
}

#[tokio::test]
async fn test_run_shapes_mean_rows() {
    let now = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
    let response = runner(Ok(mean_rows())).run(&request(), 0, now).await.unwrap();

    assert_eq!(response.kind, MetricKind::Mean);
    assert_eq!(response.strategy, PlanStrategy::SingleScan);
    assert_eq!(response.variants, vec!["control", "test"]);
    assert_eq!(
        serde_json::to_value(&response.statistics).unwrap(),
        json!([
            {"key": "control", "count": 50.0, "exposure": 5.0, "absolute_exposure": 5.0},
            {"key": "test", "count": 0.0, "exposure": 7.0, "absolute_exposure": 7.0},
        ])
    );
    assert!(response.sql.contains("2024-03-15 00:00:00"));
}

#[tokio::test]
async fn test_run_funnel_metric() {
    let rows = QueryResult::new(
        vec![
            Column::new("variant", DataType::String, false),
            Column::new("num_users", DataType::UInt64, false),
            Column::new("success_count", DataType::UInt64, false),
            Column::new("failure_count", DataType::UInt64, false),
        ],
        vec![
            vec![json!("control"), json!("10"), json!("3"), json!("7")],
            vec![json!("test"), json!("10"), json!("5"), json!("5")],
        ],
        2,
    );
    let response = runner(Ok(rows)).run(&request(), 1, Utc::now()).await.unwrap();

    assert_eq!(response.kind, MetricKind::Funnel);
    assert_eq!(response.strategy, PlanStrategy::Join);
    assert_eq!(
        serde_json::to_value(&response.statistics[0]).unwrap(),
        json!({"key": "control", "success_count": 3, "failure_count": 7})
    );
}

#[tokio::test]
async fn test_run_reports_missing_data() {
    let empty = QueryResult::new(mean_rows().columns, Vec::new(), 1);
    let err = runner(Ok(empty)).run(&request(), 0, Utc::now()).await.unwrap_err();

    match err {
        ExperimentError::NoData(report) => {
            assert!(report.no_exposures);
            assert!(report.no_control_variant);
            assert!(report.no_test_variant);
        }
        other => panic!("expected no-data error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_executor_errors_pass_through() {
    let err = runner(Err("timeout exceeded".into()))
        .run(&request(), 0, Utc::now())
        .await
        .unwrap_err();

    match err {
        ExperimentError::Query(QueryError::Execution(msg)) => assert_eq!(msg, "timeout exceeded"),
        other => panic!("expected query error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_configuration_errors_fail_before_execution() {
    let err = runner(Ok(mean_rows()))
        .with_strategy(PlanStrategy::SingleScan)
        .run(&request(), 1, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ExperimentError::UnsupportedMetric(_)));

    let err = runner(Ok(mean_rows()))
        .run(&request(), 5, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ExperimentError::InvalidMetric(_)));
}

#[tokio::test]
async fn test_other_invalid_metrics_do_not_block_compilation() {
    let mut request = request();
    request.experiment.metrics[1] = ExperimentMetric::Funnel(FunnelMetric::new(Vec::new()));

    let response = runner(Ok(mean_rows()))
        .run(&request, 0, Utc::now())
        .await
        .unwrap();
    assert_eq!(response.variants, vec!["control", "test"]);

    let err = runner(Ok(mean_rows()))
        .run(&request, 1, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ExperimentError::InvalidMetric(_)));
}

#[tokio::test]
async fn test_sql_executor_sends_rendered_plan() {
    let backend = Arc::new(RecordingBackend::default());
    let runner = ExperimentQueryRunner::new(Arc::new(SqlExecutor::new(backend.clone())))
        .with_strategy(PlanStrategy::Join)
        .with_events_table("events_local");

    assert_eq!(runner.executor_name(), "recording");
    let response = runner.run(&request(), 0, Utc::now()).await.unwrap();

    let queries = backend.queries.lock().unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0], response.sql);
    assert!(queries[0].contains("FROM events_local"));
}

#[test]
fn test_deserialize_request() {
    let request: ExperimentRequest = serde_json::from_value(json!({
        "experiment": {
            "id": 1,
            "feature_flag_key": "flag",
            "variants": ["control", "test"],
            "start_date": "2024-01-01T00:00:00Z",
            "metrics": [
                {"metric_type": "mean", "source": {"kind": "EventsNode", "event": "purchase"}}
            ]
        },
        "actions": [{"id": 4, "name": "Paid", "steps": [{"event": "purchase"}]}]
    }))
    .unwrap();

    assert_eq!(request.actions.len(), 1);
    assert!(request.test_account_filters.is_empty());
    assert_eq!(request.experiment.metrics.len(), 1);
}
