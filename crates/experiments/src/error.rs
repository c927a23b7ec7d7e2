//! Experiment error types

use serde::Serialize;
use thiserror::Error;

/// Experiment compilation and result errors
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Metric definition is malformed (bounds, windows, empty funnels)
    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    /// Experiment definition is malformed (variants, dates, group index)
    #[error("invalid experiment: {0}")]
    InvalidExperiment(String),

    /// A user-supplied expression could not be parsed or translated
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// The requested plan cannot evaluate this metric
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),

    /// Result rows did not have the expected shape
    #[error("invalid result: {0}")]
    InvalidResult(String),

    /// Query ran but a required category of data is missing
    #[error("no experiment data: {0}")]
    NoData(NoDataReport),

    /// Execution engine error, passed through unmodified
    #[error(transparent)]
    Query(#[from] tally_query::QueryError),
}

/// Which preconditions failed when an experiment returned no usable data
///
/// Serializes to a flat JSON object so callers can render each failed
/// precondition separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NoDataReport {
    /// No entity was exposed at all
    #[serde(rename = "no-exposures")]
    pub no_exposures: bool,
    /// The control variant has no exposed entities
    #[serde(rename = "no-control-variant")]
    pub no_control_variant: bool,
    /// None of the test variants has exposed entities
    #[serde(rename = "no-test-variant")]
    pub no_test_variant: bool,
}

impl NoDataReport {
    /// True when at least one precondition failed
    pub fn has_errors(&self) -> bool {
        self.no_exposures || self.no_control_variant || self.no_test_variant
    }
}

impl std::fmt::Display for NoDataReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

/// Result type for experiment operations
pub type Result<T> = std::result::Result<T, ExperimentError>;
