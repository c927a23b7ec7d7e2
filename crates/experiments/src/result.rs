//! Result shaping
//!
//! Turns the rows of an executed plan into per-variant statistics: parse by
//! column name, drop entities assigned to several variants, order by the
//! experiment's variant keys and check that every required category of data
//! is present.

use serde::Serialize;
use serde_json::Value;

use crate::error::{ExperimentError, NoDataReport, Result};
use crate::model::{MULTIPLE_VARIANT_KEY, MetricKind};
use crate::plan::{
    FAILURE_COUNT, NUM_USERS, SUCCESS_COUNT, TOTAL_SUM, TOTAL_SUM_OF_SQUARES, VARIANT,
};
use tally_query::QueryResult;

/// Per-variant aggregates of a mean metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanRow {
    pub variant: String,
    pub num_users: u64,
    pub total_sum: f64,
    pub total_sum_of_squares: f64,
}

/// Per-variant aggregates of a funnel metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelRow {
    pub variant: String,
    pub num_users: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

/// One row of an executed plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariantRow {
    Mean(MeanRow),
    Funnel(FunnelRow),
}

impl VariantRow {
    /// Variant key
    pub fn variant(&self) -> &str {
        match self {
            Self::Mean(row) => &row.variant,
            Self::Funnel(row) => &row.variant,
        }
    }

    /// Number of exposed entities
    pub fn num_users(&self) -> u64 {
        match self {
            Self::Mean(row) => row.num_users,
            Self::Funnel(row) => row.num_users,
        }
    }
}

/// Mean-metric statistics handed to significance calculation
///
/// `exposure` and `absolute_exposure` are both the sample size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanVariantStats {
    pub key: String,
    pub count: f64,
    pub exposure: f64,
    pub absolute_exposure: f64,
}

/// Funnel-metric statistics handed to significance calculation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelVariantStats {
    pub key: String,
    pub success_count: u64,
    pub failure_count: u64,
}

/// Statistics of one variant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariantStatistics {
    Mean(MeanVariantStats),
    Funnel(FunnelVariantStats),
}

impl VariantStatistics {
    /// Variant key
    pub fn key(&self) -> &str {
        match self {
            Self::Mean(stats) => &stats.key,
            Self::Funnel(stats) => &stats.key,
        }
    }
}

impl From<&VariantRow> for VariantStatistics {
    fn from(row: &VariantRow) -> Self {
        match row {
            VariantRow::Mean(row) => Self::Mean(MeanVariantStats {
                key: row.variant.clone(),
                count: row.total_sum,
                exposure: row.num_users as f64,
                absolute_exposure: row.num_users as f64,
            }),
            VariantRow::Funnel(row) => Self::Funnel(FunnelVariantStats {
                key: row.variant.clone(),
                success_count: row.success_count,
                failure_count: row.failure_count,
            }),
        }
    }
}

/// Parse the rows of an executed plan
pub fn parse_rows(kind: MetricKind, result: &QueryResult) -> Result<Vec<VariantRow>> {
    let index = |name: &str| {
        result.column_index(name).ok_or_else(|| {
            ExperimentError::InvalidResult(format!(
                "missing column '{}' (got {:?})",
                name,
                result.column_names()
            ))
        })
    };

    let variant_idx = index(VARIANT)?;
    let users_idx = index(NUM_USERS)?;

    match kind {
        MetricKind::Mean => {
            let sum_idx = index(TOTAL_SUM)?;
            let squares_idx = index(TOTAL_SUM_OF_SQUARES)?;
            result
                .rows
                .iter()
                .map(|row| {
                    Ok(VariantRow::Mean(MeanRow {
                        variant: text_cell(row, variant_idx, VARIANT)?,
                        num_users: count_cell(row, users_idx, NUM_USERS)?,
                        total_sum: number_cell(row, sum_idx, TOTAL_SUM)?,
                        total_sum_of_squares: number_cell(row, squares_idx, TOTAL_SUM_OF_SQUARES)?,
                    }))
                })
                .collect()
        }
        MetricKind::Funnel => {
            let success_idx = index(SUCCESS_COUNT)?;
            let failure_idx = index(FAILURE_COUNT)?;
            result
                .rows
                .iter()
                .map(|row| {
                    Ok(VariantRow::Funnel(FunnelRow {
                        variant: text_cell(row, variant_idx, VARIANT)?,
                        num_users: count_cell(row, users_idx, NUM_USERS)?,
                        success_count: count_cell(row, success_idx, SUCCESS_COUNT)?,
                        failure_count: count_cell(row, failure_idx, FAILURE_COUNT)?,
                    }))
                })
                .collect()
        }
    }
}

fn cell<'a>(row: &'a [Value], idx: usize, column: &str) -> Result<&'a Value> {
    row.get(idx).ok_or_else(|| {
        ExperimentError::InvalidResult(format!("row has no value for column '{}'", column))
    })
}

fn text_cell(row: &[Value], idx: usize, column: &str) -> Result<String> {
    match cell(row, idx, column)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(ExperimentError::InvalidResult(format!(
            "column '{}' is not text: {}",
            column, other
        ))),
    }
}

/// Numbers arrive as JSON numbers, or as strings for 64-bit integers
fn number_cell(row: &[Value], idx: usize, column: &str) -> Result<f64> {
    let value = cell(row, idx, column)?;
    let number = match value {
        Value::Null => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.ok_or_else(|| {
        ExperimentError::InvalidResult(format!("column '{}' is not numeric: {}", column, value))
    })
}

fn count_cell(row: &[Value], idx: usize, column: &str) -> Result<u64> {
    let number = number_cell(row, idx, column)?;
    if !number.is_finite() || number < 0.0 || number.fract() != 0.0 {
        return Err(ExperimentError::InvalidResult(format!(
            "column '{}' is not a count: {}",
            column, number
        )));
    }
    Ok(number as u64)
}

/// Drop the multiple-variant sentinel and order rows by `variant_keys`
///
/// Variants not in `variant_keys` keep their relative order after the known
/// ones.
pub fn order_rows(rows: Vec<VariantRow>, variant_keys: &[String]) -> Vec<VariantRow> {
    let (sentinel, mut rows): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .partition(|row| row.variant() == MULTIPLE_VARIANT_KEY);

    if let Some(row) = sentinel.first() {
        tracing::debug!(
            entities = row.num_users(),
            "dropped entities exposed to multiple variants"
        );
    }

    rows.sort_by_key(|row| {
        variant_keys
            .iter()
            .position(|key| key == row.variant())
            .unwrap_or(variant_keys.len())
    });
    rows
}

/// Which categories of data are missing
///
/// `test_variants` are the configured variants other than the control.
pub fn no_data_report(
    rows: &[VariantRow],
    control: &str,
    test_variants: &[String],
) -> NoDataReport {
    let exposed = |key: &str| {
        rows.iter()
            .any(|row| row.variant() == key && row.num_users() > 0)
    };

    NoDataReport {
        no_exposures: rows.iter().all(|row| row.num_users() == 0),
        no_control_variant: !exposed(control),
        no_test_variant: !test_variants.iter().any(|key| exposed(key)),
    }
}

/// Fail with [`ExperimentError::NoData`] when a category is missing
pub fn validate_rows(rows: &[VariantRow], control: &str, test_variants: &[String]) -> Result<()> {
    let report = no_data_report(rows, control, test_variants);
    if report.has_errors() {
        return Err(ExperimentError::NoData(report));
    }
    Ok(())
}

/// Output records in row order
pub fn statistics(rows: &[VariantRow]) -> Vec<VariantStatistics> {
    rows.iter().map(VariantStatistics::from).collect()
}

#[cfg(test)]
#[path = "result_test.rs"]
mod result_test;
