//! Experiment input as handed over by the model layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};
use crate::model::criteria::{ExposureCriteria, MULTIPLE_VARIANT_KEY};
use crate::model::metric::ExperimentMetric;

/// Default key of the control variant
pub const CONTROL_VARIANT: &str = "control";

/// Highest group type index the events table carries a column for
pub const MAX_GROUP_TYPE_INDEX: u8 = 4;

/// An experiment with its flag, variants, date range and metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Experiment id
    pub id: i64,
    /// Feature flag driving the variants
    pub feature_flag_key: String,
    /// Configured variant keys, in canonical order
    pub variants: Vec<String>,
    /// Holdout group id, adding a `holdout-<id>` variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holdout_id: Option<i64>,
    /// Group type index when the experiment randomizes groups instead of persons
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_group_type_index: Option<u8>,
    /// Start of the experiment
    pub start_date: DateTime<Utc>,
    /// End of the experiment; still running when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Exposure criteria; defaults apply when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_criteria: Option<ExposureCriteria>,
    /// Metrics, the first one is the primary metric
    #[serde(default)]
    pub metrics: Vec<ExperimentMetric>,
}

impl Experiment {
    /// Create an experiment without metrics
    pub fn new(
        id: i64,
        feature_flag_key: impl Into<String>,
        variants: Vec<String>,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            feature_flag_key: feature_flag_key.into(),
            variants,
            holdout_id: None,
            aggregation_group_type_index: None,
            start_date,
            end_date: None,
            exposure_criteria: None,
            metrics: Vec::new(),
        }
    }

    /// Set the end date
    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Set the exposure criteria
    pub fn with_criteria(mut self, criteria: ExposureCriteria) -> Self {
        self.exposure_criteria = Some(criteria);
        self
    }

    /// Append a metric
    pub fn with_metric(mut self, metric: ExperimentMetric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Exposure criteria, falling back to defaults
    pub fn criteria(&self) -> ExposureCriteria {
        self.exposure_criteria.clone().unwrap_or_default()
    }

    /// The entity being measured
    pub fn entity_key(&self) -> EntityKey {
        match self.aggregation_group_type_index {
            Some(index) => EntityKey::Group(index),
            None => EntityKey::Person,
        }
    }

    /// Canonical variant keys, including the holdout when present
    pub fn variant_keys(&self) -> Vec<String> {
        let mut keys = self.variants.clone();
        if let Some(holdout) = self.holdout_id {
            keys.push(format!("holdout-{}", holdout));
        }
        keys
    }

    /// Date range the experiment covers, ending at `now` while it runs
    pub fn date_range(&self, now: DateTime<Utc>) -> DateRange {
        DateRange {
            from: self.start_date,
            to: self.end_date.unwrap_or(now),
        }
    }

    /// Metric at `index`
    pub fn metric(&self, index: usize) -> Result<&ExperimentMetric> {
        self.metrics.get(index).ok_or_else(|| {
            ExperimentError::InvalidMetric(format!(
                "experiment {} has no metric at index {} ({} configured)",
                self.id,
                index,
                self.metrics.len()
            ))
        })
    }

    /// Check the experiment before compiling anything from it
    pub fn validate(&self) -> Result<()> {
        if self.feature_flag_key.trim().is_empty() {
            return Err(ExperimentError::InvalidExperiment(
                "feature_flag_key must not be empty".to_string(),
            ));
        }

        if self.variants.is_empty() {
            return Err(ExperimentError::InvalidExperiment(
                "at least one variant is required".to_string(),
            ));
        }

        let keys = self.variant_keys();
        for (i, key) in keys.iter().enumerate() {
            if key.is_empty() || key == MULTIPLE_VARIANT_KEY {
                return Err(ExperimentError::InvalidExperiment(format!(
                    "invalid variant key '{}'",
                    key
                )));
            }
            if keys[..i].contains(key) {
                return Err(ExperimentError::InvalidExperiment(format!(
                    "duplicate variant key '{}'",
                    key
                )));
            }
        }

        if let Some(index) = self.aggregation_group_type_index
            && index > MAX_GROUP_TYPE_INDEX
        {
            return Err(ExperimentError::InvalidExperiment(format!(
                "aggregation_group_type_index must be 0..={}, got {}",
                MAX_GROUP_TYPE_INDEX, index
            )));
        }

        if let Some(end) = self.end_date
            && end < self.start_date
        {
            return Err(ExperimentError::InvalidExperiment(
                "end_date must not be before start_date".to_string(),
            ));
        }

        Ok(())
    }
}

/// The unit an experiment measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKey {
    /// Persons
    Person,
    /// Groups of the given type index
    Group(u8),
}

impl EntityKey {
    /// Events-table column holding the entity id
    pub fn column_name(&self) -> String {
        match self {
            Self::Person => "person_id".to_string(),
            Self::Group(index) => format!("$group_{}", index),
        }
    }
}

/// Inclusive timestamp range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Start (inclusive)
    pub from: DateTime<Utc>,
    /// End (inclusive)
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// Create a range
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// True when `ts` falls inside the range
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }
}
