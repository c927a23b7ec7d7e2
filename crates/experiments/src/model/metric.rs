//! Metric specifications
//!
//! A metric is either a mean metric (one numeric value per entity) or a
//! funnel metric (did the entity complete an ordered series of steps).
//! Both are closed enums so every plan builder has to handle every kind.

use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, Result};
use crate::model::property::PropertyFilter;

/// An experiment metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metric_type", rename_all = "snake_case")]
pub enum ExperimentMetric {
    /// Per-entity value aggregated into sum and sum of squares
    Mean(MeanMetric),
    /// Ordered steps aggregated into success/failure counts
    Funnel(FunnelMetric),
}

/// Discriminant of [`ExperimentMetric`], used for result shaping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Mean metric
    Mean,
    /// Funnel metric
    Funnel,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mean => f.write_str("mean"),
            Self::Funnel => f.write_str("funnel"),
        }
    }
}

impl ExperimentMetric {
    /// Metric kind
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Mean(_) => MetricKind::Mean,
            Self::Funnel(_) => MetricKind::Funnel,
        }
    }

    /// Optional display name
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Mean(m) => m.name.as_deref(),
            Self::Funnel(f) => f.name.as_deref(),
        }
    }

    /// Conversion window in seconds, if one is configured
    pub fn conversion_window_seconds(&self) -> Option<i64> {
        match self {
            Self::Mean(m) => window_seconds(m.conversion_window, m.conversion_window_unit),
            Self::Funnel(f) => window_seconds(f.conversion_window, f.conversion_window_unit),
        }
    }

    /// Check the metric before anything is compiled from it
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Mean(m) => m.validate(),
            Self::Funnel(f) => f.validate(),
        }
    }
}

/// Mean metric definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanMetric {
    /// Where metric rows come from
    pub source: MetricSource,
    /// How rows are valued and aggregated per entity
    #[serde(default)]
    pub math: MathType,
    /// Property feeding sum/avg/min/max
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_property: Option<String>,
    /// Aggregated expression for `math = "expression"`, e.g. `sum(properties.price)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_expression: Option<String>,
    /// Conversion window length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_window: Option<u32>,
    /// Conversion window unit (days when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_window_unit: Option<ConversionWindowUnit>,
    /// Winsorization lower percentile, in (0, 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound_percentile: Option<f64>,
    /// Winsorization upper percentile, in (0, 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound_percentile: Option<f64>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl MeanMetric {
    /// Create a `total` metric over a source
    pub fn new(source: MetricSource) -> Self {
        Self {
            source,
            math: MathType::Total,
            math_property: None,
            math_expression: None,
            conversion_window: None,
            conversion_window_unit: None,
            lower_bound_percentile: None,
            upper_bound_percentile: None,
            name: None,
        }
    }

    /// Set the math type
    pub fn with_math(mut self, math: MathType) -> Self {
        self.math = math;
        self
    }

    /// Set the property feeding property math
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.math_property = Some(property.into());
        self
    }

    /// Use a custom aggregated expression
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.math = MathType::Expression;
        self.math_expression = Some(expression.into());
        self
    }

    /// Set a conversion window
    pub fn with_conversion_window(mut self, window: u32, unit: ConversionWindowUnit) -> Self {
        self.conversion_window = Some(window);
        self.conversion_window_unit = Some(unit);
        self
    }

    /// Set winsorization percentiles
    pub fn with_bounds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_bound_percentile = lower;
        self.upper_bound_percentile = upper;
        self
    }

    /// True when either winsorization bound is set
    pub fn is_winsorized(&self) -> bool {
        self.lower_bound_percentile.is_some() || self.upper_bound_percentile.is_some()
    }

    fn validate(&self) -> Result<()> {
        for (name, bound) in [
            ("lower_bound_percentile", self.lower_bound_percentile),
            ("upper_bound_percentile", self.upper_bound_percentile),
        ] {
            if let Some(p) = bound
                && !(p > 0.0 && p < 1.0)
            {
                return Err(ExperimentError::InvalidMetric(format!(
                    "{} must be between 0 and 1 (exclusive), got {}",
                    name, p
                )));
            }
        }

        if let (Some(lower), Some(upper)) =
            (self.lower_bound_percentile, self.upper_bound_percentile)
            && lower >= upper
        {
            return Err(ExperimentError::InvalidMetric(format!(
                "lower_bound_percentile ({}) must be below upper_bound_percentile ({})",
                lower, upper
            )));
        }

        if self.math == MathType::Expression
            && self.math_expression.as_deref().is_none_or(|e| e.trim().is_empty())
        {
            return Err(ExperimentError::InvalidMetric(
                "math 'expression' requires math_expression".to_string(),
            ));
        }

        validate_window(self.conversion_window)
    }
}

/// Funnel metric definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelMetric {
    /// Ordered steps; step `i` must happen before step `i + 1`
    pub series: Vec<StepSource>,
    /// Conversion window length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_window: Option<u32>,
    /// Conversion window unit (days when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_window_unit: Option<ConversionWindowUnit>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FunnelMetric {
    /// Create a funnel over ordered steps
    pub fn new(series: Vec<StepSource>) -> Self {
        Self {
            series,
            conversion_window: None,
            conversion_window_unit: None,
            name: None,
        }
    }

    /// Set a conversion window
    pub fn with_conversion_window(mut self, window: u32, unit: ConversionWindowUnit) -> Self {
        self.conversion_window = Some(window);
        self.conversion_window_unit = Some(unit);
        self
    }

    /// Number of steps
    pub fn num_steps(&self) -> usize {
        self.series.len()
    }

    fn validate(&self) -> Result<()> {
        if self.series.is_empty() {
            return Err(ExperimentError::InvalidMetric(
                "funnel series must have at least one step".to_string(),
            ));
        }
        validate_window(self.conversion_window)
    }
}

/// Source of mean-metric rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MetricSource {
    /// Events by name (or all events) plus property filters
    EventsNode(EventSource),
    /// A saved action
    ActionsNode(ActionSource),
    /// An external warehouse table
    DataWarehouseNode(WarehouseSource),
}

/// Source of one funnel step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StepSource {
    /// Events by name (or all events) plus property filters
    EventsNode(EventSource),
    /// A saved action
    ActionsNode(ActionSource),
}

/// Event match
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventSource {
    /// Event name; `None` matches every event
    #[serde(default)]
    pub event: Option<String>,
    /// Extra property filters
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

impl EventSource {
    /// Match a single event name
    pub fn named(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            properties: Vec::new(),
        }
    }

    /// Add a property filter
    pub fn with_property(mut self, filter: PropertyFilter) -> Self {
        self.properties.push(filter);
        self
    }
}

/// Action reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSource {
    /// Action id
    pub id: i64,
    /// Extra property filters
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

impl ActionSource {
    /// Reference an action by id
    pub fn new(id: i64) -> Self {
        Self {
            id,
            properties: Vec::new(),
        }
    }
}

/// Warehouse table reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseSource {
    /// Table name
    pub table_name: String,
    /// Column holding the row timestamp
    pub timestamp_field: String,
    /// Column joined against the exposure identifier
    pub data_warehouse_join_key: String,
    /// Path on exposure events that yields the join identifier
    /// (`properties.x`, `person.properties.x`, or an event column)
    pub events_join_key: String,
    /// Filters on warehouse columns
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

/// How metric rows are valued and aggregated per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MathType {
    /// Count of rows (or sum of the property when one is set)
    #[default]
    Total,
    /// Sum of the property
    Sum,
    /// Average of the property
    Avg,
    /// Minimum of the property
    Min,
    /// Maximum of the property
    Max,
    /// Distinct sessions
    UniqueSession,
    /// Distinct groups
    UniqueGroup,
    /// Distinct active entities
    Dau,
    /// Custom aggregated expression
    Expression,
    /// Anything else; aggregates like `total`
    Unrecognized,
}

impl MathType {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Total => "total",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::UniqueSession => "unique_session",
            Self::UniqueGroup => "unique_group",
            Self::Dau => "dau",
            Self::Expression => "expression",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Parse a math name, mapping unknown names to `Unrecognized`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "total" => Self::Total,
            "sum" => Self::Sum,
            "avg" | "average" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "unique_session" => Self::UniqueSession,
            "unique_group" => Self::UniqueGroup,
            "dau" | "distinct_active_user" => Self::Dau,
            "expression" | "hogql" => Self::Expression,
            _ => Self::Unrecognized,
        }
    }

    /// True for math types whose value is a configured property
    pub fn uses_property(&self) -> bool {
        matches!(self, Self::Sum | Self::Avg | Self::Min | Self::Max)
    }
}

impl From<String> for MathType {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<MathType> for String {
    fn from(math: MathType) -> Self {
        math.as_str().to_string()
    }
}

/// Conversion window unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionWindowUnit {
    /// Seconds
    Second,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Days
    #[default]
    Day,
    /// Weeks (7 days)
    Week,
    /// Months (31 days)
    Month,
}

impl ConversionWindowUnit {
    /// Length of one unit in seconds
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 7 * 86_400,
            Self::Month => 31 * 86_400,
        }
    }
}

fn window_seconds(window: Option<u32>, unit: Option<ConversionWindowUnit>) -> Option<i64> {
    window.map(|w| i64::from(w) * unit.unwrap_or_default().seconds())
}

fn validate_window(window: Option<u32>) -> Result<()> {
    if window == Some(0) {
        return Err(ExperimentError::InvalidMetric(
            "conversion_window must be greater than 0".to_string(),
        ));
    }
    Ok(())
}
