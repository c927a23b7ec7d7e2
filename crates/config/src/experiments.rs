//! Experiment compiler configuration

use serde::Deserialize;

/// Plan strategy name
///
/// Mirrors the compiler's plan strategies without depending on it.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    /// Single scan when the metric allows it, join otherwise
    #[default]
    Auto,
    /// Join-based plan
    Join,
    /// Single-scan plan
    SingleScan,
}

impl StrategyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Join => "join",
            Self::SingleScan => "single_scan",
        }
    }
}

/// Experiment compiler settings
///
/// # Example
///
/// ```toml
/// [experiments]
/// strategy = "join"
/// events_table = "events_v2"
/// control_variant = "control"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExperimentsConfig {
    /// Default plan strategy
    /// Default: auto
    pub strategy: StrategyName,

    /// Events table the plans read
    /// Default: "events"
    pub events_table: String,

    /// Variant key treated as control
    /// Default: "control"
    pub control_variant: String,
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyName::Auto,
            events_table: "events".to_string(),
            control_variant: "control".to_string(),
        }
    }
}
