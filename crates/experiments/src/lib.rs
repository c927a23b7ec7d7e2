//! Tally Experiments - experiment metric query compiler
//!
//! Turns an experiment definition (feature flag, variants, exposure criteria)
//! and one metric into a single aggregate query returning, per variant, the
//! sufficient statistics downstream significance tests need.
//!
//! # Overview
//!
//! - **Model**: experiments, metrics, exposure criteria, property filters
//! - **Plans**: the `join` plan (exposures joined to metric rows) and the
//!   `single_scan` plan (one grouped pass over events), built as typed
//!   [`SelectQuery`] trees
//! - **Rendering**: ClickHouse SQL for a [`tally_query::QueryBackend`]
//! - **Memory executor**: interprets the same trees over in-memory events
//! - **Results**: per-variant rows, ordering and no-data checks
//!
//! # Usage
//!
//! ```ignore
//! use tally_experiments::{ExperimentQueryRunner, ExperimentRequest, SqlExecutor};
//! use tally_query::{QueryConfig, QueryEngine};
//!
//! let engine = QueryEngine::from_config(&QueryConfig::clickhouse(url, "posthog"))?;
//! let runner = ExperimentQueryRunner::new(Arc::new(SqlExecutor::new(Arc::new(engine))));
//!
//! let response = runner.run(&request, 0, Utc::now()).await?;
//! for stats in &response.statistics {
//!     println!("{}", serde_json::to_string(stats)?);
//! }
//! ```

pub mod error;
pub mod exposure;
pub mod filters;
pub mod funnel;
pub mod memory;
pub mod model;
pub mod plan;
pub mod result;
pub mod runner;
pub mod sql;
pub mod synth;

// Re-exports for convenience
pub use error::{ExperimentError, NoDataReport, Result};
pub use memory::{EventRecord, MemoryExecutor, MemoryStore};
pub use model::{
    Action, ActionSet, ActionStep, DateRange, EntityKey, Experiment, ExperimentMetric,
    ExposureCriteria, FunnelMetric, MathType, MeanMetric, MetricKind, MetricSource,
    MultipleVariantHandling, PropertyFilter, TeamSettings,
};
pub use plan::{CompiledPlan, PlanInput, PlanStrategy, compile};
pub use result::{VariantRow, VariantStatistics};
pub use runner::{
    ExperimentQueryResponse, ExperimentQueryRunner, ExperimentRequest, PlanExecutor, SqlExecutor,
};
pub use sql::{SelectQuery, render_query};
