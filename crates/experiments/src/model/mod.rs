//! Metric, exposure and experiment model

pub mod action;
pub mod criteria;
pub mod experiment;
pub mod metric;
pub mod property;

pub use action::{Action, ActionCatalog, ActionSet, ActionStep, TeamSettings};
pub use criteria::{
    DEFAULT_EXPOSURE_EVENT, ExposureConfig, ExposureCriteria, FEATURE_FLAG_PROPERTY,
    FEATURE_FLAG_RESPONSE_PROPERTY, MULTIPLE_VARIANT_KEY, MultipleVariantHandling,
};
pub use experiment::{CONTROL_VARIANT, DateRange, EntityKey, Experiment, MAX_GROUP_TYPE_INDEX};
pub use metric::{
    ActionSource, ConversionWindowUnit, EventSource, ExperimentMetric, FunnelMetric, MathType,
    MeanMetric, MetricKind, MetricSource, StepSource, WarehouseSource,
};
pub use property::{PropertyFilter, PropertyOperator, PropertyType, PropertyValue, Scalar};
