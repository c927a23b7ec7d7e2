//! Exposure criteria
//!
//! Decides which events count as exposures and how an entity exposed to more
//! than one variant is labelled.

use serde::{Deserialize, Serialize};

use crate::model::metric::{ActionSource, EventSource};

/// Variant label for entities whose exposures disagree
pub const MULTIPLE_VARIANT_KEY: &str = "$multiple";

/// Event emitted when a feature flag is evaluated
pub const DEFAULT_EXPOSURE_EVENT: &str = "$feature_flag_called";

/// Property on the default exposure event naming the flag
pub const FEATURE_FLAG_PROPERTY: &str = "$feature_flag";

/// Property on the default exposure event carrying the variant
pub const FEATURE_FLAG_RESPONSE_PROPERTY: &str = "$feature_flag_response";

/// Exposure criteria for an experiment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureCriteria {
    /// Custom exposure event or action; the flag-called event when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_config: Option<ExposureConfig>,
    /// Exclude rows matching the team's test-account filters
    #[serde(default)]
    pub filter_test_accounts: bool,
    /// Policy for entities exposed to several variants
    #[serde(default)]
    pub multiple_variant_handling: MultipleVariantHandling,
}

impl ExposureCriteria {
    /// Criteria using a custom exposure source
    pub fn with_config(mut self, config: ExposureConfig) -> Self {
        self.exposure_config = Some(config);
        self
    }

    /// Set the multiple-variant policy
    pub fn with_handling(mut self, handling: MultipleVariantHandling) -> Self {
        self.multiple_variant_handling = handling;
        self
    }

    /// Toggle test-account filtering
    pub fn with_test_account_filter(mut self, enabled: bool) -> Self {
        self.filter_test_accounts = enabled;
        self
    }

    /// Custom exposure source, ignoring a config that names the default event
    pub fn custom_exposure(&self) -> Option<&ExposureConfig> {
        match &self.exposure_config {
            Some(ExposureConfig::EventsNode(source))
                if source.event.as_deref() == Some(DEFAULT_EXPOSURE_EVENT) =>
            {
                None
            }
            other => other.as_ref(),
        }
    }

    /// Property carrying the variant on exposure rows
    ///
    /// The flag-called event reports it in `$feature_flag_response`; any
    /// other event carries the flag's value in `$feature/<flag>`.
    pub fn variant_property(&self, feature_flag_key: &str) -> String {
        match self.custom_exposure() {
            None => FEATURE_FLAG_RESPONSE_PROPERTY.to_string(),
            Some(_) => format!("$feature/{}", feature_flag_key),
        }
    }
}

/// Custom exposure source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExposureConfig {
    /// A named event with optional property filters
    EventsNode(EventSource),
    /// A saved action
    ActionsNode(ActionSource),
}

/// What to do with entities seen in more than one variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipleVariantHandling {
    /// Label them `$multiple` and drop them from results
    #[default]
    Exclude,
    /// Keep the variant of their earliest exposure
    FirstSeen,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::property::PropertyFilter;

    #[test]
    fn test_defaults() {
        let criteria: ExposureCriteria = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(criteria.multiple_variant_handling, MultipleVariantHandling::Exclude);
        assert!(!criteria.filter_test_accounts);
        assert!(criteria.custom_exposure().is_none());
        assert_eq!(criteria.variant_property("checkout"), "$feature_flag_response");
    }

    #[test]
    fn test_custom_event_uses_flag_property() {
        let criteria: ExposureCriteria = serde_json::from_value(serde_json::json!({
            "exposure_config": {
                "kind": "EventsNode",
                "event": "$pageview",
                "properties": [{"key": "$current_url", "value": "/checkout"}]
            },
            "multiple_variant_handling": "first_seen"
        }))
        .unwrap();

        assert_eq!(criteria.multiple_variant_handling, MultipleVariantHandling::FirstSeen);
        assert!(criteria.custom_exposure().is_some());
        assert_eq!(criteria.variant_property("checkout"), "$feature/checkout");
    }

    #[test]
    fn test_default_event_config_is_not_custom() {
        let source = EventSource::named(DEFAULT_EXPOSURE_EVENT)
            .with_property(PropertyFilter::exact("plan", "pro"));
        let criteria = ExposureCriteria::default().with_config(ExposureConfig::EventsNode(source));

        assert!(criteria.custom_exposure().is_none());
        assert_eq!(criteria.variant_property("flag"), FEATURE_FLAG_RESPONSE_PROPERTY);
    }
}
