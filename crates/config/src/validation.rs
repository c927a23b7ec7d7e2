//! Configuration validation
//!
//! Validates config consistency:
//! - The query URL is http(s) and the database is named
//! - Credentials come in pairs and the execution limit is positive
//! - The events table is a plain identifier

use crate::Config;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_query(config)?;
    validate_experiments(config)?;
    Ok(())
}

fn validate_query(config: &Config) -> Result<()> {
    let query = &config.query;

    if !query.url.starts_with("http://") && !query.url.starts_with("https://") {
        return Err(ConfigError::invalid_value(
            "query",
            "url",
            format!("must start with http:// or https://, got '{}'", query.url),
        ));
    }

    if query.database.trim().is_empty() {
        return Err(ConfigError::invalid_value("query", "database", "must not be empty"));
    }

    if query.max_execution_time == 0 {
        return Err(ConfigError::invalid_value(
            "query",
            "max_execution_time",
            "must be greater than 0",
        ));
    }

    match (&query.username, &query.password) {
        (Some(_), None) => Err(ConfigError::missing_field("query", "password")),
        (None, Some(_)) => Err(ConfigError::missing_field("query", "username")),
        _ => Ok(()),
    }
}

fn validate_experiments(config: &Config) -> Result<()> {
    let experiments = &config.experiments;

    if !is_plain_identifier(&experiments.events_table) {
        return Err(ConfigError::invalid_value(
            "experiments",
            "events_table",
            format!(
                "must be a plain identifier ([A-Za-z_][A-Za-z0-9_]*), got '{}'",
                experiments.events_table
            ),
        ));
    }

    if experiments.control_variant.trim().is_empty() {
        return Err(ConfigError::invalid_value(
            "experiments",
            "control_variant",
            "must not be empty",
        ));
    }

    Ok(())
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
