//! Query backend configuration
//!
//! Connection settings for the ClickHouse HTTP interface used by `tally run`.

use serde::Deserialize;

/// Query configuration
///
/// # Example
///
/// ```toml
/// [query]
/// url = "http://ch.internal:8123"
/// database = "posthog"
/// username = "reader"
/// password = "secret"
/// max_execution_time = 120
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// ClickHouse HTTP URL
    /// Default: "http://localhost:8123"
    pub url: String,

    /// Database name
    /// Default: "default"
    pub database: String,

    /// Username, set together with `password`
    pub username: Option<String>,

    /// Password, set together with `username`
    pub password: Option<String>,

    /// Server-side execution limit in seconds
    /// Default: 60
    pub max_execution_time: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "default".to_string(),
            username: None,
            password: None,
            max_execution_time: 60,
        }
    }
}

impl QueryConfig {
    /// Username and password when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}
