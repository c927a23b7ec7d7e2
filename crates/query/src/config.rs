//! Query configuration types

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Connection settings for the ClickHouse HTTP interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// ClickHouse HTTP URL
    pub url: String,

    /// Database name
    pub database: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Server-side execution limit in seconds
    pub max_execution_time: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".into(),
            database: "default".into(),
            username: None,
            password: None,
            max_execution_time: 60,
        }
    }
}

impl QueryConfig {
    /// Create config for a ClickHouse server
    pub fn clickhouse(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set authentication credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Check the settings before a backend is built from them
    pub fn validate(&self) -> Result<(), QueryError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(QueryError::Config(format!(
                "url must start with http:// or https://, got '{}'",
                self.url
            )));
        }
        if self.database.trim().is_empty() {
            return Err(QueryError::Config("database must not be empty".to_string()));
        }
        if self.max_execution_time == 0 {
            return Err(QueryError::Config(
                "max_execution_time must be greater than 0".to_string(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(QueryError::Config(
                "username and password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}
