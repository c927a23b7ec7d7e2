//! Tally Query - SQL execution for compiled experiment plans
//!
//! The compiler in `tally-experiments` never talks to a database directly.
//! It hands rendered SQL to a [`QueryBackend`], which returns a backend-agnostic
//! [`QueryResult`]. Errors raised here are passed through to callers untouched.
//!
//! # Usage
//!
//! ```ignore
//! use tally_query::{QueryConfig, QueryEngine};
//!
//! let config = QueryConfig::clickhouse("http://localhost:8123", "posthog");
//! let engine = QueryEngine::from_config(&config)?;
//!
//! let result = engine.query("SELECT count() FROM events").await?;
//! println!("Rows: {}", result.row_count);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod result;

// Re-exports
pub use backend::QueryBackend;
pub use backend::clickhouse::{ClickHouseBackend, ClickHouseBackendConfig};
pub use config::QueryConfig;
pub use error::QueryError;
pub use result::{Column, DataType, QueryResult};

use std::sync::Arc;

/// Query engine that routes queries to the configured backend
#[derive(Clone)]
pub struct QueryEngine {
    backend: Arc<dyn QueryBackend>,
}

impl QueryEngine {
    /// Create a new query engine with a specific backend
    pub fn new(backend: impl QueryBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Create a query engine from config
    pub fn from_config(config: &QueryConfig) -> Result<Self, QueryError> {
        config.validate()?;

        let mut ch_config = ClickHouseBackendConfig::new(&config.url, &config.database)
            .with_max_execution_time(config.max_execution_time);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            ch_config = ch_config.with_credentials(user, pass);
        }

        Ok(Self::new(ClickHouseBackend::new(&ch_config)))
    }

    /// Execute a SQL query
    pub async fn query(&self, sql: &str) -> Result<QueryResult, QueryError> {
        self.backend.execute(sql).await
    }

    /// Check if the backend is healthy
    pub async fn health_check(&self) -> Result<(), QueryError> {
        self.backend.health_check().await
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

// Lets a QueryEngine stand in wherever a backend is expected
#[async_trait::async_trait]
impl QueryBackend for QueryEngine {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        self.backend.execute(sql).await
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        self.backend.health_check().await
    }

    fn name(&self) -> &'static str {
        self.backend.name()
    }
}
