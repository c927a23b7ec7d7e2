//! ClickHouse backend for compiled experiment plans
//!
//! Sends SQL to ClickHouse over the HTTP interface. Queries go in the POST
//! body: GET requests run with `readonly=1`, which rejects the `SETTINGS`
//! clause compiled plans carry.

use std::time::Instant;

use async_trait::async_trait;

use crate::backend::{QueryBackend, validate_sql};
use crate::error::QueryError;
use crate::result::{Column, DataType, QueryResult};

// =============================================================================
// Configuration
// =============================================================================

/// ClickHouse backend configuration
#[derive(Debug, Clone)]
pub struct ClickHouseBackendConfig {
    /// ClickHouse HTTP URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,

    /// Username for authentication (optional)
    pub username: Option<String>,

    /// Password for authentication (optional)
    pub password: Option<String>,

    /// Max execution time in seconds
    pub max_execution_time: u64,
}

impl Default for ClickHouseBackendConfig {
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

impl ClickHouseBackendConfig {
    /// Create a new config with URL and database
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
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

    /// Set the server-side execution limit
    pub fn with_max_execution_time(mut self, seconds: u64) -> Self {
        self.max_execution_time = seconds;
        self
    }
}

// =============================================================================
// Backend Implementation
// =============================================================================

/// ClickHouse backend using the HTTP interface
#[derive(Clone)]
pub struct ClickHouseBackend {
    client: reqwest::Client,
    config: ClickHouseBackendConfig,
}

impl std::fmt::Debug for ClickHouseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseBackend")
            .field("url", &self.config.url)
            .field("database", &self.config.database)
            .finish()
    }
}

impl ClickHouseBackend {
    /// Create a new ClickHouse backend from config
    pub fn new(config: &ClickHouseBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: config.clone(),
        }
    }

    /// Create from URL and database directly
    pub fn from_url(url: impl Into<String>, database: impl Into<String>) -> Self {
        let config = ClickHouseBackendConfig::new(url, database);
        Self::new(&config)
    }

    /// Build the endpoint URL with connection-level parameters
    ///
    /// 64-bit integers are requested unquoted so counts parse as numbers.
    fn build_url(&self) -> String {
        format!(
            "{}/?database={}&max_execution_time={}&output_format_json_quote_64bit_integers=0",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&self.config.database),
            self.config.max_execution_time
        )
    }

    /// Execute a query and get the raw response body
    async fn execute_query(&self, sql: &str) -> Result<String, QueryError> {
        let mut request = self.client.post(self.build_url()).body(sql.to_string());

        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|e| {
            QueryError::Connection(format!("ClickHouse connection failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Execution(format!(
                "ClickHouse error ({}): {}",
                status, body
            )));
        }

        response
            .text()
            .await
            .map_err(|e| QueryError::Execution(format!("failed to read response: {}", e)))
    }
}

#[async_trait]
impl QueryBackend for ClickHouseBackend {
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError> {
        validate_sql(sql)?;

        let start = Instant::now();

        let query_with_format = format!("{} FORMAT JSONEachRow", sql.trim().trim_end_matches(';'));
        let response_text = self.execute_query(&query_with_format).await?;

        let execution_time_ms = start.elapsed().as_millis() as u64;

        let result = parse_json_each_row(&response_text, execution_time_ms)?;

        tracing::debug!(
            rows = result.row_count,
            cols = result.columns.len(),
            time_ms = execution_time_ms,
            "ClickHouse query executed"
        );

        Ok(result)
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        self.execute_query("SELECT 1").await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "clickhouse"
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Parse a `JSONEachRow` body into a result, keeping the server's column order
fn parse_json_each_row(body: &str, execution_time_ms: u64) -> Result<QueryResult, QueryError> {
    let json_rows: Vec<serde_json::Map<String, serde_json::Value>> = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                QueryError::Serialization(format!("failed to parse JSON row: {}", e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let Some(first_row) = json_rows.first() else {
        return Ok(QueryResult::new(Vec::new(), Vec::new(), execution_time_ms));
    };

    let column_names: Vec<String> = first_row.keys().cloned().collect();

    let columns: Vec<Column> = column_names
        .iter()
        .map(|name| {
            let value = first_row.get(name).unwrap_or(&serde_json::Value::Null);
            Column::new(name.clone(), DataType::infer(value), true)
        })
        .collect();

    let rows: Vec<Vec<serde_json::Value>> = json_rows
        .iter()
        .map(|row| {
            column_names
                .iter()
                .map(|name| row.get(name).cloned().unwrap_or(serde_json::Value::Null))
                .collect()
        })
        .collect();

    Ok(QueryResult::new(columns, rows, execution_time_ms))
}

/// URL encoding helper
mod urlencoding {
    pub fn encode(s: &str) -> String {
        let mut result = String::with_capacity(s.len() * 3);
        for c in s.chars() {
            match c {
                'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => {
                    result.push(c);
                }
                ' ' => result.push_str("%20"),
                _ => {
                    for byte in c.to_string().as_bytes() {
                        result.push_str(&format!("%{:02X}", byte));
                    }
                }
            }
        }
        result
    }
}
