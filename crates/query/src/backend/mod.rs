//! Query backend trait and implementations

pub mod clickhouse;

use async_trait::async_trait;

use crate::error::QueryError;
use crate::result::QueryResult;

/// Query backend trait
///
/// Implemented by the ClickHouse backend and by anything that can run
/// rendered SQL and hand back rows.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Execute a SQL query
    async fn execute(&self, sql: &str) -> Result<QueryResult, QueryError>;

    /// Check if backend is available
    async fn health_check(&self) -> Result<(), QueryError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Validate SQL query - only allow SELECT and WITH (CTE) queries
///
/// Compiled experiment plans are read-only; this rejects anything else
/// before it reaches the server.
pub fn validate_sql(sql: &str) -> Result<(), QueryError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();

    if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
        return Err(QueryError::InvalidSql(
            "only SELECT and WITH queries are allowed".to_string(),
        ));
    }

    // SELECT ... INTO creates tables in some databases
    if upper.contains(" INTO ") && !upper.contains("INSERT INTO") {
        return Err(QueryError::InvalidSql(
            "SELECT INTO is not allowed".to_string(),
        ));
    }

    // Allow a single trailing semicolon only
    if trimmed.contains(';') && !trimmed.ends_with(';') {
        return Err(QueryError::InvalidSql(
            "multiple statements not allowed".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sql_select() {
        assert!(validate_sql("SELECT variant, count(entity_id) FROM events").is_ok());
        assert!(validate_sql("  select 1  ").is_ok());
    }

    #[test]
    fn test_validate_sql_with() {
        assert!(validate_sql("WITH exposures AS (SELECT 1) SELECT * FROM exposures").is_ok());
    }

    #[test]
    fn test_validate_sql_invalid() {
        assert!(validate_sql("INSERT INTO events VALUES (1)").is_err());
        assert!(validate_sql("DROP TABLE events").is_err());
        assert!(validate_sql("ALTER TABLE events DELETE WHERE 1").is_err());
    }

    #[test]
    fn test_validate_sql_multiple_statements() {
        assert!(validate_sql("SELECT 1; DROP TABLE events").is_err());
        assert!(validate_sql("SELECT 1;").is_ok());
    }

    #[test]
    fn test_validate_sql_select_into_blocked() {
        assert!(validate_sql("SELECT * INTO backup FROM events").is_err());
    }

    #[test]
    fn test_validate_sql_settings_clause_ok() {
        assert!(
            validate_sql("SELECT variant FROM (SELECT 1 AS variant) SETTINGS join_use_nulls = 1")
                .is_ok()
        );
    }
}
