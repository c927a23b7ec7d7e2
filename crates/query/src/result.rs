//! Query result types
//!
//! Unified result format across all backends.

use serde::{Deserialize, Serialize};

/// Unified query result across all backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column definitions
    pub columns: Vec<Column>,

    /// Row data as JSON values (backend-agnostic)
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Total row count
    pub row_count: usize,

    /// Query execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(
        columns: Vec<Column>,
        rows: Vec<Vec<serde_json::Value>>,
        execution_time_ms: u64,
    ) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms,
        }
    }

    /// Create an empty result
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
        }
    }

    /// Check if result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Data type
    pub data_type: DataType,

    /// Whether the column is nullable
    pub nullable: bool,
}

impl Column {
    /// Create a new column definition
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Data types supported in query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    UInt64,
    /// 64-bit floating point
    Float64,
    /// UTF-8 string
    String,
    /// Boolean
    Boolean,
    /// Timestamp
    Timestamp,
    /// JSON object, array or tuple
    Json,
    /// Unknown/other type
    Unknown,
}

impl DataType {
    /// Infer a data type from a JSON value
    pub fn infer(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DataType::Unknown,
            serde_json::Value::Bool(_) => DataType::Boolean,
            serde_json::Value::Number(n) => {
                if n.is_f64() {
                    DataType::Float64
                } else if n.is_u64() {
                    DataType::UInt64
                } else {
                    DataType::Int64
                }
            }
            serde_json::Value::String(_) => DataType::String,
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => DataType::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index() {
        let result = QueryResult::new(
            vec![
                Column::new("variant", DataType::String, false),
                Column::new("num_users", DataType::UInt64, false),
            ],
            vec![vec![serde_json::json!("control"), serde_json::json!(5)]],
            3,
        );

        assert_eq!(result.row_count, 1);
        assert_eq!(result.column_index("num_users"), Some(1));
        assert_eq!(result.column_index("missing"), None);
        assert_eq!(result.column_names(), vec!["variant", "num_users"]);
    }

    #[test]
    fn test_infer() {
        assert_eq!(DataType::infer(&serde_json::Value::Null), DataType::Unknown);
        assert_eq!(DataType::infer(&serde_json::json!(true)), DataType::Boolean);
        assert_eq!(DataType::infer(&serde_json::json!(42)), DataType::UInt64);
        assert_eq!(DataType::infer(&serde_json::json!(-42)), DataType::Int64);
        assert_eq!(DataType::infer(&serde_json::json!(1.5)), DataType::Float64);
        assert_eq!(DataType::infer(&serde_json::json!("x")), DataType::String);
        assert_eq!(DataType::infer(&serde_json::json!([1, 2])), DataType::Json);
    }

    #[test]
    fn test_empty() {
        let result = QueryResult::empty();
        assert!(result.is_empty());
        assert_eq!(result.row_count, 0);
    }
}
