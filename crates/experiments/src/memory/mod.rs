//! In-memory reference executor
//!
//! Interprets compiled plans directly over events held in memory, with the
//! ClickHouse semantics the rendered SQL relies on (`join_use_nulls`,
//! three-valued logic, NULL-skipping aggregates and `windowFunnel`). Used to
//! check plans against each other and to simulate experiments offline.

pub mod eval;
pub mod exec;
pub mod store;
pub mod value;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tally_query::{Column, DataType, QueryError, QueryResult};

use crate::runner::PlanExecutor;
use crate::sql::query::SelectQuery;

pub use exec::{Relation, execute_query};
pub use store::{EventRecord, MemoryStore};
pub use value::Value;

/// Executes plans against a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryExecutor {
    store: Arc<MemoryStore>,
}

impl MemoryExecutor {
    /// Create an executor over a store
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Store the executor reads from
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Load events from a JSON-lines file
    ///
    /// Blank lines are skipped.
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self, QueryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QueryError::Connection(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut store = MemoryStore::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: EventRecord = serde_json::from_str(line).map_err(|e| {
                QueryError::Serialization(format!("{}:{}: {}", path.display(), number + 1, e))
            })?;
            store.push_event(event);
        }

        tracing::debug!(
            path = %path.display(),
            events = store.event_count(),
            "loaded events"
        );
        Ok(Self::new(store))
    }

    /// Serve events under another table name
    pub fn with_events_table(self, name: impl Into<String>) -> Self {
        let store = Arc::unwrap_or_clone(self.store).with_events_table(name);
        Self::new(store)
    }
}

/// Execute a query and convert the rows to a [`QueryResult`]
pub fn execute(store: &MemoryStore, query: &SelectQuery) -> Result<QueryResult, QueryError> {
    let start = Instant::now();
    let relation = execute_query(store, query)?;

    let columns = relation
        .columns
        .iter()
        .enumerate()
        .map(|(i, (_, name))| {
            let data_type = relation
                .rows
                .iter()
                .map(|row| row[i].to_json())
                .find(|value| !value.is_null())
                .map(|value| DataType::infer(&value))
                .unwrap_or(DataType::Unknown);
            Column::new(name.clone(), data_type, true)
        })
        .collect();

    let rows = relation
        .rows
        .iter()
        .map(|row| row.iter().map(Value::to_json).collect())
        .collect();

    Ok(QueryResult::new(
        columns,
        rows,
        start.elapsed().as_millis() as u64,
    ))
}

#[async_trait]
impl PlanExecutor for MemoryExecutor {
    async fn execute_plan(&self, query: &SelectQuery) -> Result<QueryResult, QueryError> {
        execute(&self.store, query)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
