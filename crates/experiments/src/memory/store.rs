//! In-memory event and warehouse tables

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::value::Value;
use crate::plan::DEFAULT_EVENTS_TABLE;
use crate::model::MAX_GROUP_TYPE_INDEX;

/// Columns of the events table, in order
pub const EVENT_COLUMNS: &[&str] = &[
    "uuid",
    "event",
    "timestamp",
    "distinct_id",
    "person_id",
    "$session_id",
    "properties",
    "person_properties",
    "$group_0",
    "$group_1",
    "$group_2",
    "$group_3",
    "$group_4",
];

/// One row of the events table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub uuid: String,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub distinct_id: String,
    pub person_id: String,
    #[serde(rename = "$session_id", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub person_properties: serde_json::Map<String, serde_json::Value>,
    /// Group keys by group type index; unset groups read as `''`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<u8, String>,
}

impl EventRecord {
    /// Event of a person, with `distinct_id` equal to the person id
    pub fn new(
        person_id: impl Into<String>,
        event: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let person_id = person_id.into();
        Self {
            uuid: String::new(),
            event: event.into(),
            timestamp,
            distinct_id: person_id.clone(),
            person_id,
            session_id: None,
            properties: serde_json::Map::new(),
            person_properties: serde_json::Map::new(),
            groups: BTreeMap::new(),
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_distinct_id(mut self, distinct_id: impl Into<String>) -> Self {
        self.distinct_id = distinct_id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_person_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.person_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_group(mut self, index: u8, key: impl Into<String>) -> Self {
        self.groups.insert(index, key.into());
        self
    }

    /// Row in [`EVENT_COLUMNS`] order
    fn row(&self) -> Vec<Value> {
        let mut row = vec![
            Value::String(self.uuid.clone()),
            Value::String(self.event.clone()),
            Value::DateTime(self.timestamp),
            Value::String(self.distinct_id.clone()),
            Value::String(self.person_id.clone()),
            self.session_id
                .clone()
                .map(Value::String)
                .unwrap_or_else(|| Value::String(String::new())),
            Value::String(serde_json::Value::Object(self.properties.clone()).to_string()),
            Value::String(serde_json::Value::Object(self.person_properties.clone()).to_string()),
        ];
        for index in 0..=MAX_GROUP_TYPE_INDEX {
            row.push(Value::String(
                self.groups.get(&index).cloned().unwrap_or_default(),
            ));
        }
        row
    }
}

/// Rows of one table with their column names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Event and warehouse tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events_table: String,
    events: Vec<EventRecord>,
    warehouse: BTreeMap<String, Vec<BTreeMap<String, Value>>>,
}

impl MemoryStore {
    /// Empty store with the default events table name
    pub fn new() -> Self {
        Self {
            events_table: DEFAULT_EVENTS_TABLE.to_string(),
            events: Vec::new(),
            warehouse: BTreeMap::new(),
        }
    }

    /// Serve events under another table name
    pub fn with_events_table(mut self, name: impl Into<String>) -> Self {
        self.events_table = name.into();
        self
    }

    /// Add an event; events without a uuid get a sequential one
    pub fn push_event(&mut self, mut event: EventRecord) {
        if event.uuid.is_empty() {
            event.uuid = format!("00000000-0000-0000-0000-{:012}", self.events.len());
        }
        self.events.push(event);
    }

    /// Add events
    pub fn extend_events(&mut self, events: impl IntoIterator<Item = EventRecord>) {
        for event in events {
            self.push_event(event);
        }
    }

    /// Add a warehouse row
    pub fn push_warehouse_row(&mut self, table: impl Into<String>, row: BTreeMap<String, Value>) {
        self.warehouse.entry(table.into()).or_default().push(row);
    }

    /// Number of stored events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Rows of a table, `None` for unknown tables
    pub fn table(&self, name: &str) -> Option<TableData> {
        if name == self.events_table {
            return Some(TableData {
                columns: EVENT_COLUMNS.iter().map(|c| c.to_string()).collect(),
                rows: self.events.iter().map(EventRecord::row).collect(),
            });
        }

        let rows = self.warehouse.get(name)?;
        let columns: Vec<String> = rows
            .iter()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Some(TableData { columns, rows })
    }
}

impl FromIterator<EventRecord> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = EventRecord>>(iter: I) -> Self {
        let mut store = MemoryStore::new();
        store.extend_events(iter);
        store
    }
}
