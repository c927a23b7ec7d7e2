//! Saved actions and team settings
//!
//! Actions and team settings are owned by the model layer. The compiler only
//! reads them, through [`ActionCatalog`] and [`TeamSettings`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::property::PropertyFilter;

/// A saved action: matches a row when any of its steps matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action id
    pub id: i64,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Alternative match rules
    #[serde(default)]
    pub steps: Vec<ActionStep>,
}

impl Action {
    /// Create an action
    pub fn new(id: i64, name: impl Into<String>, steps: Vec<ActionStep>) -> Self {
        Self {
            id,
            name: name.into(),
            steps,
        }
    }
}

/// One match rule of an action
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionStep {
    /// Event name; any event when unset
    #[serde(default)]
    pub event: Option<String>,
    /// Property filters, all of which must match
    #[serde(default)]
    pub properties: Vec<PropertyFilter>,
}

impl ActionStep {
    /// Step matching one event name
    pub fn event(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            properties: Vec::new(),
        }
    }

    /// Add a property filter
    pub fn with_property(mut self, filter: PropertyFilter) -> Self {
        self.properties.push(filter);
        self
    }
}

/// Lookup of saved actions by id
pub trait ActionCatalog: Send + Sync {
    /// Action with this id, `None` when it was deleted or never existed
    fn action(&self, id: i64) -> Option<&Action>;
}

/// In-memory action catalog
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: BTreeMap<i64, Action>,
}

impl ActionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an action
    pub fn insert(&mut self, action: Action) {
        self.actions.insert(action.id, action);
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when no action is known
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().map(|a| (a.id, a)).collect(),
        }
    }
}

impl ActionCatalog for ActionSet {
    fn action(&self, id: i64) -> Option<&Action> {
        self.actions.get(&id)
    }
}

/// Team-level settings the compiler reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamSettings {
    /// Filters every non-test row satisfies, e.g. `email not_icontains @corp.com`
    #[serde(default)]
    pub test_account_filters: Vec<PropertyFilter>,
}
