//! Property filters
//!
//! A filter compares one property of a row against a value. Event and person
//! properties live in JSON columns; warehouse properties are plain columns.

use serde::{Deserialize, Serialize};

/// Where a filtered property lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// Event properties (`properties` JSON column)
    #[default]
    Event,
    /// Person properties snapshotted on the event (`person_properties` JSON column)
    Person,
    /// A raw column of a warehouse table
    DataWarehouse,
}

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOperator {
    /// Equal (or IN for list values)
    #[default]
    Exact,
    /// Not equal (or NOT IN for list values)
    IsNot,
    /// Case-insensitive substring
    Icontains,
    /// Case-insensitive substring absent
    NotIcontains,
    /// Regex match
    Regex,
    /// Regex does not match
    NotRegex,
    /// Numeric greater than
    Gt,
    /// Numeric greater than or equal
    Gte,
    /// Numeric less than
    Lt,
    /// Numeric less than or equal
    Lte,
    /// Property present
    IsSet,
    /// Property absent
    IsNotSet,
}

/// A single comparison value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// Text value
    Text(String),
}

impl Scalar {
    /// Text form used for string comparisons
    ///
    /// Whole numbers print without a fractional part so `10` matches `"10"`.
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Numeric form used for ordered comparisons
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Bool(_) => None,
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Filter value: one scalar or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Multiple values (IN semantics for exact/is_not)
    List(Vec<Scalar>),
    /// Single value
    Single(Scalar),
}

impl PropertyValue {
    /// All scalars in this value
    pub fn scalars(&self) -> Vec<&Scalar> {
        match self {
            Self::List(values) => values.iter().collect(),
            Self::Single(value) => vec![value],
        }
    }

    /// First scalar, if any
    pub fn first(&self) -> Option<&Scalar> {
        match self {
            Self::List(values) => values.first(),
            Self::Single(value) => Some(value),
        }
    }
}

/// A single property filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Property key
    pub key: String,
    /// Comparison operator
    #[serde(default)]
    pub operator: PropertyOperator,
    /// Value(s) to compare against (absent for is_set/is_not_set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
    /// Where the property lives
    #[serde(default, rename = "type")]
    pub property_type: PropertyType,
}

impl PropertyFilter {
    /// Create a filter with an explicit operator
    pub fn new(
        key: impl Into<String>,
        operator: PropertyOperator,
        value: Option<PropertyValue>,
    ) -> Self {
        Self {
            key: key.into(),
            operator,
            value,
            property_type: PropertyType::Event,
        }
    }

    /// Create an equality filter on an event property
    pub fn exact(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::new(
            key,
            PropertyOperator::Exact,
            Some(PropertyValue::Single(value.into())),
        )
    }

    /// Create a negated-substring filter on an event property
    pub fn not_icontains(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self::new(
            key,
            PropertyOperator::NotIcontains,
            Some(PropertyValue::Single(value.into())),
        )
    }

    /// Set where the property lives
    pub fn with_type(mut self, property_type: PropertyType) -> Self {
        self.property_type = property_type;
        self
    }
}
