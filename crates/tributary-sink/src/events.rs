//! Decoded event values and flattened rows.
//!
//! A [`Record`] is one flattened row bound for a destination table:
//! column name to scalar [`EventValue`]. Flattening itself (nested JSON
//! to dotted column paths, timestamp field promotion, and so on) is the
//! processing port's job; this module only defines the value model both
//! sides agree on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// One flattened row: column name to scalar value.
pub type Record = BTreeMap<String, EventValue>;

/// A decoded scalar carried by an event field.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    /// An explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer.
    Int(i64),
    /// A 64-bit float. JSON deserializers produce this for every
    /// non-integer number, including values like `5.0`.
    Float(f64),
    /// A text value.
    String(String),
    /// A timezone-aware timestamp, produced by processors that promote
    /// recognized timestamp fields.
    Timestamp(DateTime<Utc>),
}

impl EventValue {
    /// Converts a JSON scalar into an [`EventValue`].
    ///
    /// Numbers representable as `i64` become [`EventValue::Int`]; all
    /// other numbers (including `u64` values past `i64::MAX`) become
    /// [`EventValue::Float`]. Arrays and objects are not scalars and
    /// yield `None` — flattening them is the processor's concern.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(EventValue::Null),
            serde_json::Value::Bool(b) => Some(EventValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(EventValue::Int(i))
                } else {
                    n.as_f64().map(EventValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(EventValue::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        EventValue::Int(v)
    }
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        EventValue::Float(v)
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        EventValue::Bool(v)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::String(v.to_string())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        EventValue::String(v)
    }
}

impl From<DateTime<Utc>> for EventValue {
    fn from(v: DateTime<Utc>) -> Self {
        EventValue::Timestamp(v)
    }
}
