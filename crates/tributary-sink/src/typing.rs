//! Logical data types and value type inference.
//!
//! Provides:
//!
//! - [`DataType`] — the five-type logical lattice destinations are
//!   described in, totally ordered by widening
//! - [`infer_type`] — maps a decoded scalar to its logical type
//! - [`DataType::from_config_name`] / [`DataType::config_name`] — the
//!   bidirectional mapping to configuration-facing type names
//!
//! Everything here is pure and safe to call concurrently.

use std::fmt;

use thiserror::Error;

use crate::events::EventValue;

/// Result alias for typing operations.
pub type TypingResult<T> = Result<T, TypingError>;

/// Errors produced by type inference and type-name mapping.
#[derive(Debug, Error)]
pub enum TypingError {
    /// A value has no logical type (e.g. a null or boolean scalar).
    #[error("unknown data type for value: {0}")]
    UnknownType(String),

    /// A configuration-facing type name is not in the known set.
    #[error("unknown casting type: {0}")]
    UnknownCastTarget(String),

    /// A logical type has no configuration-facing name.
    #[error("no external type name for {0}")]
    NoConfigName(DataType),
}

/// A logical column type.
///
/// Declaration order is the widening order: when two values disagree on
/// type, the wider (greater) one wins. `Ord` derives from that order,
/// so [`DataType::widen`] is just `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    /// No type could be determined. Never stored in a schema.
    Unknown,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// Text.
    String,
    /// Timezone-aware timestamp.
    Timestamp,
}

impl DataType {
    /// Returns the wider of the two types.
    #[must_use]
    pub fn widen(self, other: Self) -> Self {
        self.max(other)
    }

    /// Parses a configuration-facing type name.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`TypingError::UnknownCastTarget`] for names outside the
    /// known set.
    pub fn from_config_name(name: &str) -> TypingResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(DataType::String),
            "integer" => Ok(DataType::Int64),
            "double" => Ok(DataType::Float64),
            "timestamp" => Ok(DataType::Timestamp),
            _ => Err(TypingError::UnknownCastTarget(name.to_string())),
        }
    }

    /// Returns the configuration-facing name of this type.
    ///
    /// # Errors
    ///
    /// Returns [`TypingError::NoConfigName`] for [`DataType::Unknown`],
    /// which has no external representation.
    pub fn config_name(self) -> TypingResult<&'static str> {
        match self {
            DataType::String => Ok("string"),
            DataType::Int64 => Ok("integer"),
            DataType::Float64 => Ok("double"),
            DataType::Timestamp => Ok("timestamp"),
            DataType::Unknown => Err(TypingError::NoConfigName(self)),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Unknown => "UNKNOWN",
            DataType::Int64 => "INT64",
            DataType::Float64 => "FLOAT64",
            DataType::String => "STRING",
            DataType::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

/// Infers the logical type of a decoded scalar.
///
/// A float whose truncation equals itself is reported as
/// [`DataType::Int64`]: JSON deserializers have no distinct integer
/// representation, so `5.0` must type the same as `5`.
///
/// # Errors
///
/// Returns [`TypingError::UnknownType`] for values with no logical type
/// (nulls and booleans).
#[allow(clippy::float_cmp)]
pub fn infer_type(value: &EventValue) -> TypingResult<DataType> {
    match value {
        EventValue::String(_) => Ok(DataType::String),
        EventValue::Timestamp(_) => Ok(DataType::Timestamp),
        EventValue::Int(_) => Ok(DataType::Int64),
        EventValue::Float(v) => {
            if v.trunc() == *v {
                Ok(DataType::Int64)
            } else {
                Ok(DataType::Float64)
            }
        }
        other => Err(TypingError::UnknownType(format!("{other:?}"))),
    }
}
