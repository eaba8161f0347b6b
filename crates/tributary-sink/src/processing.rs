//! Payload flattening and value coercion port.
//!
//! A processor turns a raw payload into [`RowGroup`]s (flattened rows
//! grouped by target table, each group carrying the schema its rows
//! require) and later coerces row values to the column types of the
//! destination-accurate schema the synchronizer returns.

use thiserror::Error;

use crate::events::Record;
use crate::schema::TableSchema;
use crate::typing::TypingError;

/// Errors produced by payload processing.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The raw payload could not be parsed.
    #[error("payload parse error: {0}")]
    Parse(String),

    /// A parsed event could not be flattened into a row.
    #[error("flattening error: {0}")]
    Flatten(String),

    /// A row value could not be cast to its destination column type.
    #[error("type coercion failed for column {column}: {message}")]
    Coercion {
        /// The column whose value failed to cast.
        column: String,
        /// What went wrong.
        message: String,
    },

    /// A typing error surfaced during schema derivation.
    #[error(transparent)]
    Typing(#[from] TypingError),
}

/// Flattened rows bound for one table, with the schema they require.
#[derive(Debug, Clone)]
pub struct RowGroup {
    /// The schema the rows require (the desired schema).
    pub schema: TableSchema,
    /// The rows themselves.
    pub rows: Vec<Record>,
}

impl RowGroup {
    /// Creates an empty group for the given schema.
    #[must_use]
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Number of rows in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the group has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Flattens payloads and coerces row values to destination types.
///
/// Implementations are pure in-memory computation and must be callable
/// concurrently.
pub trait SchemaProcessor: Send + Sync {
    /// Flattens a raw payload into row groups keyed by target table.
    ///
    /// # Errors
    ///
    /// With `break_on_error` unset, a single malformed record must not
    /// abort the payload — skip it and keep going. With it set, the
    /// first malformed record fails the whole call.
    fn flatten(
        &self,
        identifier: &str,
        payload: &[u8],
        break_on_error: bool,
    ) -> Result<Vec<RowGroup>, ProcessingError>;

    /// Coerces every row in the group to `schema`'s column types.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Coercion`] when a value cannot be
    /// represented in its destination column type.
    fn coerce_group(&self, schema: &TableSchema, group: &mut RowGroup)
        -> Result<(), ProcessingError>;

    /// Coerces a single record to `schema`'s column types.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Coercion`] when a value cannot be
    /// represented in its destination column type.
    fn coerce_record(&self, schema: &TableSchema, record: &mut Record)
        -> Result<(), ProcessingError>;

    /// Flattens one decoded event for the streaming path, returning the
    /// row and the schema it requires.
    ///
    /// # Errors
    ///
    /// Returns an error when the event cannot be flattened or typed.
    fn process_event(
        &self,
        event: &serde_json::Value,
    ) -> Result<(TableSchema, Record), ProcessingError>;
}
