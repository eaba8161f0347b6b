//! Table schemas and pure schema diffing.
//!
//! A [`TableSchema`] is the unit the synchronization protocol works on:
//! a named, versioned column set. [`TableSchema::diff`] computes the
//! additive [`SchemaDiff`] a desired schema requires on top of the
//! current one; it is pure and never proposes re-typing or dropping an
//! existing column — column sets only grow.

use std::collections::BTreeMap;

use crate::typing::DataType;

/// A destination column. The name lives in the owning map's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// The column's logical type.
    pub data_type: DataType,
}

impl Column {
    /// Creates a column of the given type.
    #[must_use]
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

/// A named, versioned table schema.
///
/// The version ties the schema to the coordination port's per-table
/// counter: it must equal the counter's value as of the moment the
/// schema was last observed correct. A schema fetched for a table that
/// does not exist at the destination has an empty column set and
/// [`TableSchema::exists`] is `false` — a valid state, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    /// Destination table name.
    pub name: String,
    /// Column name to column, unique by key.
    pub columns: BTreeMap<String, Column>,
    /// Last observed value of the table's version counter.
    pub version: i64,
}

impl TableSchema {
    /// Creates an empty schema for `name` at version 0.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            version: 0,
        }
    }

    /// Adds a column, replacing any previous definition of that name.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.insert(name.into(), Column::new(data_type));
        self
    }

    /// Whether the table this schema describes exists at the destination.
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Computes the additive diff required to cover `desired`.
    ///
    /// The diff contains exactly the desired columns absent from this
    /// schema. A column present in both is never included, even with a
    /// conflicting type: type disagreement between values is resolved
    /// ahead of diffing by the widening order, and at write time by
    /// value coercion.
    #[must_use]
    pub fn diff(&self, desired: &TableSchema) -> SchemaDiff {
        let columns = desired
            .columns
            .iter()
            .filter(|(name, _)| !self.columns.contains_key(*name))
            .map(|(name, column)| (name.clone(), *column))
            .collect();

        SchemaDiff {
            table: self.name.clone(),
            columns,
        }
    }

    /// Folds a diff's columns into this schema.
    pub fn merge_diff(&mut self, diff: &SchemaDiff) {
        for (name, column) in &diff.columns {
            self.columns.insert(name.clone(), *column);
        }
    }
}

/// The columns a desired schema requires on top of a current one.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDiff {
    /// The table the diff applies to.
    pub table: String,
    /// Columns to add, keyed by name.
    pub columns: BTreeMap<String, Column>,
}

impl SchemaDiff {
    /// Whether any migration is needed.
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str, columns: &[(&str, DataType)]) -> TableSchema {
        columns
            .iter()
            .fold(TableSchema::new(name), |schema, (column, data_type)| {
                schema.with_column(*column, *data_type)
            })
    }

    #[test]
    fn test_diff_against_self_is_empty() {
        let s = schema("events", &[("id", DataType::Int64), ("msg", DataType::String)]);
        assert!(!s.diff(&s).exists());
    }

    #[test]
    fn test_diff_returns_absent_columns() {
        let current = schema("events", &[("id", DataType::Int64)]);
        let desired = schema(
            "events",
            &[("id", DataType::Int64), ("msg", DataType::String)],
        );

        let diff = current.diff(&desired);
        assert!(diff.exists());
        assert_eq!(diff.table, "events");
        assert_eq!(diff.columns.len(), 1);
        assert_eq!(diff.columns["msg"].data_type, DataType::String);
    }

    #[test]
    fn test_diff_never_retypes_existing_columns() {
        let current = schema("events", &[("amount", DataType::Int64)]);
        let desired = schema("events", &[("amount", DataType::Float64)]);
        assert!(!current.diff(&desired).exists());
    }

    #[test]
    fn test_diff_ignores_columns_only_in_current() {
        let current = schema(
            "events",
            &[("id", DataType::Int64), ("legacy", DataType::String)],
        );
        let desired = schema("events", &[("id", DataType::Int64)]);
        assert!(!current.diff(&desired).exists());
    }

    #[test]
    fn test_nonexistent_schema() {
        let s = TableSchema::new("missing");
        assert!(!s.exists());
        assert_eq!(s.version, 0);
    }

    #[test]
    fn test_merge_diff_grows_column_set() {
        let mut current = schema("events", &[("id", DataType::Int64)]);
        let desired = schema(
            "events",
            &[("id", DataType::Int64), ("at", DataType::Timestamp)],
        );

        let diff = current.diff(&desired);
        current.merge_diff(&diff);

        assert_eq!(current.columns.len(), 2);
        assert_eq!(current.columns["at"].data_type, DataType::Timestamp);
    }
}
