//! Destination adapter ports.
//!
//! Everything engine-specific (SQL/DDL text, connection pooling, wire
//! handling) lives behind these traits and is implemented per
//! destination engine. The write path consumes:
//!
//! - [`TableManager`] — schema introspection and DDL
//! - [`DestinationAdapter`] — row I/O, transactions, and lifecycle
//! - [`DestinationTransaction`] — one open transaction

use async_trait::async_trait;
use thiserror::Error;

use crate::events::Record;
use crate::schema::{SchemaDiff, TableSchema};

/// Errors produced by destination adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connecting to or disconnecting from the destination failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A DDL statement (create, patch, or schema fetch) failed.
    #[error("ddl error: {0}")]
    Ddl(String),

    /// Inserting a row failed.
    #[error("insert error: {0}")]
    Insert(String),

    /// Opening, committing, or rolling back a transaction failed.
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// Destination-side schema introspection and DDL.
#[async_trait]
pub trait TableManager: Send + Sync {
    /// Fetches the current schema of `table`.
    ///
    /// A nonexistent table is not an error: the returned schema has an
    /// empty column set and [`TableSchema::exists`] is `false`.
    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, AdapterError>;

    /// Creates a table with the given schema.
    async fn create_table(&self, schema: &TableSchema) -> Result<(), AdapterError>;

    /// Applies an additive column patch to an existing table.
    async fn patch_table_schema(&self, diff: &SchemaDiff) -> Result<(), AdapterError>;
}

/// One open destination transaction.
///
/// Dropping a transaction without committing must leave the destination
/// unchanged; `commit` and `rollback` consume it.
#[async_trait]
pub trait DestinationTransaction: Send {
    /// Inserts one row within the transaction.
    async fn insert(&mut self, schema: &TableSchema, record: &Record)
        -> Result<(), AdapterError>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<(), AdapterError>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> Result<(), AdapterError>;
}

/// Full destination surface consumed by a storage writer.
#[async_trait]
pub trait DestinationAdapter: TableManager {
    /// Ensures the destination namespace (database schema) exists,
    /// validating connectivity in the process.
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), AdapterError>;

    /// Inserts one row outside any explicit transaction.
    async fn insert(&self, schema: &TableSchema, record: &Record) -> Result<(), AdapterError>;

    /// Opens a transaction for a batch of inserts.
    async fn begin_transaction(&self)
        -> Result<Box<dyn DestinationTransaction>, AdapterError>;

    /// Closes the underlying connection.
    async fn close(&self) -> Result<(), AdapterError>;
}
