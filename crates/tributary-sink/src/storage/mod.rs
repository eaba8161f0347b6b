//! Destination storage writers.
//!
//! [`Storage`] is the capability set every destination backend
//! implements: batch store, streaming insert, lifecycle, and identity.
//! Each destination engine provides its own implementation rather than
//! sharing a base; [`postgres`] holds the Postgres-shaped variant.

use async_trait::async_trait;
use thiserror::Error;

use crate::adapter::AdapterError;
use crate::events::Record;
use crate::processing::ProcessingError;
use crate::schema::TableSchema;
use crate::sync::SyncError;

pub mod postgres;
mod streaming;

/// Errors produced by the write path.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Schema synchronization failed; the write that needed it is
    /// aborted.
    #[error("schema synchronization failed: {0}")]
    Sync(#[from] SyncError),

    /// Payload flattening or value coercion failed.
    #[error("payload processing failed: {0}")]
    Processing(#[from] ProcessingError),

    /// The destination adapter failed.
    #[error("destination error: {0}")]
    Adapter(#[from] AdapterError),

    /// The storage was constructed with an unusable configuration.
    #[error("invalid storage configuration: {0}")]
    Configuration(String),
}

/// A failed batch store, carrying how many rows the batch held.
///
/// The count is best-effort: when the payload could not even be
/// flattened it falls back to counting raw input lines, so the caller
/// still knows roughly how much input was rejected.
#[derive(Debug, Error)]
#[error("storing batch of {attempted} rows failed: {source}")]
pub struct StoreError {
    /// Rows the batch attempted to write (or raw lines, on flattening
    /// failure).
    pub attempted: usize,
    /// What went wrong.
    #[source]
    pub source: StorageError,
}

/// Outcome of a successful batch store.
///
/// `attempted` counts every row the payload produced; `inserted` counts
/// the rows that made it into the committed transaction. They differ
/// only when skip-on-error is active and rows were dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReport {
    /// Rows the payload produced.
    pub attempted: usize,
    /// Rows committed to the destination.
    pub inserted: usize,
}

/// A failed storage shutdown.
///
/// Closing always attempts both the destination connection and the
/// streaming worker; when both fail, both failures are reported.
#[derive(Debug, Error)]
pub enum CloseError {
    /// Closing the destination connection failed.
    #[error("closing destination connection failed: {0}")]
    Connection(AdapterError),

    /// Stopping the streaming worker failed.
    #[error("stopping streaming worker failed: {0}")]
    Worker(String),

    /// Both the connection close and the worker stop failed.
    #[error(
        "closing destination connection failed: {connection}; \
         stopping streaming worker failed: {worker}"
    )]
    Both {
        /// The connection close failure.
        connection: AdapterError,
        /// The worker stop failure.
        worker: String,
    },
}

/// The destination backend contract.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores a whole payload: flatten, synchronize schemas, coerce,
    /// then insert every row in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] carrying the attempted row count. With
    /// break-on-error unset, individual row failures are logged and
    /// skipped rather than failing the batch.
    async fn store(&self, identifier: &str, payload: &[u8])
        -> Result<StoreReport, StoreError>;

    /// Inserts a single record (the streaming path). Any failure aborts
    /// the insert.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when schema synchronization, coercion,
    /// or the insert itself fails.
    async fn insert(&self, schema: &TableSchema, record: Record) -> Result<(), StorageError>;

    /// Shuts the storage down: closes the destination connection and
    /// stops the streaming worker, attempting both even if one fails.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError`] naming every part that failed to shut
    /// down.
    async fn close(&mut self) -> Result<(), CloseError>;

    /// The configured storage name (destination identifier).
    fn name(&self) -> &str;

    /// The destination engine label, shared by all instances of one
    /// backend.
    fn storage_type(&self) -> &'static str;
}

/// Best-effort row count for a payload that failed to flatten.
pub(crate) fn line_count(payload: &[u8]) -> usize {
    payload
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.is_empty())
        .count()
}
