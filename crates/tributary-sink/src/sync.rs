//! The schema synchronizer: per-process schema cache plus the
//! create-or-evolve protocol.
//!
//! [`TableSync`] keeps the last-known [`TableSchema`] per table and
//! reconciles each write's desired schema with the destination's actual
//! one. The common case of a repeated write with a stable column set
//! touches only the in-process cache. Only when a table is unseen or a
//! diff exists does the synchronizer take the distributed lock, and
//! even then it re-reads the authoritative version counter first: a
//! concurrent writer (possibly in another process) may already have
//! widened the table, in which case the real schema is re-fetched and
//! the diff recomputed instead of blindly reapplied.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::adapter::{AdapterError, TableManager};
use crate::coordination::{CoordinationError, CoordinationService, LockHandle};
use crate::schema::{SchemaDiff, TableSchema};

/// Release attempts before a lock is abandoned to lease expiry.
const UNLOCK_RETRY_COUNT: u32 = 5;

/// Errors produced by schema synchronization.
///
/// Every variant carries the destination and table so callers can log
/// without reconstructing context.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Acquiring the table lock failed.
    #[error("locking table {table} for destination {destination} failed: {source}")]
    Lock {
        /// Destination being written to.
        destination: String,
        /// Table whose lock could not be acquired.
        table: String,
        /// Underlying coordination failure.
        #[source]
        source: CoordinationError,
    },

    /// Reading the authoritative version counter failed.
    #[error("reading version of table {table} for destination {destination} failed: {source}")]
    Version {
        /// Destination being written to.
        destination: String,
        /// Table whose version could not be read.
        table: String,
        /// Underlying coordination failure.
        #[source]
        source: CoordinationError,
    },

    /// Incrementing the version counter after a mutation failed.
    #[error(
        "incrementing version of table {table} for destination {destination} failed: {source}"
    )]
    Increment {
        /// Destination being written to.
        destination: String,
        /// Table whose version could not be incremented.
        table: String,
        /// Underlying coordination failure.
        #[source]
        source: CoordinationError,
    },

    /// Fetching the real schema from the destination failed.
    #[error("fetching schema of table {table} for destination {destination} failed: {source}")]
    Fetch {
        /// Destination being written to.
        destination: String,
        /// Table whose schema could not be fetched.
        table: String,
        /// Underlying adapter failure.
        #[source]
        source: AdapterError,
    },

    /// Creating the table failed.
    #[error("creating table {table} for destination {destination} failed: {source}")]
    Create {
        /// Destination being written to.
        destination: String,
        /// Table that could not be created.
        table: String,
        /// Underlying adapter failure.
        #[source]
        source: AdapterError,
    },

    /// Applying a column patch failed.
    #[error("patching table {table} for destination {destination} failed: {source}")]
    Patch {
        /// Destination being written to.
        destination: String,
        /// Table that could not be patched.
        table: String,
        /// Underlying adapter failure.
        #[source]
        source: AdapterError,
    },
}

/// Keeps table schema state in memory and grows destination tables to
/// match incoming data.
///
/// The cache is an approximation: any outside change to a table must be
/// accompanied by a version increment at the coordination service, and
/// a detected mismatch replaces the cache entry wholesale with the
/// destination's real schema.
pub struct TableSync {
    manager: Arc<dyn TableManager>,
    coordinator: Arc<dyn CoordinationService>,
    tables: RwLock<HashMap<String, TableSchema>>,
    storage_type: &'static str,
}

impl TableSync {
    /// Creates a synchronizer for one destination's table manager.
    #[must_use]
    pub fn new(
        manager: Arc<dyn TableManager>,
        coordinator: Arc<dyn CoordinationService>,
        storage_type: &'static str,
    ) -> Self {
        Self {
            manager,
            coordinator,
            tables: RwLock::new(HashMap::new()),
            storage_type,
        }
    }

    /// Returns a destination-accurate schema covering at least
    /// `desired`'s columns, creating or patching the table as needed.
    ///
    /// Repeated calls with a stable column set take the lock-free cache
    /// path; at most one mutation is performed per actual schema gap.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when a coordination or DDL step fails. A
    /// failed lock *release* is not an error here: it is retried, then
    /// logged, and the already-computed result is still returned.
    pub async fn ensure_table(
        &self,
        destination: &str,
        desired: &TableSchema,
    ) -> Result<TableSchema, SyncError> {
        let cached = self.tables.read().get(&desired.name).cloned();
        let db_schema = match cached {
            Some(schema) => schema,
            None => {
                let schema = self.get_or_create(destination, desired).await?;
                self.store_cached(schema.clone());
                schema
            }
        };

        let diff = db_schema.diff(desired);
        if !diff.exists() {
            return Ok(db_schema);
        }

        let handle = self
            .coordinator
            .lock(destination, &desired.name)
            .await
            .map_err(|source| SyncError::Lock {
                destination: destination.to_string(),
                table: desired.name.clone(),
                source,
            })?;

        let result = self
            .patch_under_lock(destination, desired, db_schema, diff)
            .await;
        self.unlock_with_retry(&handle).await;

        let schema = result?;
        self.store_cached(schema.clone());
        Ok(schema)
    }

    /// First reference to a table in this process: look it up at the
    /// destination under lock, creating it if absent.
    async fn get_or_create(
        &self,
        destination: &str,
        desired: &TableSchema,
    ) -> Result<TableSchema, SyncError> {
        let handle = self
            .coordinator
            .lock(destination, &desired.name)
            .await
            .map_err(|source| SyncError::Lock {
                destination: destination.to_string(),
                table: desired.name.clone(),
                source,
            })?;

        let result = self.fetch_or_create_under_lock(destination, desired).await;
        self.unlock_with_retry(&handle).await;
        result
    }

    async fn fetch_or_create_under_lock(
        &self,
        destination: &str,
        desired: &TableSchema,
    ) -> Result<TableSchema, SyncError> {
        let mut db_schema = self
            .manager
            .get_table_schema(&desired.name)
            .await
            .map_err(|source| SyncError::Fetch {
                destination: destination.to_string(),
                table: desired.name.clone(),
                source,
            })?;

        if db_schema.exists() {
            db_schema.version = self
                .coordinator
                .get_version(destination, &desired.name)
                .await
                .map_err(|source| SyncError::Version {
                    destination: destination.to_string(),
                    table: desired.name.clone(),
                    source,
                })?;
        } else {
            self.manager
                .create_table(desired)
                .await
                .map_err(|source| SyncError::Create {
                    destination: destination.to_string(),
                    table: desired.name.clone(),
                    source,
                })?;

            let version = self
                .coordinator
                .increment_version(destination, &desired.name)
                .await
                .map_err(|source| SyncError::Increment {
                    destination: destination.to_string(),
                    table: desired.name.clone(),
                    source,
                })?;

            db_schema = desired.clone();
            db_schema.version = version;
            info!(
                storage_type = self.storage_type,
                destination,
                table = %db_schema.name,
                version,
                "created destination table"
            );
        }

        Ok(db_schema)
    }

    /// The mutation path, entered with the distributed lock held.
    ///
    /// Re-reads the authoritative version first: a mismatch means a
    /// concurrent writer already mutated the table, so the real schema
    /// is fetched and the diff recomputed before anything is applied.
    async fn patch_under_lock(
        &self,
        destination: &str,
        desired: &TableSchema,
        mut db_schema: TableSchema,
        mut diff: SchemaDiff,
    ) -> Result<TableSchema, SyncError> {
        let version = self
            .coordinator
            .get_version(destination, &desired.name)
            .await
            .map_err(|source| SyncError::Version {
                destination: destination.to_string(),
                table: desired.name.clone(),
                source,
            })?;

        if version != db_schema.version {
            debug!(
                storage_type = self.storage_type,
                destination,
                table = %desired.name,
                cached = db_schema.version,
                actual = version,
                "version mismatch, re-fetching destination schema"
            );

            db_schema = self
                .manager
                .get_table_schema(&desired.name)
                .await
                .map_err(|source| SyncError::Fetch {
                    destination: destination.to_string(),
                    table: desired.name.clone(),
                    source,
                })?;
            db_schema.version = version;

            diff = db_schema.diff(desired);
            if !diff.exists() {
                return Ok(db_schema);
            }
        }

        self.manager
            .patch_table_schema(&diff)
            .await
            .map_err(|source| SyncError::Patch {
                destination: destination.to_string(),
                table: desired.name.clone(),
                source,
            })?;

        let new_version = self
            .coordinator
            .increment_version(destination, &desired.name)
            .await
            .map_err(|source| SyncError::Increment {
                destination: destination.to_string(),
                table: desired.name.clone(),
                source,
            })?;

        db_schema.merge_diff(&diff);
        db_schema.version = new_version;
        info!(
            storage_type = self.storage_type,
            destination,
            table = %db_schema.name,
            version = new_version,
            columns = diff.columns.len(),
            "patched destination table schema"
        );

        Ok(db_schema)
    }

    /// Caches a schema unless a concurrent caller already stored a
    /// newer one.
    fn store_cached(&self, schema: TableSchema) {
        let mut tables = self.tables.write();
        match tables.get(&schema.name) {
            Some(existing) if existing.version > schema.version => {}
            _ => {
                tables.insert(schema.name.clone(), schema);
            }
        }
    }

    /// Best-effort lock release with bounded retry.
    ///
    /// A leaked lock is alarming but recoverable, since the
    /// coordination service expires stale locks. Exhausting the retries
    /// logs a system error instead of failing the caller.
    async fn unlock_with_retry(&self, handle: &LockHandle) {
        for attempt in 1..=UNLOCK_RETRY_COUNT {
            match self.coordinator.unlock(handle).await {
                Ok(()) => return,
                Err(err) if attempt == UNLOCK_RETRY_COUNT => {
                    error!(
                        storage_type = self.storage_type,
                        destination = handle.destination(),
                        table = handle.table(),
                        attempts = attempt,
                        %err,
                        "failed to release table lock, relying on lease expiry"
                    );
                }
                Err(err) => {
                    debug!(
                        table = handle.table(),
                        attempt,
                        %err,
                        "retrying table lock release"
                    );
                }
            }
        }
    }
}
