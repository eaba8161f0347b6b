//! Distributed coordination port: per-table locks and version counters.
//!
//! Schema mutations to one table are serialized across processes by a
//! mutual-exclusion lock keyed by (destination, table), and totally
//! ordered by a per-table version counter. [`CoordinationService`] is
//! the consuming contract; production deployments back it with a real
//! coordination service (which is also expected to expire stale locks
//! via leases), while [`InMemoryCoordinator`] covers single-process
//! deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors produced by the coordination port.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Acquiring a table lock failed.
    #[error("lock acquisition failed: {0}")]
    Lock(String),

    /// Releasing a table lock failed.
    #[error("lock release failed: {0}")]
    Unlock(String),

    /// Reading a version counter failed.
    #[error("version read failed: {0}")]
    Version(String),

    /// Incrementing a version counter failed.
    #[error("version increment failed: {0}")]
    Increment(String),
}

/// An opaque handle to a held (destination, table) lock.
///
/// The handle owns everything needed to release the lock and must be
/// passed back to [`CoordinationService::unlock`] on every exit path.
#[derive(Debug)]
pub struct LockHandle {
    destination: String,
    table: String,
    token: u64,
}

impl LockHandle {
    /// Creates a handle. Called by [`CoordinationService`]
    /// implementations, not by lock consumers.
    #[must_use]
    pub fn new(destination: impl Into<String>, table: impl Into<String>, token: u64) -> Self {
        Self {
            destination: destination.into(),
            table: table.into(),
            token,
        }
    }

    /// The destination the lock is scoped to.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The table the lock is scoped to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Implementation-specific identity of this acquisition.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Mutual-exclusion locks and version counters per (destination, table).
///
/// Contract: locks are exclusive across processes sharing a destination;
/// version counters start at an implementation-defined baseline and
/// increase strictly monotonically, by exactly 1 per successful
/// [`increment_version`](CoordinationService::increment_version) call.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Acquires the lock for (destination, table), blocking until granted.
    async fn lock(&self, destination: &str, table: &str)
        -> Result<LockHandle, CoordinationError>;

    /// Releases a previously acquired lock.
    async fn unlock(&self, handle: &LockHandle) -> Result<(), CoordinationError>;

    /// Reads the table's current version counter.
    async fn get_version(&self, destination: &str, table: &str)
        -> Result<i64, CoordinationError>;

    /// Atomically increments the table's version counter and returns
    /// the new value.
    async fn increment_version(
        &self,
        destination: &str,
        table: &str,
    ) -> Result<i64, CoordinationError>;
}

struct TableState {
    gate: Arc<Semaphore>,
    holder: Option<u64>,
    version: i64,
}

impl TableState {
    fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            holder: None,
            version: 0,
        }
    }
}

/// Process-local [`CoordinationService`].
///
/// Versions start at 0 for an unseen table; the first increment returns
/// 1. Not a distributed lock — all writers must live in one process for
/// its exclusion guarantee to mean anything.
#[derive(Default)]
pub struct InMemoryCoordinator {
    tables: Mutex<HashMap<(String, String), TableState>>,
    next_token: AtomicU64,
}

impl InMemoryCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, destination: &str, table: &str) -> Arc<Semaphore> {
        let mut tables = self.tables.lock();
        let state = tables
            .entry((destination.to_string(), table.to_string()))
            .or_insert_with(TableState::new);
        Arc::clone(&state.gate)
    }
}

#[async_trait]
impl CoordinationService for InMemoryCoordinator {
    async fn lock(
        &self,
        destination: &str,
        table: &str,
    ) -> Result<LockHandle, CoordinationError> {
        // Clone the gate out so the map lock is not held across the await.
        let gate = self.gate(destination, table);
        let permit = gate
            .acquire_owned()
            .await
            .map_err(|err| CoordinationError::Lock(err.to_string()))?;
        // The permit is restored by unlock, not by drop.
        permit.forget();

        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let mut tables = self.tables.lock();
        if let Some(state) = tables.get_mut(&(destination.to_string(), table.to_string())) {
            state.holder = Some(token);
        }
        Ok(LockHandle::new(destination, table, token))
    }

    async fn unlock(&self, handle: &LockHandle) -> Result<(), CoordinationError> {
        let mut tables = self.tables.lock();
        let key = (
            handle.destination().to_string(),
            handle.table().to_string(),
        );
        let state = tables.get_mut(&key).ok_or_else(|| {
            CoordinationError::Unlock(format!(
                "no lock state for {}.{}",
                handle.destination(),
                handle.table()
            ))
        })?;

        if state.holder != Some(handle.token()) {
            return Err(CoordinationError::Unlock(format!(
                "stale lock handle for {}.{}",
                handle.destination(),
                handle.table()
            )));
        }

        state.holder = None;
        state.gate.add_permits(1);
        Ok(())
    }

    async fn get_version(
        &self,
        destination: &str,
        table: &str,
    ) -> Result<i64, CoordinationError> {
        let tables = self.tables.lock();
        Ok(tables
            .get(&(destination.to_string(), table.to_string()))
            .map_or(0, |state| state.version))
    }

    async fn increment_version(
        &self,
        destination: &str,
        table: &str,
    ) -> Result<i64, CoordinationError> {
        let mut tables = self.tables.lock();
        let state = tables
            .entry((destination.to_string(), table.to_string()))
            .or_insert_with(TableState::new);
        state.version += 1;
        Ok(state.version)
    }
}
