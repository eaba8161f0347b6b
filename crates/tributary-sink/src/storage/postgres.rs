//! Postgres-shaped storage writer.
//!
//! [`PostgresStorage`] persists flattened events to a `PostgreSQL`
//! destination in two modes:
//!
//! - **batch**: one payload = one transaction ([`Storage::store`])
//! - **stream**: one record = one insert, driven by a background worker
//!   consuming the durable queue port
//!
//! The engine-specific adapter (SQL text, pooling) is injected; this
//! type owns the orchestration: schema synchronization, coercion, the
//! transaction, and the partial-failure policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::adapter::{DestinationAdapter, TableManager};
use crate::coordination::CoordinationService;
use crate::events::Record;
use crate::processing::{RowGroup, SchemaProcessor};
use crate::queue::EventQueue;
use crate::schema::TableSchema;
use crate::sync::TableSync;

use super::streaming::StreamingWorker;
use super::{line_count, CloseError, Storage, StorageError, StoreError, StoreReport};

/// Storage-type label shared by every Postgres destination.
pub const POSTGRES_TYPE: &str = "postgres";

/// Configuration for one Postgres destination.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresStorageConfig {
    /// Destination name, used for coordination keys and logging.
    pub name: String,

    /// Database schema (namespace) the destination tables live in.
    pub namespace: String,

    /// When `true`, a single failed row aborts and rolls back the whole
    /// batch; when `false`, failed rows are logged and skipped.
    #[serde(default)]
    pub break_on_error: bool,

    /// When `true`, a background worker consumes the event queue and
    /// inserts record-by-record.
    #[serde(default)]
    pub stream_mode: bool,
}

/// The write path shared by batch calls and the streaming worker.
pub(crate) struct StorageCore<A> {
    name: String,
    adapter: Arc<A>,
    sync: TableSync,
    processor: Arc<dyn SchemaProcessor>,
    break_on_error: bool,
}

impl<A: DestinationAdapter> StorageCore<A> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, identifier: &str, payload: &[u8]) -> Result<StoreReport, StoreError> {
        let mut groups = self
            .processor
            .flatten(identifier, payload, self.break_on_error)
            .map_err(|err| StoreError {
                attempted: line_count(payload),
                source: err.into(),
            })?;

        let attempted: usize = groups.iter().map(RowGroup::len).sum();

        // Schema problems are not partially tolerated: every group must
        // synchronize and coerce before any row is written.
        for group in &mut groups {
            let db_schema = self
                .sync
                .ensure_table(&self.name, &group.schema)
                .await
                .map_err(|err| StoreError {
                    attempted,
                    source: err.into(),
                })?;

            self.processor
                .coerce_group(&db_schema, group)
                .map_err(|err| StoreError {
                    attempted,
                    source: err.into(),
                })?;

            group.schema = db_schema;
        }

        let mut tx = self
            .adapter
            .begin_transaction()
            .await
            .map_err(|err| StoreError {
                attempted,
                source: err.into(),
            })?;

        let mut skipped = 0usize;
        for group in &groups {
            for record in &group.rows {
                if let Err(err) = tx.insert(&group.schema, record).await {
                    if self.break_on_error {
                        if let Err(rollback_err) = tx.rollback().await {
                            warn!(
                                storage = %self.name,
                                %rollback_err,
                                "rolling back batch transaction failed"
                            );
                        }
                        return Err(StoreError {
                            attempted,
                            source: err.into(),
                        });
                    }

                    warn!(
                        storage = %self.name,
                        table = %group.schema.name,
                        %err,
                        row = ?record,
                        "unable to insert row, skipping it"
                    );
                    skipped += 1;
                }
            }
        }

        tx.commit().await.map_err(|err| StoreError {
            attempted,
            source: err.into(),
        })?;

        Ok(StoreReport {
            attempted,
            inserted: attempted - skipped,
        })
    }

    async fn insert(&self, schema: &TableSchema, mut record: Record) -> Result<(), StorageError> {
        let db_schema = self.sync.ensure_table(&self.name, schema).await?;
        self.processor.coerce_record(&db_schema, &mut record)?;
        self.adapter.insert(&db_schema, &record).await?;
        Ok(())
    }

    /// One streaming record: flatten, then the single-insert path.
    pub(crate) async fn handle_event(&self, event: &serde_json::Value) -> Result<(), StorageError> {
        let (schema, record) = self.processor.process_event(event)?;
        self.insert(&schema, record).await
    }
}

/// Postgres destination storage.
pub struct PostgresStorage<A: DestinationAdapter + 'static> {
    core: Arc<StorageCore<A>>,
    worker: Option<StreamingWorker>,
}

impl<A: DestinationAdapter + 'static> PostgresStorage<A> {
    /// Creates a Postgres storage: validates the destination by
    /// ensuring its namespace exists, then, in stream mode, starts the
    /// background worker over `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Adapter`] when the namespace cannot be
    /// ensured (the adapter is closed before returning), and
    /// [`StorageError::Configuration`] when stream mode is requested
    /// without a queue.
    pub async fn new(
        config: PostgresStorageConfig,
        adapter: Arc<A>,
        processor: Arc<dyn SchemaProcessor>,
        coordinator: Arc<dyn CoordinationService>,
        queue: Option<Arc<dyn EventQueue>>,
    ) -> Result<Self, StorageError> {
        if config.stream_mode && queue.is_none() {
            return Err(StorageError::Configuration(format!(
                "storage {} has stream mode enabled but no event queue",
                config.name
            )));
        }

        if let Err(err) = adapter.ensure_namespace(&config.namespace).await {
            if let Err(close_err) = adapter.close().await {
                warn!(
                    storage = %config.name,
                    %close_err,
                    "closing adapter after failed namespace setup"
                );
            }
            return Err(StorageError::Adapter(err));
        }

        let sync = TableSync::new(
            Arc::clone(&adapter) as Arc<dyn TableManager>,
            coordinator,
            POSTGRES_TYPE,
        );

        let core = Arc::new(StorageCore {
            name: config.name,
            adapter,
            sync,
            processor,
            break_on_error: config.break_on_error,
        });

        let worker = if config.stream_mode {
            // Checked above.
            queue.map(|queue| StreamingWorker::start(queue, Arc::clone(&core)))
        } else {
            None
        };

        Ok(Self { core, worker })
    }
}

#[async_trait]
impl<A: DestinationAdapter + 'static> Storage for PostgresStorage<A> {
    async fn store(&self, identifier: &str, payload: &[u8]) -> Result<StoreReport, StoreError> {
        self.core.store(identifier, payload).await
    }

    async fn insert(&self, schema: &TableSchema, record: Record) -> Result<(), StorageError> {
        self.core.insert(schema, record).await
    }

    async fn close(&mut self) -> Result<(), CloseError> {
        let connection_err = self.core.adapter.close().await.err();

        let worker_err = match self.worker.take() {
            Some(worker) => worker.stop().await.err(),
            None => None,
        };

        match (connection_err, worker_err) {
            (None, None) => Ok(()),
            (Some(connection), None) => Err(CloseError::Connection(connection)),
            (None, Some(worker)) => Err(CloseError::Worker(worker)),
            (Some(connection), Some(worker)) => Err(CloseError::Both { connection, worker }),
        }
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn storage_type(&self) -> &'static str {
        POSTGRES_TYPE
    }
}
