//! In-memory destination, processor, and queue fakes shared by the
//! integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use tributary_sink::adapter::{
    AdapterError, DestinationAdapter, DestinationTransaction, TableManager,
};
use tributary_sink::events::{EventValue, Record};
use tributary_sink::processing::{ProcessingError, RowGroup, SchemaProcessor};
use tributary_sink::queue::{EventQueue, QueueError};
use tributary_sink::schema::TableSchema;
use tributary_sink::typing::{infer_type, DataType};

type InsertPredicate = dyn Fn(&Record) -> bool + Send + Sync;

#[derive(Default)]
struct DestinationState {
    schemas: HashMap<String, TableSchema>,
    rows: HashMap<String, Vec<Record>>,
    namespaces: Vec<String>,
}

/// An in-memory relational destination.
pub struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
    create_calls: AtomicUsize,
    patch_calls: AtomicUsize,
    fail_insert: Option<Arc<InsertPredicate>>,
    fail_close: AtomicBool,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DestinationState::default())),
            create_calls: AtomicUsize::new(0),
            patch_calls: AtomicUsize::new(0),
            fail_insert: None,
            fail_close: AtomicBool::new(false),
        }
    }

    /// Makes inserts fail for every record matching the predicate.
    pub fn with_insert_failure<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.fail_insert = Some(Arc::new(predicate));
        self
    }

    /// Makes `close` fail.
    pub fn with_close_failure(self) -> Self {
        self.fail_close.store(true, Ordering::SeqCst);
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.state.lock().rows.get(table).cloned().unwrap_or_default()
    }

    pub fn schema_of(&self, table: &str) -> Option<TableSchema> {
        self.state.lock().schemas.get(table).cloned()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().namespaces.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    fn try_insert(&self, table: &str, record: &Record) -> Result<(), AdapterError> {
        if let Some(predicate) = &self.fail_insert {
            if predicate(record) {
                return Err(AdapterError::Insert(format!(
                    "constraint violation in {table}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TableManager for MemoryDestination {
    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, AdapterError> {
        Ok(self
            .state
            .lock()
            .schemas
            .get(table)
            .cloned()
            .unwrap_or_else(|| TableSchema::new(table)))
    }

    async fn create_table(
        &self,
        schema: &TableSchema,
    ) -> Result<(), AdapterError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .schemas
            .insert(schema.name.clone(), schema.clone());
        Ok(())
    }

    async fn patch_table_schema(
        &self,
        diff: &tributary_sink::schema::SchemaDiff,
    ) -> Result<(), AdapterError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let table = state
            .schemas
            .get_mut(&diff.table)
            .ok_or_else(|| AdapterError::Ddl(format!("no such table: {}", diff.table)))?;
        table.merge_diff(diff);
        Ok(())
    }
}

#[async_trait]
impl DestinationAdapter for MemoryDestination {
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), AdapterError> {
        self.state.lock().namespaces.push(namespace.to_string());
        Ok(())
    }

    async fn insert(&self, schema: &TableSchema, record: &Record) -> Result<(), AdapterError> {
        self.try_insert(&schema.name, record)?;
        self.state
            .lock()
            .rows
            .entry(schema.name.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn begin_transaction(
        &self,
    ) -> Result<Box<dyn DestinationTransaction>, AdapterError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            fail_insert: self.fail_insert.clone(),
            staged: Vec::new(),
        }))
    }

    async fn close(&self) -> Result<(), AdapterError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(AdapterError::Connection("connection already gone".into()));
        }
        Ok(())
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<DestinationState>>,
    fail_insert: Option<Arc<InsertPredicate>>,
    staged: Vec<(String, Record)>,
}

#[async_trait]
impl DestinationTransaction for MemoryTransaction {
    async fn insert(
        &mut self,
        schema: &TableSchema,
        record: &Record,
    ) -> Result<(), AdapterError> {
        if let Some(predicate) = &self.fail_insert {
            if predicate(record) {
                return Err(AdapterError::Insert(format!(
                    "constraint violation in {}",
                    schema.name
                )));
            }
        }
        self.staged.push((schema.name.clone(), record.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        for (table, record) in self.staged {
            state.rows.entry(table).or_default().push(record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Newline-delimited JSON processor targeting a single table.
///
/// Derives the desired schema by widening the inferred type of every
/// scalar across the batch; nulls and booleans contribute no column.
pub struct NdjsonProcessor {
    table: String,
    panic_on_event: bool,
}

impl NdjsonProcessor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            panic_on_event: false,
        }
    }

    /// Makes `process_event` panic, to simulate a crashed worker task.
    pub fn with_event_panic(mut self) -> Self {
        self.panic_on_event = true;
        self
    }

    fn record_from_json(value: &serde_json::Value) -> Option<Record> {
        let object = value.as_object()?;
        let mut record = Record::new();
        for (key, value) in object {
            if let Some(scalar) = EventValue::from_json(value) {
                record.insert(key.clone(), scalar);
            }
        }
        Some(record)
    }

    fn desired_schema(&self, rows: &[Record]) -> TableSchema {
        let mut schema = TableSchema::new(self.table.clone());
        for row in rows {
            for (column, value) in row {
                if let Ok(inferred) = infer_type(value) {
                    let widened = schema
                        .columns
                        .get(column)
                        .map_or(inferred, |existing| existing.data_type.widen(inferred));
                    schema = schema.with_column(column.clone(), widened);
                }
            }
        }
        schema
    }

    #[allow(clippy::float_cmp)]
    fn coerce_value(column: DataType, value: &mut EventValue) {
        let replacement = match (column, &*value) {
            (DataType::Float64, EventValue::Int(i)) => Some(EventValue::Float(*i as f64)),
            (DataType::Int64, EventValue::Float(f)) if f.trunc() == *f => {
                Some(EventValue::Int(*f as i64))
            }
            (DataType::String, EventValue::Int(i)) => Some(EventValue::String(i.to_string())),
            (DataType::String, EventValue::Float(f)) => Some(EventValue::String(f.to_string())),
            _ => None,
        };
        if let Some(replacement) = replacement {
            *value = replacement;
        }
    }
}

impl SchemaProcessor for NdjsonProcessor {
    fn flatten(
        &self,
        _identifier: &str,
        payload: &[u8],
        break_on_error: bool,
    ) -> Result<Vec<RowGroup>, ProcessingError> {
        let mut rows = Vec::new();
        for line in payload.split(|byte| *byte == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<serde_json::Value>(line) {
                Ok(value) => match Self::record_from_json(&value) {
                    Some(record) => rows.push(record),
                    None if break_on_error => {
                        return Err(ProcessingError::Flatten("not a JSON object".into()));
                    }
                    None => {}
                },
                Err(err) if break_on_error => {
                    return Err(ProcessingError::Parse(err.to_string()));
                }
                Err(_) => {}
            }
        }

        let schema = self.desired_schema(&rows);
        let mut group = RowGroup::new(schema);
        group.rows = rows;
        Ok(vec![group])
    }

    fn coerce_group(
        &self,
        schema: &TableSchema,
        group: &mut RowGroup,
    ) -> Result<(), ProcessingError> {
        for record in &mut group.rows {
            self.coerce_record(schema, record)?;
        }
        Ok(())
    }

    fn coerce_record(
        &self,
        schema: &TableSchema,
        record: &mut Record,
    ) -> Result<(), ProcessingError> {
        for (column, value) in record.iter_mut() {
            if let Some(definition) = schema.columns.get(column) {
                Self::coerce_value(definition.data_type, value);
            }
        }
        Ok(())
    }

    fn process_event(
        &self,
        event: &serde_json::Value,
    ) -> Result<(TableSchema, Record), ProcessingError> {
        assert!(!self.panic_on_event, "injected processor crash");

        let record = Self::record_from_json(event)
            .ok_or_else(|| ProcessingError::Flatten("not a JSON object".into()))?;
        let schema = self.desired_schema(std::slice::from_ref(&record));
        Ok((schema, record))
    }
}

/// Queue fake backed by an unbounded channel; closes when every sender
/// is dropped.
pub struct ChannelQueue {
    receiver: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<serde_json::Value>>,
}

impl ChannelQueue {
    pub fn new() -> (tokio::sync::mpsc::UnboundedSender<serde_json::Value>, Self) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (
            sender,
            Self {
                receiver: tokio::sync::Mutex::new(receiver),
            },
        )
    }
}

#[async_trait]
impl EventQueue for ChannelQueue {
    async fn dequeue(&self) -> Result<Option<serde_json::Value>, QueueError> {
        Ok(self.receiver.lock().await.recv().await)
    }
}
