//! # Tributary Sink
//!
//! Storage writers that persist semi-structured event records into
//! relational destinations whose table schemas are discovered and grown
//! at write time.
//!
//! The crate owns the concurrency-critical middle of an ingestion
//! pipeline: a per-process table-schema cache with an optimistic-locking
//! synchronization protocol ([`sync::TableSync`]), the coordination
//! abstractions it relies on ([`coordination`]), the transactional batch
//! and streaming write paths ([`storage`]), and the logical type lattice
//! that drives schema decisions ([`typing`]).
//!
//! Payload flattening, value coercion, destination DDL, and durable
//! queueing are consumed through ports ([`processing`], [`adapter`],
//! [`queue`]) and implemented by collaborators.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Destination DDL and row I/O ports implemented per destination engine.
pub mod adapter;

/// Distributed lock and version-counter port, plus a process-local
/// implementation.
pub mod coordination;

/// The decoded event value model shared by the write path and the
/// processing ports.
pub mod events;

/// Payload flattening and value coercion port.
pub mod processing;

/// Durable event queue port consumed by the streaming worker.
pub mod queue;

/// Table schemas, columns, and pure schema diffing.
pub mod schema;

/// Storage writers: the polymorphic destination contract and its
/// Postgres-shaped implementation.
pub mod storage;

/// The schema synchronizer: cache plus create-or-evolve protocol.
pub mod sync;

/// Logical data types, widening, and value type inference.
pub mod typing;
