//! Durable event queue port for streaming mode.
//!
//! The queue owns durability and consumption order; the streaming
//! worker only pulls from it.

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by the queue port.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading the next record failed.
    #[error("queue read failed: {0}")]
    Read(String),
}

/// A durable queue of decoded events awaiting streaming insertion.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Pulls the next event, waiting until one is available.
    ///
    /// Returns `Ok(None)` once the queue is closed and drained, which
    /// ends the consuming worker.
    async fn dequeue(&self) -> Result<Option<serde_json::Value>, QueueError>;
}
