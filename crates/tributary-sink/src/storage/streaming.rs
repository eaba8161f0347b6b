//! Background streaming worker.
//!
//! Consumes the durable queue port and applies one insert per record.
//! A poison record must not stall the stream: per-record failures are
//! logged and consumption continues. The worker exits when the queue
//! closes or the owning storage shuts it down.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::DestinationAdapter;
use crate::queue::EventQueue;

use super::postgres::StorageCore;

/// Handle to a running streaming worker task.
pub(crate) struct StreamingWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl StreamingWorker {
    /// Spawns the consuming task.
    pub(crate) fn start<A: DestinationAdapter + 'static>(
        queue: Arc<dyn EventQueue>,
        core: Arc<StorageCore<A>>,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        debug!(storage = %core.name(), "streaming worker shutting down");
                        break;
                    }
                    dequeued = queue.dequeue() => match dequeued {
                        Ok(Some(event)) => {
                            if let Err(err) = core.handle_event(&event).await {
                                warn!(
                                    storage = %core.name(),
                                    %err,
                                    "streaming insert failed, record dropped"
                                );
                            }
                        }
                        Ok(None) => {
                            debug!(
                                storage = %core.name(),
                                "event queue closed, streaming worker exiting"
                            );
                            break;
                        }
                        Err(err) => {
                            warn!(storage = %core.name(), %err, "event queue read failed");
                        }
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Signals shutdown and waits for the task to finish.
    pub(crate) async fn stop(self) -> Result<(), String> {
        // The task may already have exited (queue closed); that is fine.
        let _ = self.shutdown.send(true);
        self.handle.await.map_err(|err| err.to_string())
    }
}
