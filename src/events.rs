//! Pipeline event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel. Components emit
//! [`PipelineEvent`]s as they work; the orchestrator and tests subscribe to
//! observe progress and completion. `QueueDrained` and `Complete` are
//! emitted exactly once per drain cycle.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Something that happened in the ingestion pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A removable volume matching the allow-list was mounted and is now
    /// being watched.
    DeviceAttached { mount_path: PathBuf, label: String },

    /// A removable volume was safely unmounted after its files were
    /// processed.
    DeviceEjected { mount_path: PathBuf, label: String },

    /// A file was skipped because its metadata could not be resolved.
    FileSkipped { path: PathBuf, reason: String },

    /// One queued transfer finished successfully.
    TransferDone {
        source: PathBuf,
        destination: PathBuf,
    },

    /// One queued transfer failed; the rest of the queue continues.
    TransferFailed { source: PathBuf, error: String },

    /// The transfer queue emptied and stayed empty through the grace
    /// period. Emitted once per drain cycle.
    QueueDrained { transferred: u64, failed: u64 },

    /// A drain cycle finished end to end, including media ejection.
    Complete { transferred: u64, failed: u64 },
}

/// Broadcast channel for [`PipelineEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers. Events with no subscribers
    /// are dropped silently.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
