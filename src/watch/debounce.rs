//! Timer-reset batch debouncer.
//!
//! A single delayed task whose deadline is pushed back on every arrival, so
//! one multi-file copy lands in one batch instead of several. Arrivals and
//! flush requests come in over one channel, which makes the
//! cancel-and-reschedule race-free: the task is the only owner of the
//! pending buffer and the deadline.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::WatchBatch;

/// Input to the debounce task.
#[derive(Debug)]
pub(crate) enum WatchSignal {
    /// A path was observed (new file event or initial-scan entry).
    Added(PathBuf),
    /// A path was deleted from a watched tree.
    Removed(PathBuf),
    /// Emit the current buffer immediately, even when empty. Sent once per
    /// `watch()` call that added a new root.
    Flush,
}

/// Run the debounce loop until the channel closes or `cancel` fires.
///
/// `filter` decides whether an observed path belongs in a batch; paths that
/// pass are emitted at most once while they remain present (the seen-set),
/// and every passing arrival resets the quiet-period deadline. A removal
/// observation forgets the path, so a new file created at the same path
/// later is emitted again.
pub(crate) async fn run<F>(
    mut rx: mpsc::UnboundedReceiver<WatchSignal>,
    batch_tx: mpsc::Sender<WatchBatch>,
    window: Duration,
    cancel: CancellationToken,
    filter: F,
) where
    F: Fn(&Path) -> bool + Send,
{
    let mut pending: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            signal = rx.recv() => match signal {
                None => break,
                Some(WatchSignal::Added(path)) => {
                    if filter(&path) {
                        if seen.insert(path.clone()) {
                            pending.push(path);
                        }
                        // Re-observation of a known path still resets the
                        // window: the file is likely mid-write.
                        deadline = Some(Instant::now() + window);
                    } else if seen.remove(&path) {
                        // A known path that stopped passing the filter was
                        // renamed out of the tree (rename-out surfaces as a
                        // modify on the old path); forget it.
                        pending.retain(|p| p != &path);
                    }
                }
                Some(WatchSignal::Removed(path)) => {
                    if seen.remove(&path) {
                        pending.retain(|p| p != &path);
                    }
                }
                Some(WatchSignal::Flush) => {
                    deadline = None;
                    let batch = std::mem::take(&mut pending);
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if !pending.is_empty() {
                    let batch = std::mem::take(&mut pending);
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
