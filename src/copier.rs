//! Ordered, single-flight transfer queue.
//!
//! [`TransferQueue`] processes copy/move requests strictly head-first. A
//! name collision at the destination is resolved by content hash: a true
//! duplicate is rerouted to the duplicates folder, a false collision gets a
//! numeric filename suffix. The head item is rewritten in place during
//! resolution so FIFO order is preserved for the rest of the queue.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::QueueConfig;
use crate::error::TransferError;
use crate::events::{EventBus, PipelineEvent};

/// One queued transfer. Owned exclusively by the queue; the head may be
/// rewritten in place during conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Move (relocate and remove source) instead of copy.
    pub move_file: bool,
    /// On a name collision, hash both sides and keep the source somewhere
    /// (duplicates folder or renamed) instead of accepting the existing
    /// destination as authoritative.
    pub preserve_duplicate: bool,
}

struct QueueState {
    items: VecDeque<TransferItem>,
    active: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    duplicates_dir: String,
    grace: Duration,
    events: EventBus,
}

/// Ordered single-flight copy/move queue.
#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<QueueInner>,
}

impl TransferQueue {
    pub fn new(config: &QueueConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    active: false,
                }),
                duplicates_dir: config.duplicates_dir.clone(),
                grace: Duration::from_millis(config.grace_ms),
                events,
            }),
        }
    }

    /// Append a transfer and start processing if idle. A destination with
    /// no file-extension component is treated as a directory and the
    /// source's basename is appended.
    pub fn enqueue(
        &self,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        move_file: bool,
        preserve_duplicate: bool,
    ) {
        let source = source.into();
        let destination = normalize_destination(&source, destination.into());

        let mut state = self.inner.state.lock();
        state.items.push_back(TransferItem {
            source,
            destination,
            move_file,
            preserve_duplicate,
        });
        self.start_worker(state);
    }

    /// Start the processing task without enqueueing anything. Used after a
    /// batch dispatch so an all-skipped or empty batch still produces a
    /// drain cycle.
    pub fn poke(&self) {
        let state = self.inner.state.lock();
        self.start_worker(state);
    }

    fn start_worker(&self, mut state: parking_lot::MutexGuard<'_, QueueState>) {
        if !state.active {
            state.active = true;
            drop(state);
            tokio::spawn(run_queue(self.inner.clone()));
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when nothing is queued and no processing task is running. A
    /// drain cycle in flight (even on an empty queue, during its grace
    /// period) is not idle.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.items.is_empty() && !state.active
    }
}

/// Processing loop: one drain cycle per spawned worker, always acting on
/// the head item only.
async fn run_queue(inner: Arc<QueueInner>) {
    let mut transferred = 0u64;
    let mut failed = 0u64;

    loop {
        let head = inner.state.lock().items.front().cloned();

        let Some(item) = head else {
            // Empty: wait the grace period and re-check, which absorbs
            // enqueues racing the empty check.
            tokio::time::sleep(inner.grace).await;

            let mut state = inner.state.lock();
            if state.items.is_empty() {
                state.active = false;
                drop(state);
                inner
                    .events
                    .emit(PipelineEvent::QueueDrained { transferred, failed });
                return;
            }
            continue;
        };

        tracing::debug!(
            source = %item.source.display(),
            destination = %item.destination.display(),
            move_file = item.move_file,
            "Processing transfer"
        );

        match transfer(&item).await {
            Ok(()) => {
                transferred += 1;
                inner.state.lock().items.pop_front();
                inner.events.emit(PipelineEvent::TransferDone {
                    source: item.source,
                    destination: item.destination,
                });
            }
            Err(TransferError::DestinationExists(_)) => {
                if !item.preserve_duplicate {
                    // Pre-existing destination is authoritative.
                    tracing::debug!(
                        destination = %item.destination.display(),
                        "Destination already present; accepting existing file"
                    );
                    transferred += 1;
                    inner.state.lock().items.pop_front();
                    inner.events.emit(PipelineEvent::TransferDone {
                        source: item.source,
                        destination: item.destination,
                    });
                } else {
                    match resolve_collision(&inner, &item).await {
                        Ok(resolved) => {
                            // Rewrite the head in place and loop again on
                            // it; FIFO order for the rest is untouched.
                            let mut state = inner.state.lock();
                            if let Some(head) = state.items.front_mut() {
                                *head = resolved;
                            }
                        }
                        Err(e) => {
                            failed += 1;
                            fail_item(&inner, &item, &e);
                        }
                    }
                }
            }
            Err(e) => {
                failed += 1;
                fail_item(&inner, &item, &e);
            }
        }
    }
}

fn fail_item(inner: &QueueInner, item: &TransferItem, error: &TransferError) {
    tracing::error!(
        source = %item.source.display(),
        error = %error,
        "Transfer failed"
    );
    inner.state.lock().items.pop_front();
    inner.events.emit(PipelineEvent::TransferFailed {
        source: item.source.clone(),
        error: error.to_string(),
    });
}

/// Decide what to do with a name collision: hash both sides, then either
/// reroute a true duplicate to the duplicates folder or rename a
/// false-name collision.
async fn resolve_collision(
    inner: &QueueInner,
    item: &TransferItem,
) -> Result<TransferItem, TransferError> {
    let source = item.source.clone();
    let destination = item.destination.clone();
    let (source_hash, dest_hash) = tokio::task::spawn_blocking(move || {
        let a = hash_file(&source)?;
        let b = hash_file(&destination)?;
        Ok::<_, TransferError>((a, b))
    })
    .await
    .map_err(|e| TransferError::Internal(e.to_string()))??;

    if source_hash == dest_hash {
        // True duplicate: reroute into the duplicates folder beside the
        // source, and accept whatever is already there.
        let duplicates_dir = item
            .source
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&inner.duplicates_dir);
        tracing::info!(
            source = %item.source.display(),
            "Duplicate content; rerouting to {}",
            duplicates_dir.display()
        );
        Ok(TransferItem {
            source: item.source.clone(),
            destination: normalize_destination(&item.source, duplicates_dir),
            move_file: item.move_file,
            preserve_duplicate: false,
        })
    } else {
        // Same name, different content: increment the filename suffix.
        let renamed = increment_filename(&item.destination);
        tracing::info!(
            destination = %item.destination.display(),
            "Name collision with different content; trying {}",
            renamed.display()
        );
        Ok(TransferItem {
            source: item.source.clone(),
            destination: renamed,
            move_file: item.move_file,
            preserve_duplicate: item.preserve_duplicate,
        })
    }
}

/// Perform one transfer, refusing to overwrite an existing destination.
async fn transfer(item: &TransferItem) -> Result<(), TransferError> {
    if let Some(parent) = item.destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(parent, e))?;
    }

    if tokio::fs::try_exists(&item.destination)
        .await
        .map_err(|e| TransferError::io(&item.destination, e))?
    {
        return Err(TransferError::DestinationExists(item.destination.clone()));
    }

    if item.move_file {
        match tokio::fs::rename(&item.source, &item.destination).await {
            Ok(()) => Ok(()),
            Err(e) if is_cross_device(&e) => {
                copy_then(item, true).await
            }
            Err(e) => Err(TransferError::io(&item.source, e)),
        }
    } else {
        copy_then(item, false).await
    }
}

/// Byte copy with `create_new`, mtime restored from the source where
/// feasible, optionally removing the source afterwards (cross-device move).
async fn copy_then(item: &TransferItem, remove_source: bool) -> Result<(), TransferError> {
    let source = item.source.clone();
    let destination = item.destination.clone();

    tokio::task::spawn_blocking(move || copy_no_overwrite(&source, &destination))
        .await
        .map_err(|e| TransferError::Internal(e.to_string()))??;

    if remove_source {
        tokio::fs::remove_file(&item.source)
            .await
            .map_err(|e| TransferError::io(&item.source, e))?;
    }
    Ok(())
}

fn copy_no_overwrite(source: &Path, destination: &Path) -> Result<(), TransferError> {
    let mut src = File::open(source).map_err(|e| TransferError::io(source, e))?;

    let mut dst = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                TransferError::DestinationExists(destination.to_path_buf())
            } else {
                TransferError::io(destination, e)
            }
        })?;

    std::io::copy(&mut src, &mut dst).map_err(|e| TransferError::io(destination, e))?;

    if let Ok(metadata) = source.metadata() {
        let mtime = FileTime::from_last_modification_time(&metadata);
        let _ = filetime::set_file_mtime(destination, mtime);
    }

    Ok(())
}

fn hash_file(path: &Path) -> Result<[u8; 32], TransferError> {
    let mut file = File::open(path).map_err(|e| TransferError::io(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| TransferError::io(path, e))?;
    Ok(hasher.finalize().into())
}

fn is_cross_device(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(18) // EXDEV
    }
    #[cfg(windows)]
    {
        e.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

/// A destination with no extension component is treated as a directory and
/// the source's basename is appended. Keeps all queue processing working on
/// file destinations. (An extensionless source file copied to a directory
/// destination relies on this same rule; see the docs for the known edge
/// case.)
fn normalize_destination(source: &Path, destination: PathBuf) -> PathBuf {
    if destination.extension().is_some() {
        return destination;
    }
    match source.file_name() {
        Some(name) => destination.join(name),
        None => destination,
    }
}

/// Increment the trailing `_<digits>` suffix before the extension, or
/// insert `_00` when there is none. The numeric value carries past two
/// digits once capacity is exceeded.
fn increment_filename(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let (base, next, width) = match stem.rfind('_') {
        Some(idx)
            if idx + 1 < stem.len()
                && stem[idx + 1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            let digits = &stem[idx + 1..];
            let value: u64 = digits.parse().unwrap_or(0);
            (stem[..idx].to_string(), value + 1, digits.len().max(2))
        }
        _ => (stem, 0, 2),
    };

    let name = match ext {
        Some(ext) => format!("{base}_{next:0width$}.{ext}"),
        None => format!("{base}_{next:0width$}"),
    };
    path.with_file_name(name)
}
