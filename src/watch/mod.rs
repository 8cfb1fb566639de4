//! Folder watching with debounced batching.
//!
//! [`FolderWatcher`] wraps a recursive `notify` watch over one or more
//! roots. Newly-appeared files are collected into a pending buffer and
//! emitted as one [`WatchBatch`] per quiet period; each `watch()` call that
//! adds a new root also emits one batch for the pre-existing files (even
//! when there are none, so a caller watching an empty folder still gets a
//! batch and can finish).

pub mod debounce;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::WatchConfig;
use crate::error::WatchError;
use debounce::WatchSignal;

/// An ordered list of absolute file paths newly observed since the last
/// batch. Consumed exactly once by the orchestrator.
pub type WatchBatch = Vec<PathBuf>;

struct WatchState {
    roots: Mutex<Vec<PathBuf>>,
    ignore: Option<Regex>,
    duplicates_dir: String,
    max_depth: usize,
}

impl WatchState {
    /// Decide whether an observed path belongs in a batch.
    fn accepts(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }

        let roots = self.roots.lock();
        let Some(rel) = roots.iter().find_map(|root| path.strip_prefix(root).ok()) else {
            return false;
        };

        if rel.components().count() > self.max_depth {
            return false;
        }

        for component in rel.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if name.starts_with('.') || name == self.duplicates_dir.as_str() {
                    return false;
                }
            }
        }

        if let Some(pattern) = &self.ignore {
            if pattern.is_match(&path.to_string_lossy()) {
                return false;
            }
        }

        true
    }
}

/// Watches folders and emits debounced batches of newly-added files.
pub struct FolderWatcher {
    state: Arc<WatchState>,
    signal_tx: mpsc::UnboundedSender<WatchSignal>,
    cancel: CancellationToken,
    watcher: Mutex<Option<RecommendedWatcher>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
}

impl FolderWatcher {
    /// Create a watcher that sends batches into `batch_tx`. No roots are
    /// watched until [`FolderWatcher::watch`] is called.
    pub fn new(
        config: &WatchConfig,
        duplicates_dir: &str,
        batch_tx: mpsc::Sender<WatchBatch>,
    ) -> Result<Self, WatchError> {
        let ignore = config
            .ignore
            .as_deref()
            .map(Regex::new)
            .transpose()?;

        let state = Arc::new(WatchState {
            roots: Mutex::new(Vec::new()),
            ignore,
            duplicates_dir: duplicates_dir.to_string(),
            max_depth: config.max_depth,
        });

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let filter_state = state.clone();
        let debounce_task = tokio::spawn(debounce::run(
            signal_rx,
            batch_tx,
            Duration::from_secs(config.debounce_secs),
            cancel.clone(),
            move |path: &Path| filter_state.accepts(path),
        ));

        let event_tx = signal_tx.clone();
        let watcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    // Creates cover new files; modifies cover both
                    // still-in-progress writes (timer reset) and
                    // renames into the tree. Removes unblock a later
                    // file created at the same path.
                    if event.kind.is_create() || event.kind.is_modify() {
                        for path in event.paths {
                            let _ = event_tx.send(WatchSignal::Added(path));
                        }
                    } else if event.kind.is_remove() {
                        for path in event.paths {
                            let _ = event_tx.send(WatchSignal::Removed(path));
                        }
                    }
                }
            },
        )?;

        Ok(Self {
            state,
            signal_tx,
            cancel,
            watcher: Mutex::new(Some(watcher)),
            debounce_task: Mutex::new(Some(debounce_task)),
        })
    }

    /// Add roots to the watch. Idempotent: a root already covered is
    /// skipped, and new roots augment the existing watch rather than
    /// restarting it. Emits one batch of pre-existing files if any new root
    /// was added. Setup errors (missing root) propagate synchronously.
    pub fn watch(&self, roots: &[PathBuf]) -> Result<(), WatchError> {
        let mut added = false;

        for root in roots {
            if self.state.roots.lock().iter().any(|r| r == root) {
                continue;
            }
            if !root.is_dir() {
                return Err(WatchError::MissingRoot(root.clone()));
            }

            {
                let mut guard = self.watcher.lock();
                let watcher = guard.as_mut().ok_or(WatchError::Stopped)?;
                watcher.watch(root, RecursiveMode::Recursive)?;
            }
            self.state.roots.lock().push(root.clone());
            added = true;

            tracing::info!(root = %root.display(), "Watching directory");

            // Initial scan of pre-existing files. Per-entry read races are
            // swallowed; the file simply does not appear in a batch.
            for entry in WalkDir::new(root)
                .max_depth(self.state.max_depth)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    let _ = self
                        .signal_tx
                        .send(WatchSignal::Added(entry.into_path()));
                }
            }
        }

        if added {
            let _ = self.signal_tx.send(WatchSignal::Flush);
        }

        Ok(())
    }

    /// Release the underlying watch and join the debounce task. Safe to
    /// call multiple times.
    pub async fn stop(&self) {
        self.cancel.cancel();
        drop(self.watcher.lock().take());

        let task = self.debounce_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
