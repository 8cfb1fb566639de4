//! Removable-media lifecycle monitor.
//!
//! Polls the volume provider on a fixed interval, starts a
//! [`FolderWatcher`] on each newly attached allow-listed volume, and ejects
//! the known devices once the orchestrator reports that their files have
//! been processed. Devices leave the known set only through successful
//! ejection, never because a later poll stopped reporting them (the OS may
//! report a volume already unmounted).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{EventBus, PipelineEvent};
use crate::watch::{FolderWatcher, WatchBatch};

use super::{RemovableVolume, VolumeProvider};

struct MediaDevice {
    volume: RemovableVolume,
    watcher: Arc<FolderWatcher>,
}

struct MonitorState {
    provider: Arc<dyn VolumeProvider>,
    /// Known devices, keyed by mount path. Never held across an await.
    known: Mutex<HashMap<PathBuf, MediaDevice>>,
    watch_config: crate::config::WatchConfig,
    duplicates_dir: String,
    poll_interval: Duration,
    batch_tx: mpsc::Sender<WatchBatch>,
    events: EventBus,
    cancel: CancellationToken,
}

/// Watches for removable volumes and runs a folder watcher per device.
pub struct MediaMonitor {
    state: Arc<MonitorState>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl MediaMonitor {
    pub fn new(
        provider: Arc<dyn VolumeProvider>,
        config: &Config,
        batch_tx: mpsc::Sender<WatchBatch>,
        events: EventBus,
    ) -> Self {
        Self {
            state: Arc::new(MonitorState {
                provider,
                known: Mutex::new(HashMap::new()),
                watch_config: config.watcher.clone(),
                duplicates_dir: config.queue.duplicates_dir.clone(),
                poll_interval: Duration::from_secs(config.media.poll_interval_secs),
                batch_tx,
                events,
                cancel: CancellationToken::new(),
            }),
            poll_task: Mutex::new(None),
        }
    }

    /// Start polling immediately and on every interval thereafter.
    pub fn watch(&self, allow_labels: &[String]) {
        let labels: Vec<String> = allow_labels.iter().map(|l| l.to_lowercase()).collect();
        let state = self.state.clone();

        let task = tokio::spawn(async move {
            loop {
                poll_once(&state, &labels).await;

                tokio::select! {
                    _ = tokio::time::sleep(state.poll_interval) => {}
                    _ = state.cancel.cancelled() => break,
                }
            }
        });

        *self.poll_task.lock() = Some(task);
    }

    /// Called by the orchestrator once all files found on the devices have
    /// been queued and copied. Ejects every device known at call time;
    /// failures leave the device known so a later completion attempt
    /// retries. Always resolves.
    pub async fn files_processing_complete(&self) {
        let snapshot: Vec<(PathBuf, RemovableVolume, Arc<FolderWatcher>)> = self
            .state
            .known
            .lock()
            .iter()
            .map(|(mount, device)| {
                (mount.clone(), device.volume.clone(), device.watcher.clone())
            })
            .collect();

        let mut ejected = 0usize;

        for (mount, volume, watcher) in snapshot {
            watcher.stop().await;

            match self.state.provider.eject(&volume).await {
                Ok(()) => {
                    self.state.known.lock().remove(&mount);
                    tracing::info!(
                        mount_path = %mount.display(),
                        label = %volume.label,
                        "Ejected removable volume"
                    );
                    self.state.events.emit(PipelineEvent::DeviceEjected {
                        mount_path: mount,
                        label: volume.label,
                    });
                    ejected += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        mount_path = %mount.display(),
                        error = %e,
                        "Failed to eject volume; will retry on next completion"
                    );
                }
            }
        }

        if ejected > 0 {
            self.state.provider.completion_cue().await;
        }
    }

    /// Cancel the poll task and stop all per-device watchers. Idempotent.
    pub async fn stop(&self) {
        self.state.cancel.cancel();

        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let watchers: Vec<Arc<FolderWatcher>> = self
            .state
            .known
            .lock()
            .values()
            .map(|device| device.watcher.clone())
            .collect();
        for watcher in watchers {
            watcher.stop().await;
        }
    }
}

async fn poll_once(state: &Arc<MonitorState>, labels: &[String]) {
    let volumes = state.provider.list();

    for volume in volumes {
        if !labels.contains(&volume.label.to_lowercase()) {
            continue;
        }
        // Idempotent membership test: re-observation of a known device
        // across polls is a no-op.
        if state.known.lock().contains_key(&volume.mount_path) {
            continue;
        }

        let watcher = match FolderWatcher::new(
            &state.watch_config,
            &state.duplicates_dir,
            state.batch_tx.clone(),
        ) {
            Ok(watcher) => Arc::new(watcher),
            Err(e) => {
                tracing::warn!(
                    mount_path = %volume.mount_path.display(),
                    error = %e,
                    "Failed to create device watcher; will retry next poll"
                );
                continue;
            }
        };

        if let Err(e) = watcher.watch(&[volume.mount_path.clone()]) {
            tracing::warn!(
                mount_path = %volume.mount_path.display(),
                error = %e,
                "Failed to watch device; will retry next poll"
            );
            watcher.stop().await;
            continue;
        }

        tracing::info!(
            mount_path = %volume.mount_path.display(),
            label = %volume.label,
            "Removable volume attached"
        );
        state.events.emit(PipelineEvent::DeviceAttached {
            mount_path: volume.mount_path.clone(),
            label: volume.label.clone(),
        });

        state.known.lock().insert(
            volume.mount_path.clone(),
            MediaDevice {
                volume,
                watcher,
            },
        );
    }
}
