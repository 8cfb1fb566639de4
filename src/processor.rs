//! Pipeline orchestrator.
//!
//! [`Ingestor`] wires watcher and media-monitor batches through date
//! resolution into the transfer queue, and sequences shutdown (stop
//! watchers, drain queue, eject media) when not running in continuous
//! watch mode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::copier::TransferQueue;
use crate::events::{EventBus, PipelineEvent};
use crate::metadata::{resolve_date_folder, MetadataReader};
use crate::volume::{MediaMonitor, VolumeProvider};
use crate::watch::{FolderWatcher, WatchBatch};

/// Outcome of one completed drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub transferred: u64,
    pub failed: u64,
}

/// Drives the whole ingestion pipeline.
pub struct Ingestor {
    events: EventBus,
    queue: TransferQueue,
    watcher: Arc<FolderWatcher>,
    monitor: Option<Arc<MediaMonitor>>,
    reader: Arc<dyn MetadataReader>,
    cancel: CancellationToken,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    completion_rx: tokio::sync::Mutex<Option<broadcast::Receiver<PipelineEvent>>>,
}

impl Ingestor {
    /// Build and start the pipeline: watch the configured sources, begin
    /// polling for configured removable devices, and dispatch every batch
    /// into the transfer queue. Watch-setup errors propagate; a missing
    /// source is fatal here, per-file problems later are not.
    pub fn start(
        config: &Config,
        reader: Arc<dyn MetadataReader>,
        volumes: Arc<dyn VolumeProvider>,
    ) -> Result<Self> {
        let events = EventBus::new();
        let completion_rx = events.subscribe();
        let queue = TransferQueue::new(&config.queue, events.clone());

        let (folder_tx, folder_rx) = mpsc::channel::<WatchBatch>(16);
        let watcher = Arc::new(FolderWatcher::new(
            &config.watcher,
            &config.queue.duplicates_dir,
            folder_tx,
        )?);
        watcher.watch(&config.sources)?;

        let (media_tx, media_rx) = mpsc::channel::<WatchBatch>(16);
        let monitor = if config.devices.is_empty() {
            None
        } else {
            let monitor = Arc::new(MediaMonitor::new(
                volumes,
                config,
                media_tx,
                events.clone(),
            ));
            monitor.watch(&config.devices);
            Some(monitor)
        };

        let cancel = CancellationToken::new();
        let dispatch_task = tokio::spawn(dispatch(DispatchContext {
            events: events.clone(),
            queue: queue.clone(),
            watcher: watcher.clone(),
            monitor: monitor.clone(),
            reader: reader.clone(),
            cancel: cancel.clone(),
            folder_rx,
            media_rx,
            destination: config.destination.clone(),
            valid_tags: config.metadata.valid_tags.clone(),
            watch_mode: config.watch,
        }));

        Ok(Self {
            events,
            queue,
            watcher,
            monitor,
            reader,
            cancel,
            dispatch_task: Mutex::new(Some(dispatch_task)),
            completion_rx: tokio::sync::Mutex::new(Some(completion_rx)),
        })
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Wait for the next end-to-end completion (queue drained and media
    /// ejected). Returns `None` if the pipeline went away or completion was
    /// already consumed.
    pub async fn wait_complete(&self) -> Option<IngestSummary> {
        let mut rx = self.completion_rx.lock().await.take()?;
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::Complete {
                    transferred,
                    failed,
                }) => {
                    return Some(IngestSummary {
                        transferred,
                        failed,
                    })
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop everything: dispatch, watchers, monitor, metadata backend.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let task = self.dispatch_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.watcher.stop().await;
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        self.reader.close().await;
    }

    /// Number of transfers currently queued.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

struct DispatchContext {
    events: EventBus,
    queue: TransferQueue,
    watcher: Arc<FolderWatcher>,
    monitor: Option<Arc<MediaMonitor>>,
    reader: Arc<dyn MetadataReader>,
    cancel: CancellationToken,
    folder_rx: mpsc::Receiver<WatchBatch>,
    media_rx: mpsc::Receiver<WatchBatch>,
    destination: PathBuf,
    valid_tags: Vec<String>,
    watch_mode: bool,
}

async fn dispatch(mut ctx: DispatchContext) {
    let mut bus_rx = ctx.events.subscribe();
    // Counters from drain cycles that were extended by late batches, rolled
    // into the next Complete.
    let (mut carried_transferred, mut carried_failed) = (0u64, 0u64);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,

            // Files moved out of watched folders must be deduplicated
            // against the archive.
            Some(batch) = ctx.folder_rx.recv() => {
                dispatch_batch(&ctx, batch, true).await;
            }

            // Files pulled off removable media are copies; a duplicate
            // already in the archive is accepted silently.
            Some(batch) = ctx.media_rx.recv() => {
                dispatch_batch(&ctx, batch, false).await;
            }

            Ok(event) = bus_rx.recv() => {
                if let PipelineEvent::QueueDrained { transferred, failed } = event {
                    // A batch can be parked in a channel (or its transfers
                    // already re-queued) by the time the drain signal is
                    // processed. That work belongs to this run: dispatch
                    // it, fold the counters forward, and wait for the next
                    // drain instead of completing.
                    let mut late = false;
                    while let Ok(batch) = ctx.folder_rx.try_recv() {
                        dispatch_batch(&ctx, batch, true).await;
                        late = true;
                    }
                    while let Ok(batch) = ctx.media_rx.try_recv() {
                        dispatch_batch(&ctx, batch, false).await;
                        late = true;
                    }
                    if late || !ctx.queue.is_idle() {
                        carried_transferred += transferred;
                        carried_failed += failed;
                        continue;
                    }

                    let transferred = transferred + std::mem::take(&mut carried_transferred);
                    let failed = failed + std::mem::take(&mut carried_failed);

                    if let Some(monitor) = &ctx.monitor {
                        monitor.files_processing_complete().await;
                    }
                    ctx.events.emit(PipelineEvent::Complete { transferred, failed });

                    if !ctx.watch_mode {
                        ctx.watcher.stop().await;
                        if let Some(monitor) = &ctx.monitor {
                            monitor.stop().await;
                        }
                        ctx.reader.close().await;
                        break;
                    }
                }
            }
        }
    }
}

/// Resolve and enqueue every path in a batch. A resolver failure skips
/// that path only, never the batch.
async fn dispatch_batch(ctx: &DispatchContext, batch: WatchBatch, move_files: bool) {
    for path in batch {
        match resolve(&ctx.reader, &path, &ctx.valid_tags).await {
            Ok(folder) => {
                ctx.queue.enqueue(
                    path,
                    ctx.destination.join(folder),
                    move_files,
                    move_files,
                );
            }
            Err(reason) => {
                tracing::warn!(file = %path.display(), reason = %reason, "Skipping file");
                ctx.events.emit(PipelineEvent::FileSkipped {
                    path,
                    reason,
                });
            }
        }
    }

    // An all-skipped or empty batch still has to produce a drain cycle.
    ctx.queue.poke();
}

async fn resolve(
    reader: &Arc<dyn MetadataReader>,
    path: &Path,
    valid_tags: &[String],
) -> Result<String, String> {
    let tags = reader.read(path).await.map_err(|e| e.to_string())?;
    resolve_date_folder(&tags, valid_tags).map_err(|e| e.to_string())
}
