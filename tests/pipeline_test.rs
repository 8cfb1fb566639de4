//! End-to-end ingest runs over temp trees, with fake metadata and volume
//! collaborators substituted for the real backends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use photosift::config::Config;
use photosift::error::{EjectError, MetadataError};
use photosift::events::PipelineEvent;
use photosift::metadata::{
    MediaTags, MetadataReader, TagTimestamp, TagValue, TAG_DATE_TIME_ORIGINAL, TAG_IMAGE_WIDTH,
};
use photosift::processor::Ingestor;
use photosift::volume::{RemovableVolume, VolumeProvider};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Fake metadata backend: `.jpg` files resolve to June 2019, everything
/// else has no media tags at all.
struct StubReader;

#[async_trait]
impl MetadataReader for StubReader {
    async fn read(&self, path: &Path) -> Result<MediaTags, MetadataError> {
        let mut tags = MediaTags::default();
        if path.extension().is_some_and(|ext| ext == "jpg") {
            tags.fields
                .insert(TAG_IMAGE_WIDTH.to_string(), TagValue::Number(4000));
            tags.fields.insert(
                TAG_DATE_TIME_ORIGINAL.to_string(),
                TagValue::Timestamp(TagTimestamp {
                    year: Some(2019),
                    month: 6,
                    day: 1,
                    hour: 10,
                    minute: 0,
                    second: 0,
                }),
            );
        }
        Ok(tags)
    }

    async fn close(&self) {}
}

/// [`StubReader`] slowed down enough that new batches pile up behind a
/// dispatch in progress.
struct SlowReader;

#[async_trait]
impl MetadataReader for SlowReader {
    async fn read(&self, path: &Path) -> Result<MediaTags, MetadataError> {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        StubReader.read(path).await
    }

    async fn close(&self) {}
}

/// Scripted volume provider that records ejections.
struct StubVolumes {
    volumes: Mutex<Vec<RemovableVolume>>,
    ejected: Mutex<Vec<PathBuf>>,
    fail_eject: AtomicBool,
}

impl StubVolumes {
    fn new() -> Self {
        Self {
            volumes: Mutex::new(Vec::new()),
            ejected: Mutex::new(Vec::new()),
            fail_eject: AtomicBool::new(false),
        }
    }

    fn attach(&self, mount_path: &Path, label: &str) {
        self.volumes.lock().push(RemovableVolume {
            device: "/dev/stub".to_string(),
            mount_path: mount_path.to_path_buf(),
            label: label.to_string(),
        });
    }
}

#[async_trait]
impl VolumeProvider for StubVolumes {
    fn list(&self) -> Vec<RemovableVolume> {
        self.volumes.lock().clone()
    }

    async fn eject(&self, volume: &RemovableVolume) -> Result<(), EjectError> {
        if self.fail_eject.load(Ordering::SeqCst) {
            return Err(EjectError::Unmount {
                mount_path: volume.mount_path.clone(),
                message: "device busy".to_string(),
            });
        }
        self.ejected.lock().push(volume.mount_path.clone());
        self.volumes
            .lock()
            .retain(|v| v.mount_path != volume.mount_path);
        Ok(())
    }

    async fn completion_cue(&self) {}
}

fn test_config(sources: Vec<PathBuf>, destination: PathBuf, devices: Vec<String>) -> Config {
    let mut config = Config::default();
    config.sources = sources;
    config.destination = destination;
    config.devices = devices;
    config.watcher.debounce_secs = 1;
    config.queue.grace_ms = 100;
    config.media.poll_interval_secs = 1;
    config
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<PipelineEvent>, mut pred: F) -> PipelineEvent
where
    F: FnMut(&PipelineEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("expected pipeline event never arrived")
            .expect("event bus closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn one_shot_import_moves_files_into_date_folders() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    std::fs::write(src.path().join("a.jpg"), "aaa").unwrap();
    std::fs::write(src.path().join("b.jpg"), "bbb").unwrap();

    let config = test_config(
        vec![src.path().to_path_buf()],
        dest.path().to_path_buf(),
        vec![],
    );
    let ingestor =
        Ingestor::start(&config, Arc::new(StubReader), Arc::new(StubVolumes::new())).unwrap();

    let summary = ingestor.wait_complete().await.unwrap();
    assert_eq!(summary.transferred, 2);
    assert_eq!(summary.failed, 0);

    // Moved, original basenames intact.
    assert!(dest.path().join("2019-06/a.jpg").exists());
    assert!(dest.path().join("2019-06/b.jpg").exists());
    assert!(!src.path().join("a.jpg").exists());
    assert!(!src.path().join("b.jpg").exists());

    ingestor.stop().await;
}

#[tokio::test]
async fn unresolvable_files_are_skipped_not_fatal() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    std::fs::write(src.path().join("photo.jpg"), "p").unwrap();
    std::fs::write(src.path().join("notes.txt"), "n").unwrap();

    let config = test_config(
        vec![src.path().to_path_buf()],
        dest.path().to_path_buf(),
        vec![],
    );
    let ingestor =
        Ingestor::start(&config, Arc::new(StubReader), Arc::new(StubVolumes::new())).unwrap();

    let summary = ingestor.wait_complete().await.unwrap();
    assert_eq!(summary.transferred, 1);
    assert_eq!(summary.failed, 0);

    assert!(dest.path().join("2019-06/photo.jpg").exists());
    // Skipped file stays where it was.
    assert!(src.path().join("notes.txt").exists());

    ingestor.stop().await;
}

#[tokio::test]
async fn files_arriving_during_a_drain_still_make_the_one_shot_summary() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    std::fs::write(src.path().join("a.jpg"), "aaa").unwrap();

    let config = test_config(
        vec![src.path().to_path_buf()],
        dest.path().to_path_buf(),
        vec![],
    );
    let ingestor =
        Ingestor::start(&config, Arc::new(SlowReader), Arc::new(StubVolumes::new())).unwrap();

    // Lands while the first batch is still being resolved, so its batch is
    // parked behind the first drain signal.
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(src.path().join("b.jpg"), "bbb").unwrap();

    let summary = ingestor.wait_complete().await.unwrap();
    assert_eq!(summary.transferred, 2);
    assert_eq!(summary.failed, 0);

    assert!(dest.path().join("2019-06/a.jpg").exists());
    assert!(dest.path().join("2019-06/b.jpg").exists());

    ingestor.stop().await;
}

#[tokio::test]
async fn empty_one_shot_run_still_completes() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let config = test_config(
        vec![src.path().to_path_buf()],
        dest.path().to_path_buf(),
        vec![],
    );
    let ingestor =
        Ingestor::start(&config, Arc::new(StubReader), Arc::new(StubVolumes::new())).unwrap();

    let summary = ingestor.wait_complete().await.unwrap();
    assert_eq!(summary.transferred, 0);
    assert_eq!(summary.failed, 0);

    ingestor.stop().await;
}

#[tokio::test]
async fn removable_media_files_are_copied_and_device_ejected() {
    let card = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    std::fs::write(card.path().join("dcim.jpg"), "from the card").unwrap();

    let volumes = Arc::new(StubVolumes::new());
    volumes.attach(card.path(), "SDCARD");

    let config = test_config(vec![], dest.path().to_path_buf(), vec!["sdcard".to_string()]);
    let ingestor = Ingestor::start(&config, Arc::new(StubReader), volumes.clone()).unwrap();

    let summary = ingestor.wait_complete().await.unwrap();
    assert_eq!(summary.transferred, 1);

    // Copied, not moved: the card keeps its file.
    assert!(dest.path().join("2019-06/dcim.jpg").exists());
    assert!(card.path().join("dcim.jpg").exists());

    assert_eq!(*volumes.ejected.lock(), vec![card.path().to_path_buf()]);

    ingestor.stop().await;
}

#[tokio::test]
async fn device_attach_is_idempotent_across_polls() {
    let card = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let volumes = Arc::new(StubVolumes::new());
    // Keep the device mounted across polls: ejection would remove it.
    volumes.fail_eject.store(true, Ordering::SeqCst);
    let mut config = test_config(
        vec![src.path().to_path_buf()],
        dest.path().to_path_buf(),
        vec!["SDCARD".to_string()],
    );
    config.watch = true;

    let ingestor = Ingestor::start(&config, Arc::new(StubReader), volumes.clone()).unwrap();
    let mut rx = ingestor.subscribe();

    // Attach after subscribing so the first DeviceAttached is observable.
    volumes.attach(card.path(), "SDCARD");
    wait_for(&mut rx, |e| matches!(e, PipelineEvent::DeviceAttached { .. })).await;

    // Let several more polls run; re-observation must not re-attach.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let mut extra_attaches = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, PipelineEvent::DeviceAttached { .. }) {
            extra_attaches += 1;
        }
    }
    assert_eq!(extra_attaches, 0);

    ingestor.stop().await;
}

#[tokio::test]
async fn failed_eject_keeps_device_for_retry() {
    let card = TempDir::new().unwrap();
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    std::fs::write(card.path().join("dcim.jpg"), "card file").unwrap();

    let volumes = Arc::new(StubVolumes::new());
    volumes.attach(card.path(), "SDCARD");
    volumes.fail_eject.store(true, Ordering::SeqCst);

    let mut config = test_config(
        vec![src.path().to_path_buf()],
        dest.path().to_path_buf(),
        vec!["SDCARD".to_string()],
    );
    config.watch = true;

    let ingestor = Ingestor::start(&config, Arc::new(StubReader), volumes.clone()).unwrap();
    let mut rx = ingestor.subscribe();

    // Wait for the drain cycle that copied the card file.
    wait_for(&mut rx, |e| {
        matches!(e, PipelineEvent::Complete { .. }) && dest.path().join("2019-06/dcim.jpg").exists()
    })
    .await;
    assert!(volumes.ejected.lock().is_empty());

    // Eject works now; a new source file forces another drain cycle, which
    // retries the eject.
    volumes.fail_eject.store(false, Ordering::SeqCst);
    std::fs::write(src.path().join("later.jpg"), "later").unwrap();

    wait_for(&mut rx, |e| matches!(e, PipelineEvent::DeviceEjected { .. })).await;
    assert_eq!(*volumes.ejected.lock(), vec![card.path().to_path_buf()]);

    ingestor.stop().await;
}
