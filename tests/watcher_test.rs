//! Integration tests for the folder watcher: initial-scan batches,
//! debounced event batches, ignore rules, and stop semantics.

use std::path::PathBuf;
use std::time::Duration;

use photosift::config::WatchConfig;
use photosift::error::WatchError;
use photosift::watch::{FolderWatcher, WatchBatch};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn test_config() -> WatchConfig {
    WatchConfig {
        debounce_secs: 1,
        max_depth: 100,
        ignore: None,
    }
}

fn test_watcher() -> (FolderWatcher, mpsc::Receiver<WatchBatch>) {
    let (tx, rx) = mpsc::channel(8);
    let watcher = FolderWatcher::new(&test_config(), "_duplicates", tx).unwrap();
    (watcher, rx)
}

async fn next_batch(rx: &mut mpsc::Receiver<WatchBatch>) -> WatchBatch {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no batch emitted")
        .expect("watcher channel closed")
}

#[tokio::test]
async fn empty_directory_still_emits_one_batch() {
    let dir = TempDir::new().unwrap();
    let (watcher, mut rx) = test_watcher();

    watcher.watch(&[dir.path().to_path_buf()]).unwrap();

    let batch = next_batch(&mut rx).await;
    assert!(batch.is_empty());
    watcher.stop().await;
}

#[tokio::test]
async fn pre_existing_files_appear_in_the_initial_batch() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.jpg"), "a").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub/b.jpg"), "b").unwrap();

    let (watcher, mut rx) = test_watcher();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();

    let mut batch = next_batch(&mut rx).await;
    batch.sort();
    assert_eq!(
        batch,
        vec![dir.path().join("a.jpg"), dir.path().join("sub/b.jpg")]
    );
    watcher.stop().await;
}

#[tokio::test]
async fn files_added_within_the_window_land_in_one_batch() {
    let dir = TempDir::new().unwrap();
    let (watcher, mut rx) = test_watcher();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();

    // Consume the initial (empty) batch.
    assert!(next_batch(&mut rx).await.is_empty());

    std::fs::write(dir.path().join("one.jpg"), "1").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(dir.path().join("two.jpg"), "2").unwrap();

    let mut batch = next_batch(&mut rx).await;
    batch.sort();
    assert_eq!(
        batch,
        vec![dir.path().join("one.jpg"), dir.path().join("two.jpg")]
    );
    watcher.stop().await;
}

#[tokio::test]
async fn hidden_and_duplicates_paths_are_ignored() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".hidden.jpg"), "h").unwrap();
    std::fs::create_dir(dir.path().join("_duplicates")).unwrap();
    std::fs::write(dir.path().join("_duplicates/dupe.jpg"), "d").unwrap();
    std::fs::write(dir.path().join("real.jpg"), "r").unwrap();

    let (watcher, mut rx) = test_watcher();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();

    let batch = next_batch(&mut rx).await;
    assert_eq!(batch, vec![dir.path().join("real.jpg")]);
    watcher.stop().await;
}

#[tokio::test]
async fn ignore_pattern_filters_matching_paths() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("skip-me.tmp"), "t").unwrap();
    std::fs::write(dir.path().join("keep.jpg"), "k").unwrap();

    let config = WatchConfig {
        debounce_secs: 1,
        max_depth: 100,
        ignore: Some(r"\.tmp$".to_string()),
    };
    let (tx, mut rx) = mpsc::channel(8);
    let watcher = FolderWatcher::new(&config, "_duplicates", tx).unwrap();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();

    let batch = next_batch(&mut rx).await;
    assert_eq!(batch, vec![dir.path().join("keep.jpg")]);
    watcher.stop().await;
}

#[tokio::test]
async fn paths_are_never_repeated_across_batches() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("photo.jpg");
    std::fs::write(&file, "v1").unwrap();

    let (watcher, mut rx) = test_watcher();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();

    assert_eq!(next_batch(&mut rx).await, vec![file.clone()]);

    // A later write to the same file must not produce another batch.
    std::fs::write(&file, "v2").unwrap();
    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    assert!(second.is_err(), "already-emitted path reappeared in a batch");
    watcher.stop().await;
}

#[tokio::test]
async fn recreated_path_is_emitted_again() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("photo.jpg");
    std::fs::write(&file, "first card").unwrap();

    let (watcher, mut rx) = test_watcher();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(next_batch(&mut rx).await, vec![file.clone()]);

    // The importer moves files away; a fresh file can land at the same
    // path later (another card reusing the same IMG numbering).
    std::fs::remove_file(&file).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(&file, "second card").unwrap();

    assert_eq!(next_batch(&mut rx).await, vec![file.clone()]);
    watcher.stop().await;
}

#[tokio::test]
async fn watching_a_covered_root_again_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.jpg"), "a").unwrap();

    let (watcher, mut rx) = test_watcher();
    let root = vec![dir.path().to_path_buf()];
    watcher.watch(&root).unwrap();
    assert_eq!(next_batch(&mut rx).await.len(), 1);

    // Second call covers no new root: no scan, no flush batch.
    watcher.watch(&root).unwrap();
    let again = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
    assert!(again.is_err());
    watcher.stop().await;
}

#[tokio::test]
async fn missing_root_fails_synchronously() {
    let (watcher, _rx) = test_watcher();
    let missing = PathBuf::from("/definitely/not/a/real/folder");
    let err = watcher.watch(&[missing.clone()]).unwrap_err();
    assert!(matches!(err, WatchError::MissingRoot(p) if p == missing));
    watcher.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (watcher, mut rx) = test_watcher();
    watcher.watch(&[dir.path().to_path_buf()]).unwrap();
    assert!(next_batch(&mut rx).await.is_empty());

    watcher.stop().await;
    watcher.stop().await;

    // A stopped watcher refuses new roots.
    let other = TempDir::new().unwrap();
    assert!(matches!(
        watcher.watch(&[other.path().to_path_buf()]),
        Err(WatchError::Stopped)
    ));
}
