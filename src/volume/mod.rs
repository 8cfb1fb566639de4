//! Removable volume enumeration and the media monitor.
//!
//! [`VolumeProvider`] is the capability interface over the OS block-device
//! table, privileged eject, and the completion cue; [`SystemVolumes`] is
//! the `sysinfo`-backed production implementation. [`monitor::MediaMonitor`]
//! polls the provider and runs a watcher per attached device.

pub mod eject;
pub mod monitor;

pub use monitor::MediaMonitor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::EjectError;

/// One currently mounted removable volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovableVolume {
    /// OS device identifier (best effort; some platforms only expose the
    /// volume name here).
    pub device: String,
    /// Where the volume is mounted.
    pub mount_path: PathBuf,
    /// Volume label, compared case-insensitively against the allow-list.
    pub label: String,
}

/// Capability interface over removable-volume enumeration and ejection, so
/// tests can substitute fakes and unsupported platforms degrade to no-ops.
#[async_trait]
pub trait VolumeProvider: Send + Sync {
    /// Enumerate currently mounted removable volumes.
    fn list(&self) -> Vec<RemovableVolume>;

    /// Safely unmount one volume. Never guaranteed on all platforms; the
    /// no-op implementations resolve successfully rather than failing
    /// closed.
    async fn eject(&self, volume: &RemovableVolume) -> Result<(), EjectError>;

    /// Play an audible "safe to remove" cue. Failures are ignored.
    async fn completion_cue(&self);
}

/// Production [`VolumeProvider`] backed by the `sysinfo` disks list.
pub struct SystemVolumes;

impl SystemVolumes {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemVolumes {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeProvider for SystemVolumes {
    fn list(&self) -> Vec<RemovableVolume> {
        let disks = sysinfo::Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| disk.is_removable())
            .map(|disk| {
                let mount_path = disk.mount_point().to_path_buf();
                let name = disk.name().to_string_lossy().to_string();
                let label = if name.is_empty() {
                    mount_basename(&mount_path)
                } else {
                    name.clone()
                };
                RemovableVolume {
                    device: name,
                    mount_path,
                    label,
                }
            })
            .collect()
    }

    async fn eject(&self, volume: &RemovableVolume) -> Result<(), EjectError> {
        eject::eject_volume(volume).await
    }

    async fn completion_cue(&self) {
        eject::play_completion_cue().await;
    }
}

fn mount_basename(mount_path: &Path) -> String {
    mount_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
