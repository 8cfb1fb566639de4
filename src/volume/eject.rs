//! Platform-specific unmount and completion cue.
//!
//! Only macOS and Linux get a real unmount. Everything else is a no-op
//! that resolves successfully so ejection never blocks pipeline shutdown.

use crate::error::EjectError;

use super::RemovableVolume;

#[cfg(any(target_os = "macos", target_os = "linux"))]
async fn run_unmount(
    volume: &RemovableVolume,
    program: &str,
    args: &[&str],
) -> Result<(), EjectError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| EjectError::Unmount {
            mount_path: volume.mount_path.clone(),
            message: format!("{program}: {e}"),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(EjectError::Unmount {
            mount_path: volume.mount_path.clone(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(target_os = "macos")]
pub async fn eject_volume(volume: &RemovableVolume) -> Result<(), EjectError> {
    let mount = volume.mount_path.to_string_lossy();
    run_unmount(volume, "diskutil", &["unmount", mount.as_ref()]).await
}

#[cfg(target_os = "linux")]
pub async fn eject_volume(volume: &RemovableVolume) -> Result<(), EjectError> {
    let mount = volume.mount_path.to_string_lossy();

    match run_unmount(volume, "umount", &[mount.as_ref()]).await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Plain umount needs privileges; udisksctl may work for the
            // logged-in user when we know the block device.
            if volume.device.starts_with("/dev/") {
                run_unmount(
                    volume,
                    "udisksctl",
                    &["unmount", "--block-device", &volume.device],
                )
                .await
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub async fn eject_volume(volume: &RemovableVolume) -> Result<(), EjectError> {
    tracing::warn!(
        mount_path = %volume.mount_path.display(),
        "Eject not supported on this platform; remove the device manually"
    );
    Ok(())
}

#[cfg(target_os = "macos")]
pub async fn play_completion_cue() {
    let _ = tokio::process::Command::new("afplay")
        .arg("/System/Library/Sounds/Glass.aiff")
        .output()
        .await;
}

#[cfg(target_os = "linux")]
pub async fn play_completion_cue() {
    let _ = tokio::process::Command::new("paplay")
        .arg("/usr/share/sounds/freedesktop/stereo/complete.oga")
        .output()
        .await;
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub async fn play_completion_cue() {}
