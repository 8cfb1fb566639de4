//! Error types for the ingestion pipeline.
//!
//! Per-file failures ([`MetadataError`]) are recovered by skipping the file;
//! watch-setup failures ([`WatchError`]) propagate to the caller; transfer
//! failures ([`TransferError`]) are fatal to one queue item but never stop
//! the queue; eject failures ([`EjectError`]) are logged and retried on the
//! next completion pass.

use std::path::PathBuf;

/// Failure while reading metadata or resolving an archive date for one file.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The file could not be read at all.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The metadata backend reported parse errors for this file.
    #[error("metadata backend reported errors: {0:?}")]
    TagErrors(Vec<String>),

    /// No whitelisted media tag was present, so the file is not treated as
    /// media even if the backend parsed it without complaint.
    #[error("no recognized media tags present")]
    NoValidTags,

    /// The date cascade found no timestamp with a year component.
    #[error("no usable date in metadata")]
    NoUsableDate,
}

/// Failure while setting up or augmenting a filesystem watch.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// A requested watch root does not exist or is not a directory.
    #[error("watch root does not exist: {0:?}")]
    MissingRoot(PathBuf),

    /// The watcher has already been stopped.
    #[error("watcher already stopped")]
    Stopped,

    /// The configured ignore pattern is not a valid regex.
    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The underlying watch backend failed.
    #[error("watch backend error: {0}")]
    Notify(#[from] notify::Error),
}

/// Failure while transferring one queued file.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The destination path already exists. Handled internally by conflict
    /// resolution and never surfaced to callers.
    #[error("destination already exists: {0:?}")]
    DestinationExists(PathBuf),

    /// An I/O operation on the given path failed.
    #[error("transfer failed at {path:?}: {source}")]
    Io {
        /// The path the failing operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors (worker panics, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure while ejecting a removable volume.
#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    /// The platform unmount command failed or could not be spawned.
    #[error("failed to eject {mount_path:?}: {message}")]
    Unmount {
        /// Mount path of the volume that could not be ejected.
        mount_path: PathBuf,
        /// Output or spawn error from the unmount command.
        message: String,
    },
}
