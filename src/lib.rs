//! Photosift - photo/video import automation tool
//!
//! Watches source folders and removable media for new files, resolves an
//! archive folder (`YYYY-MM`) from each file's metadata, and copies/moves
//! files into the archive with content-hash duplicate resolution.
//!
//! This library crate exposes the core pipeline for integration testing.

pub mod config;
pub mod copier;
pub mod error;
pub mod events;
pub mod metadata;
pub mod processor;
pub mod volume;
pub mod watch;
