//! Metadata extraction.
//!
//! [`MetadataReader`] is the injected collaborator that produces a
//! [`MediaTags`] bag for one file. The production implementation
//! ([`ExifReader`]) parses EXIF with the `kamadak-exif` crate and always
//! synthesizes a `FileModifyDate` tag from the filesystem mtime, mirroring
//! the tag names exiftool reports.

pub mod date;

pub use date::{resolve_date, resolve_date_folder, ResolvedDate};

use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use exif::{In, Tag, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::MetadataError;

/// Tag key for the image-dimension tag used by the default validity check.
pub const TAG_IMAGE_WIDTH: &str = "ImageWidth";
/// Original capture timestamp (EXIF DateTimeOriginal).
pub const TAG_DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
/// Device creation timestamp (QuickTime; supplied by video-capable backends).
pub const TAG_CREATION_DATE: &str = "CreationDate";
/// Digitization timestamp (EXIF DateTimeDigitized, exiftool's CreateDate).
pub const TAG_CREATE_DATE: &str = "CreateDate";
/// In-camera modification timestamp (EXIF DateTime).
pub const TAG_MODIFY_DATE: &str = "ModifyDate";
/// Filesystem modification time, synthesized for every file.
pub const TAG_FILE_MODIFY_DATE: &str = "FileModifyDate";

/// A structured timestamp as reported by the metadata backend. No timezone
/// adjustment is applied anywhere; fields are used as reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagTimestamp {
    /// Missing when the backend only partially parsed the value.
    pub year: Option<i32>,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

/// One metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Number(u32),
    Timestamp(TagTimestamp),
}

/// Key/value bag of metadata for one file, produced per read and never
/// cached across files.
#[derive(Debug, Clone, Default)]
pub struct MediaTags {
    pub fields: HashMap<String, TagValue>,
    /// Parse errors the backend reported without failing the whole read.
    pub errors: Vec<String>,
}

impl MediaTags {
    /// Look up a timestamp field by key.
    pub fn timestamp(&self, key: &str) -> Option<&TagTimestamp> {
        match self.fields.get(key) {
            Some(TagValue::Timestamp(ts)) => Some(ts),
            _ => None,
        }
    }
}

/// Metadata backend with an explicit lifecycle so tests can substitute
/// fakes and callers can sequence shutdown deterministically.
#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// Read the metadata bag for one file. I/O failures are errors;
    /// "this file has no metadata" is not.
    async fn read(&self, path: &Path) -> Result<MediaTags, MetadataError>;

    /// Release backend resources. Idempotent.
    async fn close(&self);
}

/// EXIF-backed [`MetadataReader`].
pub struct ExifReader;

impl ExifReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExifReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataReader for ExifReader {
    async fn read(&self, path: &Path) -> Result<MediaTags, MetadataError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_tags(&path))
            .await
            .map_err(|e| MetadataError::TagErrors(vec![e.to_string()]))?
    }

    async fn close(&self) {}
}

fn read_tags(path: &PathBuf) -> Result<MediaTags, MetadataError> {
    let mut tags = MediaTags::default();

    let file = File::open(path).map_err(|source| MetadataError::Io {
        path: path.clone(),
        source,
    })?;

    let mut reader = BufReader::new(&file);
    match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => {
            if let Some(width) = uint_field(&exif, Tag::ImageWidth)
                .or_else(|| uint_field(&exif, Tag::PixelXDimension))
            {
                tags.fields
                    .insert(TAG_IMAGE_WIDTH.to_string(), TagValue::Number(width));
            }

            for (key, tag) in [
                (TAG_DATE_TIME_ORIGINAL, Tag::DateTimeOriginal),
                (TAG_CREATE_DATE, Tag::DateTimeDigitized),
                (TAG_MODIFY_DATE, Tag::DateTime),
            ] {
                if let Some(ts) = timestamp_field(&exif, tag) {
                    tags.fields.insert(key.to_string(), TagValue::Timestamp(ts));
                }
            }
        }
        // Not an EXIF container at all: the bag simply lacks EXIF keys.
        Err(exif::Error::NotFound(_))
        | Err(exif::Error::NotSupported(_))
        | Err(exif::Error::BlankValue(_)) => {}
        Err(exif::Error::Io(source)) => {
            return Err(MetadataError::Io {
                path: path.clone(),
                source,
            });
        }
        // Structural corruption is recorded, not fatal to the read.
        Err(other) => tags.errors.push(other.to_string()),
    }

    let metadata = file.metadata().map_err(|source| MetadataError::Io {
        path: path.clone(),
        source,
    })?;
    if let Ok(mtime) = metadata.modified() {
        let local: chrono::DateTime<chrono::Local> = mtime.into();
        tags.fields.insert(
            TAG_FILE_MODIFY_DATE.to_string(),
            TagValue::Timestamp(TagTimestamp {
                year: Some(local.year()),
                month: local.month(),
                day: local.day(),
                hour: local.hour(),
                minute: local.minute(),
                second: local.second(),
            }),
        );
    }

    Ok(tags)
}

fn uint_field(exif: &exif::Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

fn timestamp_field(exif: &exif::Exif, tag: Tag) -> Option<TagTimestamp> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let ascii = match &field.value {
        Value::Ascii(lines) if !lines.is_empty() => &lines[0],
        _ => return None,
    };
    let dt = exif::DateTime::from_ascii(ascii).ok()?;
    Some(TagTimestamp {
        year: Some(i32::from(dt.year)),
        month: u32::from(dt.month),
        day: u32::from(dt.day),
        hour: u32::from(dt.hour),
        minute: u32::from(dt.minute),
        second: u32::from(dt.second),
    })
}
