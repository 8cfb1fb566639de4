//! Archive date resolution.
//!
//! Derives the `YYYY-MM` archive folder name for one file from its metadata
//! bag, cascading through the likely timestamp tags.

use crate::error::MetadataError;

use super::{
    MediaTags, TagTimestamp, TAG_CREATE_DATE, TAG_CREATION_DATE, TAG_DATE_TIME_ORIGINAL,
    TAG_FILE_MODIFY_DATE,
};

/// Timestamp cascade, first present key wins.
///
/// `DateTimeOriginal` shows up in old AVI files and most photos,
/// `CreationDate` in iPhone videos, `CreateDate` on Sony camera video.
/// `FileModifyDate` could have been changed since capture, but is usually
/// still right when a file is first found on an SD card or import folder.
const DATE_CASCADE: [&str; 4] = [
    TAG_DATE_TIME_ORIGINAL,
    TAG_CREATION_DATE,
    TAG_CREATE_DATE,
    TAG_FILE_MODIFY_DATE,
];

/// A resolved (year, month) pair. Immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub year: i32,
    /// 1-indexed month.
    pub month: u32,
}

impl ResolvedDate {
    /// Format as an archive folder name, month zero-padded to two digits.
    pub fn folder_name(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}

/// Resolve the archive date for one file.
///
/// Fails with [`MetadataError::TagErrors`] if the backend reported read
/// errors, [`MetadataError::NoValidTags`] unless at least one whitelisted
/// tag is present, and [`MetadataError::NoUsableDate`] when the cascade
/// selects no timestamp with a year.
pub fn resolve_date(tags: &MediaTags, valid_tags: &[String]) -> Result<ResolvedDate, MetadataError> {
    if !tags.errors.is_empty() {
        return Err(MetadataError::TagErrors(tags.errors.clone()));
    }

    if !valid_tags.iter().any(|key| tags.fields.contains_key(key)) {
        return Err(MetadataError::NoValidTags);
    }

    let selected: Option<&TagTimestamp> = DATE_CASCADE
        .iter()
        .find_map(|key| tags.timestamp(key));

    match selected {
        Some(ts) => match ts.year {
            Some(year) => Ok(ResolvedDate {
                year,
                month: ts.month,
            }),
            None => Err(MetadataError::NoUsableDate),
        },
        None => Err(MetadataError::NoUsableDate),
    }
}

/// Resolve and format in one step.
pub fn resolve_date_folder(
    tags: &MediaTags,
    valid_tags: &[String],
) -> Result<String, MetadataError> {
    resolve_date(tags, valid_tags).map(|date| date.folder_name())
}
