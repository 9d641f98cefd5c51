//! Metadata extractor registry and implementations.
//!
//! This module defines the `MetadataExtractor` trait used by the
//! indexing pipeline plus the defaulting rules every extractor applies
//! before a record reaches a store.

use std::path::Path;

use anyhow::Result;

use crate::models::{ExtractorKind, Media};

mod keyvalue;
mod tags;

pub use keyvalue::KeyValueExtractor;
pub use tags::TagExtractor;

/// Lowercase extensions treated as media files by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "oga", "flac"];

pub const UNKNOWN_ARTIST: &str = "unknown artist";
pub const UNKNOWN_ALBUM: &str = "unknown album";
pub const UNKNOWN_GENRE: &str = "unknown genre";

/// Converts a media file into a `Media` record.
///
/// Implementations are shared across extraction workers.
pub trait MetadataExtractor: Sync + Send {
    /// Stable identifier (e.g., "tags").
    fn id(&self) -> &'static str;

    /// Read the file's metadata. An error drops the file from the run.
    fn extract(&self, path: &Path) -> Result<Media>;
}

static TAGS: TagExtractor = TagExtractor;
static KEY_VALUE: KeyValueExtractor = KeyValueExtractor;

/// Look up the extractor implementation for a kind.
pub fn extractor_for_kind(kind: ExtractorKind) -> &'static dyn MetadataExtractor {
    match kind {
        ExtractorKind::Tags => &TAGS,
        ExtractorKind::KeyValue => &KEY_VALUE,
    }
}

/// Whether `path` carries one of `extensions` (compared case-insensitively).
pub fn has_media_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Raw fields read from a file before defaults are applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RawFields {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawFields {
    /// Apply the defaulting rules: album artist wins over artist, the
    /// file stem stands in for a missing title, and missing names become
    /// the `unknown ...` placeholders.
    pub fn into_media(self, path: &Path) -> Media {
        let title = non_empty(self.title).unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let artist = non_empty(self.album_artist)
            .or_else(|| non_empty(self.artist))
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());

        Media {
            title,
            artist,
            album: non_empty(self.album).unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
            track_number: self.track_number.unwrap_or(0),
            disc_number: self.disc_number.unwrap_or(0),
            genre: non_empty(self.genre).unwrap_or_else(|| UNKNOWN_GENRE.to_string()),
            path: path.to_path_buf(),
        }
    }
}
