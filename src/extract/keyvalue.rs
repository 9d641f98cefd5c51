//! Plain-text extractor reading `key = value` lines.
//!
//! Used for fixture libraries where building real audio files is not
//! practical. Recognized keys: `title`, `artist`, `albumartist`,
//! `album`, `genre`, `track`/`tracknumber`, `disc`/`discnumber`.
//! Lines starting with `#` are comments; unknown keys are ignored.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::{MetadataExtractor, RawFields};
use crate::models::Media;

#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValueExtractor;

/// Parse the leading number of values like `3` or `3/12`.
fn parse_number(value: &str) -> Option<u32> {
    value.split('/').next()?.trim().parse().ok()
}

pub(crate) fn parse_fields(text: &str) -> Option<RawFields> {
    let mut raw = RawFields::default();
    let mut seen = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_string();

        match key.trim().to_ascii_lowercase().as_str() {
            "title" => raw.title = Some(value),
            "artist" => raw.artist = Some(value),
            "albumartist" | "album_artist" => raw.album_artist = Some(value),
            "album" => raw.album = Some(value),
            "genre" => raw.genre = Some(value),
            "track" | "tracknumber" => raw.track_number = parse_number(&value),
            "disc" | "discnumber" => raw.disc_number = parse_number(&value),
            _ => continue,
        }
        seen = true;
    }

    seen.then_some(raw)
}

impl MetadataExtractor for KeyValueExtractor {
    fn id(&self) -> &'static str {
        "key-value"
    }

    fn extract(&self, path: &Path) -> Result<Media> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);

        match parse_fields(&text) {
            Some(raw) => Ok(raw.into_media(path)),
            None => bail!("no metadata keys found in {}", path.display()),
        }
    }
}
