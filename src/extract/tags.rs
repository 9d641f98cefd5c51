//! Audio tag extractor backed by `lofty`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lofty::file::TaggedFileExt;
use lofty::tag::{Accessor, ItemKey};

use super::{MetadataExtractor, RawFields};
use crate::models::Media;

/// Reads ID3, MP4, Vorbis comment and other tag formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagExtractor;

impl MetadataExtractor for TagExtractor {
    fn id(&self) -> &'static str {
        "tags"
    }

    fn extract(&self, path: &Path) -> Result<Media> {
        let tagged = lofty::read_from_path(path)
            .with_context(|| format!("failed to read tags from {}", path.display()))?;

        let tag = tagged
            .primary_tag()
            .or_else(|| tagged.first_tag())
            .ok_or_else(|| anyhow!("no tags found in {}", path.display()))?;

        let raw = RawFields {
            title: tag.title().map(|s| s.into_owned()),
            artist: tag.artist().map(|s| s.into_owned()),
            album_artist: tag.get_string(&ItemKey::AlbumArtist).map(str::to_string),
            album: tag.album().map(|s| s.into_owned()),
            genre: tag.genre().map(|s| s.into_owned()),
            track_number: tag.track(),
            disc_number: tag.disk(),
        };

        Ok(raw.into_media(path))
    }
}
