//! Media store abstraction and helpers.
//!
//! The `MediaStore` trait is the single contract the indexing pipeline
//! and the search engine depend on. Two implementations exist: a SQLite
//! database answering substring matches and a Tantivy index answering
//! tokenized full-text matches.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::index::models::{BatchReport, StoreMeta};
use crate::index::pipeline::BatchWriter;
use crate::models::{Media, SearchRequest, StoreConfig, StoreKind};

/// Pluggable media store used by the pipeline and the search engine.
pub trait MediaStore: Send {
    /// Kind of backend implementation.
    fn kind(&self) -> StoreKind;

    /// Database file or index directory backing this store.
    fn location(&self) -> &Path;

    /// Load store metadata, or fresh metadata when none was saved yet.
    fn load_meta(&self) -> Result<StoreMeta>;

    /// Persist store metadata.
    fn save_meta(&mut self, meta: &StoreMeta) -> Result<()>;

    /// Upsert a batch of records keyed by path.
    ///
    /// Per-record failures are reported in the returned `BatchReport`;
    /// an `Err` means nothing in the batch was committed.
    fn index_batch(&mut self, records: &[Media]) -> Result<BatchReport>;

    /// Number of stored records.
    fn count(&self) -> Result<u64>;

    /// Records matching the request, in playback order.
    fn search(&self, request: &SearchRequest) -> Result<Vec<Media>>;

    /// Every stored path.
    fn all_paths(&self) -> Result<Vec<PathBuf>>;

    /// Delete the records with the given paths in one batch.
    ///
    /// Returns the number of records removed.
    fn remove_paths(&mut self, paths: &[PathBuf]) -> Result<u64>;

    /// Delete every record. Metadata is kept.
    fn clear(&mut self) -> Result<()>;

    /// Latest modification time of the store's files on disk.
    fn last_modified(&self) -> Result<Option<SystemTime>>;

    /// Flush and release the store.
    fn close(self: Box<Self>) -> Result<()>;

    /// Delete records whose file no longer exists.
    fn remove_stale(&mut self) -> Result<u64> {
        let missing: Vec<PathBuf> = self
            .all_paths()?
            .into_iter()
            .filter(|path| !path.exists())
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        self.remove_paths(&missing)
    }
}

/// Construct the backend selected by `config`, creating it if needed.
pub fn open_backend(config: &StoreConfig) -> Result<Box<dyn MediaStore>> {
    match config.backend {
        StoreKind::Sqlite => Ok(Box::new(crate::index::SqliteMediaStore::open(
            &config.location,
        )?)),
        StoreKind::Tantivy => Ok(Box::new(crate::index::TantivyMediaStore::open(
            &config.location,
        )?)),
    }
}

/// Open the configured store, importing the sibling backend's records
/// when the configured store is created by this call and the sibling has
/// some.
///
/// An existing store is never re-populated, so records pruned from it
/// stay gone.
pub fn open_store(config: &StoreConfig, batch_size: usize) -> Result<Box<dyn MediaStore>> {
    let created = !config.location.exists();
    let mut store = open_backend(config).with_context(|| {
        format!(
            "failed to open {} store at {}",
            config.backend.as_str(),
            config.location.display()
        )
    })?;

    if !created || store.count()? > 0 {
        return Ok(store);
    }

    let sibling = config.sibling();
    if !sibling.location.exists() {
        return Ok(store);
    }

    let source = open_backend(&sibling).with_context(|| {
        format!(
            "failed to open {} store at {} for import",
            sibling.backend.as_str(),
            sibling.location.display()
        )
    })?;

    if source.count()? == 0 {
        source.close()?;
        return Ok(store);
    }

    info!(
        from = %sibling.location.display(),
        to = %config.location.display(),
        "importing records from {} store",
        sibling.backend.as_str()
    );
    let imported = migrate(source.as_ref(), store.as_mut(), batch_size)?;

    let mut meta = store.load_meta()?;
    let source_meta = source.load_meta()?;
    if meta.library_root.is_empty() {
        meta.library_root = source_meta.library_root;
    }
    meta.last_scan_started_at = source_meta.last_scan_started_at;
    meta.updated_at = crate::index::current_epoch_seconds();
    store.save_meta(&meta)?;
    source.close()?;

    info!(imported, "import finished");
    Ok(store)
}

/// Copy every record of `from` into `to`.
///
/// Returns the number of records written.
pub fn migrate(from: &dyn MediaStore, to: &mut dyn MediaStore, batch_size: usize) -> Result<u64> {
    let records = from.search(&SearchRequest::all())?;
    let mut writer = BatchWriter::new(to, batch_size);
    for record in records {
        writer.push(record);
    }
    let report = writer.finish();

    for failure in &report.failures {
        warn!(path = %failure.path.display(), error = %failure.error, "record not imported");
    }

    Ok(report.written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::query::compile;
    use crate::models::SearchRequest;
    use std::fs;
    use tempfile::tempdir;

    fn media(title: &str, artist: &str, album: &str, genre: &str, path: &Path) -> Media {
        Media {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            track_number: 1,
            disc_number: 1,
            genre: genre.to_string(),
            path: path.to_path_buf(),
        }
    }

    fn library(dir: &Path) -> Vec<Media> {
        vec![
            media("So What", "Miles Davis", "Kind of Blue", "Jazz", &dir.join("so_what.mp3")),
            media("Blue Train", "John Coltrane", "Blue Train", "Jazz", &dir.join("blue_train.mp3")),
        ]
    }

    fn both_stores(dir: &Path) -> Vec<Box<dyn MediaStore>> {
        vec![
            open_backend(&StoreConfig {
                backend: StoreKind::Sqlite,
                location: dir.join("library.sqlite"),
            })
            .expect("sqlite"),
            open_backend(&StoreConfig {
                backend: StoreKind::Tantivy,
                location: dir.join("library.tantivy"),
            })
            .expect("tantivy"),
        ]
    }

    fn titles(store: &dyn MediaStore, query: &str) -> Vec<String> {
        let request = SearchRequest {
            plan: compile(query),
            native: None,
        };
        store
            .search(&request)
            .expect("search")
            .into_iter()
            .map(|m| m.title)
            .collect()
    }

    #[test]
    fn backends_agree_on_end_to_end_queries() {
        let dir = tempdir().expect("tempdir");
        for mut store in both_stores(dir.path()) {
            store.index_batch(&library(dir.path())).expect("index");

            assert_eq!(
                titles(store.as_ref(), "@miles, @coltrane"),
                vec!["Blue Train", "So What"],
                "{:?}",
                store.kind()
            );
            assert!(titles(store.as_ref(), "@miles, #blue train").is_empty());
            assert_eq!(titles(store.as_ref(), "!jazz, @miles"), vec!["So What"]);
            assert_eq!(titles(store.as_ref(), "").len(), 2);
        }
    }

    #[test]
    fn any_terms_match_across_fields() {
        let dir = tempdir().expect("tempdir");
        for mut store in both_stores(dir.path()) {
            store.index_batch(&library(dir.path())).expect("index");

            // "blue" is in both albums; "train" narrows to Coltrane.
            assert_eq!(titles(store.as_ref(), "blue").len(), 2);
            assert_eq!(titles(store.as_ref(), "blue, train"), vec!["Blue Train"]);
        }
    }

    #[test]
    fn backends_break_ties_in_the_same_order() {
        let dir = tempdir().expect("tempdir");
        let nested = media("Nested", "x", "y", "Jazz", &dir.path().join("b").join("c.mp3"));
        let dashed = media("Dashed", "x", "y", "Jazz", &dir.path().join("b-c.mp3"));

        for mut store in both_stores(dir.path()) {
            store
                .index_batch(&[nested.clone(), dashed.clone()])
                .expect("index");
            assert_eq!(
                titles(store.as_ref(), "@x"),
                vec!["Dashed", "Nested"],
                "{:?}",
                store.kind()
            );
        }
    }

    #[test]
    fn upserting_the_same_path_replaces_the_record() {
        let dir = tempdir().expect("tempdir");
        for mut store in both_stores(dir.path()) {
            let mut records = library(dir.path());
            store.index_batch(&records).expect("first");

            records[0].title = "So What (Live)".to_string();
            store.index_batch(&records).expect("second");

            assert_eq!(store.count().expect("count"), 2);
            assert_eq!(titles(store.as_ref(), "$live"), vec!["So What (Live)"]);
        }
    }

    #[test]
    fn remove_stale_deletes_only_missing_files() {
        let dir = tempdir().expect("tempdir");
        let records = library(dir.path());
        fs::write(&records[0].path, b"").expect("write");

        for mut store in both_stores(dir.path()) {
            store.index_batch(&records).expect("index");

            assert_eq!(store.remove_stale().expect("prune"), 1);
            assert_eq!(store.all_paths().expect("paths"), vec![records[0].path.clone()]);
            assert_eq!(store.remove_stale().expect("prune again"), 0);
        }
    }

    #[test]
    fn clear_empties_the_store() {
        let dir = tempdir().expect("tempdir");
        for mut store in both_stores(dir.path()) {
            store.index_batch(&library(dir.path())).expect("index");
            store.clear().expect("clear");
            assert_eq!(store.count().expect("count"), 0);
        }
    }

    #[test]
    fn open_store_imports_from_populated_sibling() {
        let dir = tempdir().expect("tempdir");
        let sqlite = StoreConfig {
            backend: StoreKind::Sqlite,
            location: dir.path().join("library.sqlite"),
        };

        let mut source = open_backend(&sqlite).expect("sqlite");
        source.index_batch(&library(dir.path())).expect("index");
        source.close().expect("close");

        let store = open_store(&sqlite.sibling(), 1).expect("open tantivy");
        assert_eq!(store.kind(), StoreKind::Tantivy);
        assert_eq!(store.count().expect("count"), 2);
        assert_eq!(titles(store.as_ref(), "@coltrane"), vec!["Blue Train"]);
    }

    #[test]
    fn pruned_store_is_not_repopulated_from_sibling() {
        let dir = tempdir().expect("tempdir");
        let sqlite = StoreConfig {
            backend: StoreKind::Sqlite,
            location: dir.path().join("library.sqlite"),
        };

        let mut source = open_backend(&sqlite).expect("sqlite");
        source.index_batch(&library(dir.path())).expect("index");
        source.close().expect("close");

        // None of the library files exist, so pruning empties the store.
        let mut store = open_store(&sqlite.sibling(), 500).expect("import");
        assert_eq!(store.count().expect("count"), 2);
        assert_eq!(store.remove_stale().expect("prune"), 2);
        store.close().expect("close");

        let reopened = open_store(&sqlite.sibling(), 500).expect("reopen");
        assert_eq!(reopened.count().expect("count"), 0);
    }

    #[test]
    fn open_store_skips_import_when_sibling_is_absent() {
        let dir = tempdir().expect("tempdir");
        let config = StoreConfig {
            backend: StoreKind::Tantivy,
            location: dir.path().join("library.tantivy"),
        };

        let store = open_store(&config, 500).expect("open");
        assert_eq!(store.count().expect("count"), 0);
        assert!(!dir.path().join("library.sqlite").exists());
    }
}
