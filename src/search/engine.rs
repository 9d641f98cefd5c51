//! Core search and index entry points.
//!
//! These functions provide the "search as a function" API used by the
//! CLI and the HTTP server.

use anyhow::Result;
use tracing::info;

use crate::index::{build_index, open_store};
use crate::models::{
    IndexConfig, IndexSummary, PruneSummary, SearchConfig, SearchRequest, SearchResult,
    SearchSummary, StoreConfig, DEFAULT_BATCH_SIZE, SEARCH_RESULT_VERSION,
};

/// Execute a search based on the provided configuration.
///
/// When the store is empty and `index_if_empty` is set, the library is
/// indexed first so the very first search returns results.
pub fn run_search(config: SearchConfig) -> Result<SearchResult> {
    let batch_size = config
        .index_if_empty
        .as_ref()
        .map(|index| index.pipeline.batch_size)
        .unwrap_or(DEFAULT_BATCH_SIZE);

    let mut store = open_store(&config.store, batch_size)?;

    if let Some(index) = &config.index_if_empty {
        if store.count()? == 0 {
            info!(root = %index.root.display(), "store is empty; indexing library first");
            build_index(store.as_mut(), index)?;
        }
    }

    let request = if config.native_syntax {
        SearchRequest::new(&config.query)
    } else {
        SearchRequest::plan_only(&config.query)
    };

    let mut records = store.search(&request)?;
    let total_matches = records.len() as u64;
    let mut truncated = false;
    if let Some(limit) = config.limit {
        if records.len() > limit {
            records.truncate(limit);
            truncated = true;
        }
    }

    let backend = store.kind();
    store.close()?;

    Ok(SearchResult {
        version: SEARCH_RESULT_VERSION.to_string(),
        query: config.query,
        backend,
        plan: request.plan,
        records,
        summary: SearchSummary {
            total_matches,
            truncated,
        },
    })
}

/// Build or update a store based on the provided configuration.
pub fn run_index(config: &IndexConfig) -> Result<IndexSummary> {
    crate::index::run_index(config)
}

/// Remove records whose files have disappeared.
pub fn run_prune(config: &StoreConfig) -> Result<PruneSummary> {
    crate::index::run_prune(config, DEFAULT_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        default_extensions, ExtractorKind, FreshenWatermark, IndexMode, PipelineConfig, StoreKind,
    };
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_track(root: &Path, name: &str, body: &str) {
        fs::write(root.join(name), body).expect("write");
    }

    fn fixture_library(root: &Path) {
        write_track(
            root,
            "so_what.mp3",
            "title = So What\nartist = Miles Davis\nalbum = Kind of Blue\ngenre = Jazz\ntrack = 1\n",
        );
        write_track(
            root,
            "blue_train.flac",
            "title = Blue Train\nartist = John Coltrane\nalbum = Blue Train\ngenre = Jazz\ntrack = 1\n",
        );
        write_track(
            root,
            "freddie.mp3",
            "title = Freddie Freeloader\nartist = Miles Davis\nalbum = Kind of Blue\ngenre = Jazz\ntrack = 2\n",
        );
    }

    fn store(dir: &Path, backend: StoreKind) -> StoreConfig {
        StoreConfig {
            backend,
            location: dir.join(format!("library.{}", backend.as_str())),
        }
    }

    fn index_config(root: &Path, store: StoreConfig) -> IndexConfig {
        IndexConfig {
            root: root.to_path_buf(),
            mode: IndexMode::Full,
            force_rescan: false,
            store,
            extensions: default_extensions(),
            globs: Vec::new(),
            exclude_globs: Vec::new(),
            pipeline: PipelineConfig::default(),
            watermark: FreshenWatermark::ScanStart,
            extractor: ExtractorKind::KeyValue,
        }
    }

    fn search_config(query: &str, store: StoreConfig) -> SearchConfig {
        SearchConfig {
            query: query.to_string(),
            store,
            native_syntax: true,
            limit: None,
            index_if_empty: None,
        }
    }

    #[test]
    fn first_search_indexes_an_empty_store() {
        let lib = tempdir().expect("lib");
        let data = tempdir().expect("data");
        fixture_library(lib.path());

        for backend in [StoreKind::Sqlite, StoreKind::Tantivy] {
            let store = store(data.path(), backend);
            let mut config = search_config("@miles", store.clone());
            config.index_if_empty = Some(index_config(lib.path(), store));

            let result = run_search(config).expect("search");
            let titles: Vec<_> = result.records.iter().map(|m| m.title.as_str()).collect();
            assert_eq!(titles, vec!["So What", "Freddie Freeloader"], "{backend:?}");
            assert_eq!(result.version, SEARCH_RESULT_VERSION);
        }
    }

    #[test]
    fn search_without_index_if_empty_returns_nothing() {
        let data = tempdir().expect("data");
        let result =
            run_search(search_config("", store(data.path(), StoreKind::Sqlite))).expect("search");
        assert!(result.records.is_empty());
        assert_eq!(result.summary.total_matches, 0);
    }

    #[test]
    fn limit_truncates_and_reports_total() {
        let lib = tempdir().expect("lib");
        let data = tempdir().expect("data");
        fixture_library(lib.path());
        let store = store(data.path(), StoreKind::Sqlite);
        run_index(&index_config(lib.path(), store.clone())).expect("index");

        let mut config = search_config("", store);
        config.limit = Some(2);
        let result = run_search(config).expect("search");

        assert_eq!(result.records.len(), 2);
        assert_eq!(result.summary.total_matches, 3);
        assert!(result.summary.truncated);
    }

    #[test]
    fn native_syntax_can_be_disabled() {
        let lib = tempdir().expect("lib");
        let data = tempdir().expect("data");
        fixture_library(lib.path());
        let store = store(data.path(), StoreKind::Tantivy);
        run_index(&index_config(lib.path(), store.clone())).expect("index");

        // As a native query this is a field-scoped expression; as a plan
        // it is a literal generic term that matches nothing.
        let native = run_search(search_config("artist:coltrane", store.clone())).expect("native");
        assert_eq!(native.records.len(), 1);

        let mut config = search_config("artist:coltrane", store);
        config.native_syntax = false;
        let plan = run_search(config).expect("plan");
        assert!(plan.records.is_empty());
    }

    #[test]
    fn prune_through_engine() {
        let lib = tempdir().expect("lib");
        let data = tempdir().expect("data");
        fixture_library(lib.path());
        let store = store(data.path(), StoreKind::Sqlite);
        run_index(&index_config(lib.path(), store.clone())).expect("index");

        fs::remove_file(lib.path().join("freddie.mp3")).expect("remove");
        let summary = run_prune(&store).expect("prune");
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.remaining, 2);
    }
}
