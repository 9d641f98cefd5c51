//! Media stores and the indexing pipeline.
//!
//! This module defines the `MediaStore` contract with its SQLite and
//! Tantivy implementations, plus the entry points used by the CLI and
//! the HTTP server: `run_index`, `run_prune` and `get_store_info`.

mod backend;
pub mod models;
pub mod pipeline;
mod sqlite;
mod tantivy;

pub use backend::{migrate, open_backend, open_store, MediaStore};
pub use models::{BatchReport, StoreMeta};
pub use pipeline::{run_pipeline, BatchWriter, Discovery, PipelineReport};
pub use sqlite::SqliteMediaStore;
pub use self::tantivy::TantivyMediaStore;

use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet};
use tracing::info;

use crate::extract::extractor_for_kind;
use crate::models::{
    FreshenWatermark, IndexConfig, IndexMode, IndexSummary, PruneSummary, StoreConfig, StoreKind,
    StoreSummary,
};

/// Run indexing for the given configuration using the configured backend.
///
/// This function is the core entry point used by the CLI and tests.
pub fn run_index(config: &IndexConfig) -> Result<IndexSummary> {
    ensure_library_root(&config.root)?;

    let mut store = open_store(&config.store, config.pipeline.batch_size)?;
    let summary = build_index(store.as_mut(), config)?;
    store.close()?;
    Ok(summary)
}

fn ensure_library_root(root: &Path) -> Result<()> {
    if !root.exists() {
        bail!("cannot scan a nonexistent path: {}", root.display());
    }
    Ok(())
}

/// Freshen watermark for `store`, or `None` when every file should be
/// considered.
fn freshen_since(store: &dyn MediaStore, config: &IndexConfig) -> Result<Option<SystemTime>> {
    if config.mode == IndexMode::Full || store.count()? == 0 {
        return Ok(None);
    }

    let since = match config.watermark {
        FreshenWatermark::ScanStart => match store.load_meta()?.last_scan_started_at {
            Some(secs) => Some(scan_start_watermark(secs)),
            None => store.last_modified()?,
        },
        FreshenWatermark::StoreMtime => store.last_modified()?,
    };
    Ok(since)
}

/// `secs` is the scan start floored to the second. The watermark sits just
/// below that second so freshen keeps files stamped within it.
fn scan_start_watermark(secs: u64) -> SystemTime {
    let start = UNIX_EPOCH + Duration::from_secs(secs);
    start
        .checked_sub(Duration::from_nanos(1))
        .unwrap_or(start)
}

/// Core indexing routine shared between the CLI, the search engine and
/// the HTTP server.
pub(crate) fn build_index(
    store: &mut dyn MediaStore,
    config: &IndexConfig,
) -> Result<IndexSummary> {
    ensure_library_root(&config.root)?;

    let canonical_root = config
        .root
        .canonicalize()
        .unwrap_or_else(|_| config.root.clone());

    let mut meta = store.load_meta()?;

    if config.force_rescan {
        info!(store = %store.location().display(), "clearing store for a full rescan");
        store.clear()?;
        meta.last_scan_started_at = None;
    }

    let since = freshen_since(store, config)?;
    let scan_started = current_epoch_seconds();
    let started = Instant::now();

    let discovery = Discovery::new(config, since)?;
    let extractor = extractor_for_kind(config.extractor);
    let report = run_pipeline(store, extractor, &discovery, &config.pipeline)?;

    meta.library_root = canonical_root.to_string_lossy().to_string();
    meta.last_scan_started_at = Some(scan_started);
    meta.updated_at = current_epoch_seconds();
    store.save_meta(&meta)?;

    let total_records = store.count()?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    info!(
        backend = store.kind().as_str(),
        discovered = report.files_discovered,
        indexed = report.writes.written,
        extraction_failures = report.extraction_failures,
        write_failures = report.writes.failures.len(),
        total = total_records,
        elapsed_ms,
        "indexing finished"
    );

    Ok(IndexSummary {
        backend: store.kind(),
        location: store.location().to_path_buf(),
        mode: config.mode,
        files_discovered: report.files_discovered,
        files_indexed: report.writes.written,
        extraction_failures: report.extraction_failures,
        write_failures: report.writes.failures,
        total_records,
        workers: report.workers,
        elapsed_ms,
        library_root: Some(meta.library_root),
    })
}

/// Delete records whose backing file no longer exists.
pub fn run_prune(config: &StoreConfig, batch_size: usize) -> Result<PruneSummary> {
    ensure_store_exists(config)?;
    let mut store = open_store(config, batch_size)?;
    let removed = store.remove_stale()?;
    let remaining = store.count()?;

    if removed > 0 {
        let mut meta = store.load_meta()?;
        meta.updated_at = current_epoch_seconds();
        store.save_meta(&meta)?;
    }

    info!(removed, remaining, "prune finished");

    let summary = PruneSummary {
        backend: store.kind(),
        location: store.location().to_path_buf(),
        removed,
        remaining,
    };
    store.close()?;
    Ok(summary)
}

fn ensure_store_exists(config: &StoreConfig) -> Result<()> {
    let location = &config.location;
    if !location.exists() {
        bail!("store not found at {}", location.display());
    }

    match config.backend {
        StoreKind::Sqlite if !location.is_file() => bail!(
            "sqlite backend requires the store path to be a file; got {}",
            location.display()
        ),
        StoreKind::Tantivy if !location.is_dir() => bail!(
            "tantivy backend requires the store path to be a directory; got {}",
            location.display()
        ),
        _ => Ok(()),
    }
}

/// Read-only helper to inspect an existing store without creating one.
pub fn get_store_info(config: &StoreConfig) -> Result<StoreSummary> {
    ensure_store_exists(config)?;

    let store = open_backend(config)?;
    let meta = store.load_meta()?;
    let records = store.count()?;

    let library_root = if meta.library_root.is_empty() {
        None
    } else {
        Some(meta.library_root.clone())
    };

    let summary = StoreSummary {
        backend: store.kind(),
        location: config.location.clone(),
        records,
        library_root,
        schema_version: Some(meta.schema_version),
        tool_version: Some(meta.tool_version),
        created_at: format_timestamp_iso8601(meta.created_at),
        updated_at: format_timestamp_iso8601(meta.updated_at),
        last_scan_started_at: meta.last_scan_started_at.and_then(format_timestamp_iso8601),
    };
    store.close()?;
    Ok(summary)
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = globset::GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(Some(builder.build()?))
}

pub(crate) fn current_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn format_timestamp_iso8601(secs: u64) -> Option<String> {
    use time::{format_description::well_known::Rfc3339, OffsetDateTime};

    let ts = secs as i64;
    let dt = OffsetDateTime::from_unix_timestamp(ts).ok()?;
    Some(dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string()))
}
