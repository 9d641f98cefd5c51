//! Discovery → extraction → batched write pipeline.
//!
//! One thread walks the library and feeds candidate paths into a
//! bounded channel. A pool of workers turns paths into records through
//! the configured `MetadataExtractor` and sends them into a second
//! bounded channel. The calling thread drains that channel into the
//! store in fixed-size batches. Both channels are bounded, so a slow
//! store stalls extraction and a slow extractor stalls discovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::{anyhow, Result};
use crossbeam_channel::bounded;
use globset::GlobSet;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::extract::{has_media_extension, MetadataExtractor};
use crate::index::backend::MediaStore;
use crate::index::build_globset;
use crate::index::models::BatchReport;
use crate::models::{IndexConfig, Media, PipelineConfig};

/// Which files under a library root are handed to extraction.
pub struct Discovery {
    root: PathBuf,
    extensions: Vec<String>,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    since: Option<SystemTime>,
}

impl Discovery {
    /// Build discovery rules from an index configuration.
    ///
    /// `since` is the freshen watermark: when set, only files modified
    /// strictly after it are yielded.
    pub fn new(config: &IndexConfig, since: Option<SystemTime>) -> Result<Self> {
        Ok(Self {
            root: config.root.clone(),
            extensions: config.extensions.clone(),
            include: build_globset(&config.globs)?,
            exclude: build_globset(&config.exclude_globs)?,
            since,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, path: &Path) -> bool {
        if !has_media_extension(path, &self.extensions) {
            return false;
        }
        if let Some(set) = &self.include {
            if !set.is_match(path) {
                return false;
            }
        }
        if let Some(set) = &self.exclude {
            if set.is_match(path) {
                return false;
            }
        }
        true
    }

    fn modified_after_watermark(&self, path: &Path) -> bool {
        let Some(since) = self.since else {
            return true;
        };
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified > since,
            Err(_) => false,
        }
    }

    /// Walk the root, calling `emit` for every accepted file.
    ///
    /// Stops early when `emit` returns false. Returns the number of
    /// files emitted.
    pub fn walk<F>(&self, mut emit: F) -> u64
    where
        F: FnMut(PathBuf) -> bool,
    {
        let walker = WalkBuilder::new(&self.root).standard_filters(false).build();
        let mut emitted: u64 = 0;

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if !self.accepts(path) || !self.modified_after_watermark(path) {
                continue;
            }

            emitted += 1;
            if !emit(path.to_path_buf()) {
                break;
            }
        }

        emitted
    }
}

/// Accumulates records and writes them to a store in batches.
///
/// A batch the store rejects as a whole is reported as a failure for
/// each of its records; writing continues with the next batch.
pub struct BatchWriter<'a> {
    store: &'a mut dyn MediaStore,
    batch_size: usize,
    pending: Vec<Media>,
    report: BatchReport,
}

impl<'a> BatchWriter<'a> {
    pub fn new(store: &'a mut dyn MediaStore, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            report: BatchReport::default(),
        }
    }

    pub fn push(&mut self, record: Media) {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.pending);
        match self.store.index_batch(&batch) {
            Ok(report) => self.report.merge(report),
            Err(err) => {
                warn!(records = batch.len(), error = %err, "batch write failed");
                let message = format!("{err:#}");
                self.report
                    .merge(BatchReport::all_failed(batch.into_iter().map(|m| m.path), &message));
            }
        }
        self.pending.reserve(self.batch_size);
    }

    /// Write any remaining records and return the combined report.
    pub fn finish(mut self) -> BatchReport {
        self.flush();
        self.report
    }
}

/// Counts gathered by one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub files_discovered: u64,
    pub extraction_failures: u64,
    pub workers: usize,
    pub writes: BatchReport,
}

/// Run discovery, extraction and batched writes to completion.
pub fn run_pipeline(
    store: &mut dyn MediaStore,
    extractor: &dyn MetadataExtractor,
    discovery: &Discovery,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    let workers = config.worker_count();
    let capacity = config.queue_capacity.max(1);
    let extraction_failures = AtomicU64::new(0);
    let failures = &extraction_failures;

    let (files_discovered, writes) = std::thread::scope(|s| {
        let (path_tx, path_rx) = bounded::<PathBuf>(capacity);
        let (record_tx, record_rx) = bounded::<Media>(capacity);

        let discoverer = s.spawn(move || discovery.walk(|path| path_tx.send(path).is_ok()));

        for _ in 0..workers {
            let path_rx = path_rx.clone();
            let record_tx = record_tx.clone();
            s.spawn(move || {
                for path in path_rx.iter() {
                    match extractor.extract(&path) {
                        Ok(media) => {
                            if record_tx.send(media).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            debug!(
                                path = %path.display(),
                                error = %err,
                                "metadata extraction failed"
                            );
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }

        // Only the workers may hold these, so the record channel
        // disconnects once the last worker exits.
        drop(path_rx);
        drop(record_tx);

        let mut writer = BatchWriter::new(store, config.batch_size);
        for record in record_rx.iter() {
            writer.push(record);
        }
        let writes = writer.finish();

        let discovered = discoverer
            .join()
            .map_err(|_| anyhow!("discovery thread panicked"))?;
        Ok::<_, anyhow::Error>((discovered, writes))
    })?;

    Ok(PipelineReport {
        files_discovered,
        extraction_failures: extraction_failures.load(Ordering::Relaxed),
        workers,
        writes,
    })
}
