//! Shared data models for media records, query plans, store and pipeline
//! configuration, and the summaries returned by the engine.
//!
//! These types form the stable JSON API surface used by the CLI and the
//! HTTP server.

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Schema version for `SearchResult` JSON payloads.
///
/// MAJOR bumps for breaking field changes, MINOR for new optional
/// fields, PATCH for documentation-only changes.
pub const SEARCH_RESULT_VERSION: &str = "1.0.0";

/// Default number of records handed to a store per write batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default capacity of each bounded queue between pipeline stages.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A single media file and its tag metadata.
///
/// `path` is the identity of a record: writing a record whose path is
/// already stored replaces the stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub title: String,
    pub artist: String,
    pub album: String,
    #[serde(rename = "tracknumber")]
    pub track_number: u32,
    #[serde(rename = "discnumber")]
    pub disc_number: u32,
    pub genre: String,
    pub path: PathBuf,
}

impl Media {
    /// Playback ordering: artist, album, disc, track, then path so that
    /// ties resolve the same way on every backend.
    ///
    /// Paths compare as raw strings, matching SQLite's binary collation.
    pub fn playback_cmp(&self, other: &Media) -> Ordering {
        self.artist
            .cmp(&other.artist)
            .then_with(|| self.album.cmp(&other.album))
            .then_with(|| self.disc_number.cmp(&other.disc_number))
            .then_with(|| self.track_number.cmp(&other.track_number))
            .then_with(|| self.path.as_os_str().cmp(other.path.as_os_str()))
    }
}

/// Sort records into playback order in place.
pub fn sort_for_playback(records: &mut [Media]) {
    records.sort_by(Media::playback_cmp);
}

/// Field targeted by a query term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSelector {
    Genre,
    Artist,
    Album,
    Title,
    /// Artist OR album OR title.
    Any,
}

impl FieldSelector {
    /// Classify a trimmed query piece by its leading sigil.
    ///
    /// Returns the selector together with the (untrimmed) remainder.
    pub fn from_sigil(piece: &str) -> (FieldSelector, &str) {
        let mut chars = piece.chars();
        let selector = match chars.next() {
            Some('!') => FieldSelector::Genre,
            Some('@') => FieldSelector::Artist,
            Some('#') => FieldSelector::Album,
            Some('$') => FieldSelector::Title,
            _ => return (FieldSelector::Any, piece),
        };
        (selector, chars.as_str())
    }
}

/// All texts typed for one selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub selector: FieldSelector,
    pub texts: Vec<String>,
}

/// Backend-neutral conjunction of field groups.
///
/// Texts inside a `Genre`/`Artist`/`Album`/`Title` group are alternatives
/// (OR). Groups are combined with AND. Every text of an `Any` group is
/// its own AND-ed clause that matches artist, album or title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub groups: Vec<FieldGroup>,
}

impl QueryPlan {
    /// Whether this is the trivial match-everything plan.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A compiled search handed to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Compiled plan; every backend can answer it.
    pub plan: QueryPlan,
    /// Raw text for backends with a native query syntax. Only set when
    /// the input used neither sigils nor separators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
}

impl SearchRequest {
    /// A request matching every stored record.
    pub fn all() -> Self {
        Self {
            plan: QueryPlan::default(),
            native: None,
        }
    }
}

/// Store backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Single-file SQLite database with substring matching.
    Sqlite,
    /// Tantivy index directory with tokenized matching.
    Tantivy,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreKind::Sqlite => "sqlite",
            StoreKind::Tantivy => "tantivy",
        }
    }

    /// The backend a user would be switching from.
    pub fn other(self) -> StoreKind {
        match self {
            StoreKind::Sqlite => StoreKind::Tantivy,
            StoreKind::Tantivy => StoreKind::Sqlite,
        }
    }

    /// File extension used for this backend's on-disk location.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

/// Where and how a store is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreKind,
    /// Database file (SQLite) or index directory (Tantivy).
    pub location: PathBuf,
}

impl StoreConfig {
    /// Configuration of the other backend stored next to this one.
    ///
    /// `library.sqlite` pairs with `library.tantivy` and vice versa.
    pub fn sibling(&self) -> StoreConfig {
        let backend = self.backend.other();
        StoreConfig {
            backend,
            location: self.location.with_extension(backend.extension()),
        }
    }
}

/// Which files an indexing run considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Every supported file under the root.
    Full,
    /// Only files modified after the store's watermark.
    Freshen,
}

/// Reference time used by freshen runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreshenWatermark {
    /// Start time of the last completed scan, recorded in store metadata.
    #[default]
    ScanStart,
    /// Modification time of the store's files on disk.
    StoreMtime,
}

/// Metadata extractor used by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorKind {
    /// Audio tags read with `lofty`.
    #[default]
    Tags,
    /// `key = value` lines read from the file itself.
    KeyValue,
}

/// Tuning for the discovery → extraction → writer pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Force a single extraction worker.
    #[serde(default)]
    pub serial: bool,
    /// Explicit worker count; defaults to available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            serial: false,
            workers: None,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Number of extraction workers to start.
    pub fn worker_count(&self) -> usize {
        if self.serial {
            return 1;
        }
        self.workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

/// Configuration for building or updating a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Library root to walk.
    pub root: PathBuf,
    pub mode: IndexMode,
    /// Clear the store before a full run.
    #[serde(default)]
    pub force_rescan: bool,
    pub store: StoreConfig,
    /// Lowercase file extensions (without dots) considered media.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Inclusion globs applied to candidate files.
    #[serde(default)]
    pub globs: Vec<String>,
    /// Exclusion globs applied to candidate files.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub watermark: FreshenWatermark,
    #[serde(default)]
    pub extractor: ExtractorKind,
}

/// Default media extensions as owned strings.
pub fn default_extensions() -> Vec<String> {
    crate::extract::DEFAULT_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

/// A record that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of an indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub backend: StoreKind,
    pub location: PathBuf,
    pub mode: IndexMode,
    /// Files yielded by discovery.
    pub files_discovered: u64,
    /// Records successfully written.
    pub files_indexed: u64,
    /// Files the extractor rejected.
    pub extraction_failures: u64,
    /// Records the store rejected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_failures: Vec<WriteFailure>,
    /// Records in the store after the run.
    pub total_records: u64,
    /// Extraction workers used.
    pub workers: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_root: Option<String>,
}

/// Summary of a prune run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneSummary {
    pub backend: StoreKind,
    pub location: PathBuf,
    pub removed: u64,
    pub remaining: u64,
}

/// Read-only description of an existing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSummary {
    pub backend: StoreKind,
    pub location: PathBuf,
    pub records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    /// RFC 3339 creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// RFC 3339 timestamp of the last indexing run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// RFC 3339 start time of the last completed scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_scan_started_at: Option<String>,
}

/// Configuration for a search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Raw query string in the sigil DSL.
    pub query: String,
    pub store: StoreConfig,
    /// Pass sigil-free queries to the backend's native syntax.
    #[serde(default = "default_native_syntax")]
    pub native_syntax: bool,
    /// Maximum number of records to return.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Index this library first when the store is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_if_empty: Option<IndexConfig>,
}

fn default_native_syntax() -> bool {
    true
}

/// Aggregate information about a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    /// Records matched before `limit` was applied.
    pub total_matches: u64,
    pub truncated: bool,
}

/// Result of a search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub version: String,
    pub query: String,
    pub backend: StoreKind,
    pub plan: QueryPlan,
    pub records: Vec<Media>,
    pub summary: SearchSummary,
}
