use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::cli::config::{default_library_root, default_store_location, expand_tilde};
use crate::models::{
    default_extensions, ExtractorKind, FreshenWatermark, IndexConfig, IndexMode, PipelineConfig,
    SearchConfig, StoreConfig, StoreKind, DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY,
};

/// Top-level CLI entrypoint for `tunegrep`.
#[derive(Parser, Debug)]
#[command(
    name = "tunegrep",
    about = "Index a music library and query it with a sigil DSL",
    version,
    subcommand_required = false,
    arg_required_else_help = false
)]
pub struct Cli {
    /// Enable debug logging on stderr (overridden by `TUNEGREP_LOG`).
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Query the library (`!genre`, `@artist`, `#album`, `$title`).
    Search(SearchArgs),
    /// Build or update the store from the library.
    Index(IndexArgs),
    /// Remove records whose files no longer exist.
    Prune(PruneArgs),
    /// Inspect an existing store without modifying it.
    Info(InfoArgs),
    /// Run a long-lived HTTP+JSON server.
    Serve(ServeArgs),
    /// Print the query syntax guide.
    Syntax,
}

/// CLI representation of the store backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendArg {
    Sqlite,
    Tantivy,
}

impl StoreBackendArg {
    pub fn to_model(self) -> StoreKind {
        match self {
            StoreBackendArg::Sqlite => StoreKind::Sqlite,
            StoreBackendArg::Tantivy => StoreKind::Tantivy,
        }
    }
}

/// CLI representation of output format.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Table,
    Json,
}

/// CLI representation of the freshen watermark.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkArg {
    ScanStart,
    StoreMtime,
}

impl WatermarkArg {
    pub fn to_model(self) -> FreshenWatermark {
        match self {
            WatermarkArg::ScanStart => FreshenWatermark::ScanStart,
            WatermarkArg::StoreMtime => FreshenWatermark::StoreMtime,
        }
    }
}

/// CLI representation of the metadata extractor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractorArg {
    Tags,
    KeyValue,
}

impl ExtractorArg {
    pub fn to_model(self) -> ExtractorKind {
        match self {
            ExtractorArg::Tags => ExtractorKind::Tags,
            ExtractorArg::KeyValue => ExtractorKind::KeyValue,
        }
    }
}

/// Where the store lives.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Store backend.
    ///
    /// When omitted, the backend is inferred from the `--store-path`
    /// extension (`.tantivy` selects tantivy) and defaults to sqlite.
    #[arg(long = "backend", value_enum, env = "TUNEGREP_BACKEND")]
    pub backend: Option<StoreBackendArg>,

    /// SQLite database file or Tantivy index directory.
    ///
    /// Defaults to `library.<backend>` in the user data directory.
    #[arg(long = "store-path", env = "TUNEGREP_STORE")]
    pub store_path: Option<PathBuf>,
}

/// Which library to scan and how to read it.
#[derive(Args, Debug, Clone)]
pub struct LibraryArgs {
    /// Library root (defaults to the user's music directory).
    #[arg(short = 'l', long = "library", env = "TUNEGREP_LIBRARY")]
    pub library: Option<PathBuf>,

    /// Media file extensions, comma-separated or repeated.
    #[arg(long = "ext", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Inclusion globs applied to candidate files.
    #[arg(long = "glob")]
    pub globs: Vec<String>,

    /// Exclusion globs applied to candidate files.
    #[arg(long = "exclude")]
    pub exclude_globs: Vec<String>,

    /// Metadata extractor.
    #[arg(long = "extractor", value_enum, default_value_t = ExtractorArg::Tags, hide = true)]
    pub extractor: ExtractorArg,
}

/// Indexing pipeline tuning.
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Extract metadata on a single worker thread.
    #[arg(long = "serial")]
    pub serial: bool,

    /// Number of extraction workers (defaults to available parallelism).
    #[arg(long = "workers")]
    pub workers: Option<usize>,

    /// Records written per store batch.
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,

    /// Capacity of each queue between pipeline stages.
    #[arg(long = "queue-capacity", hide = true)]
    pub queue_capacity: Option<usize>,
}

/// Arguments specific to the `search` subcommand.
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query in the sigil DSL; several words are joined with spaces.
    ///
    /// An empty query matches every record.
    pub query: Vec<String>,

    /// Output format (text, table, or json).
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Include file paths in the output.
    #[arg(long = "show-paths")]
    pub show_paths: bool,

    /// JSON indentation width; 0 prints compact JSON.
    #[arg(long = "indent", default_value_t = 2)]
    pub indent: usize,

    /// Emit the flat record list instead of the artist/album hierarchy
    /// with `--format json`.
    #[arg(long = "flat")]
    pub flat: bool,

    /// Maximum number of records to return.
    #[arg(long = "limit")]
    pub limit: Option<usize>,

    /// Never pass sigil-free queries to the tantivy query parser.
    #[arg(long = "no-native")]
    pub no_native: bool,

    /// Do not index the library when the store is empty.
    #[arg(long = "no-auto-index")]
    pub no_auto_index: bool,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub library: LibraryArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Arguments specific to the `index` subcommand.
#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Only index files modified since the last scan.
    #[arg(long = "freshen", conflicts_with = "force_rescan")]
    pub freshen: bool,

    /// Clear the store and index everything again.
    #[arg(long = "force-rescan")]
    pub force_rescan: bool,

    /// Remove records for deleted files after indexing.
    #[arg(long = "prune")]
    pub prune: bool,

    /// Reference time for `--freshen`.
    #[arg(long = "watermark", value_enum)]
    pub watermark: Option<WatermarkArg>,

    /// Output format (text or json).
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub library: LibraryArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Arguments specific to the `prune` subcommand.
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Output format (text or json).
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments specific to the `info` subcommand.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Output format (text or json).
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub store: StoreArgs,
}

/// Arguments specific to the `serve` subcommand.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to, e.g. "127.0.0.1:7878".
    #[arg(long = "addr", default_value = "127.0.0.1:7878")]
    pub addr: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub library: LibraryArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Resolve the backend and location of the store.
pub fn store_config_from_args(args: &StoreArgs) -> StoreConfig {
    let inferred = args.store_path.as_ref().and_then(|path| {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("tantivy") {
            Some(StoreBackendArg::Tantivy)
        } else if ext.eq_ignore_ascii_case("sqlite") {
            Some(StoreBackendArg::Sqlite)
        } else {
            None
        }
    });

    let backend = args
        .backend
        .or(inferred)
        .unwrap_or(StoreBackendArg::Sqlite)
        .to_model();

    let location = match &args.store_path {
        Some(path) => expand_tilde(path),
        None => default_store_location(backend),
    };

    StoreConfig { backend, location }
}

pub fn pipeline_config_from_args(args: &PipelineArgs) -> Result<PipelineConfig> {
    if args.workers == Some(0) {
        bail!("--workers must be at least 1");
    }
    if args.batch_size == Some(0) {
        bail!("--batch-size must be at least 1");
    }

    Ok(PipelineConfig {
        serial: args.serial,
        workers: args.workers,
        batch_size: args.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        queue_capacity: args.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1),
    })
}

fn library_index_config(
    library: &LibraryArgs,
    store: StoreConfig,
    pipeline: PipelineConfig,
    mode: IndexMode,
) -> IndexConfig {
    let root = match &library.library {
        Some(path) => expand_tilde(path),
        None => default_library_root(),
    };

    let extensions = if library.extensions.is_empty() {
        default_extensions()
    } else {
        library
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    };

    IndexConfig {
        root,
        mode,
        force_rescan: false,
        store,
        extensions,
        globs: library.globs.clone(),
        exclude_globs: library.exclude_globs.clone(),
        pipeline,
        watermark: FreshenWatermark::default(),
        extractor: library.extractor.to_model(),
    }
}

/// Build a core `IndexConfig` from CLI `IndexArgs`.
pub fn index_config_from_args(args: &IndexArgs) -> Result<IndexConfig> {
    let mode = if args.freshen {
        IndexMode::Freshen
    } else {
        IndexMode::Full
    };

    let mut config = library_index_config(
        &args.library,
        store_config_from_args(&args.store),
        pipeline_config_from_args(&args.pipeline)?,
        mode,
    );
    config.force_rescan = args.force_rescan;
    if let Some(watermark) = args.watermark {
        config.watermark = watermark.to_model();
    }
    Ok(config)
}

/// Build the library configuration the server uses for `/v1/index`.
pub fn serve_index_config_from_args(args: &ServeArgs) -> Result<IndexConfig> {
    Ok(library_index_config(
        &args.library,
        store_config_from_args(&args.store),
        pipeline_config_from_args(&args.pipeline)?,
        IndexMode::Full,
    ))
}

/// Build a core `SearchConfig` from CLI `SearchArgs`.
pub fn search_config_from_args(args: &SearchArgs) -> Result<SearchConfig> {
    let store = store_config_from_args(&args.store);

    let index_if_empty = if args.no_auto_index {
        None
    } else {
        let index = library_index_config(
            &args.library,
            store.clone(),
            pipeline_config_from_args(&args.pipeline)?,
            IndexMode::Full,
        );
        if index.root.exists() {
            Some(index)
        } else {
            tracing::debug!(
                root = %index.root.display(),
                "library root missing; auto-index disabled"
            );
            None
        }
    };

    Ok(SearchConfig {
        query: args.query.join(" "),
        store,
        native_syntax: !args.no_native,
        limit: args.limit,
        index_if_empty,
    })
}
