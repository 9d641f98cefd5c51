use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::Deserialize;

use crate::cli::args::{ExtractorArg, OutputFormat, StoreBackendArg, WatermarkArg};
use crate::cli::{
    IndexArgs, InfoArgs, LibraryArgs, PipelineArgs, PruneArgs, SearchArgs, ServeArgs, StoreArgs,
};
use crate::models::StoreKind;

/// Top-level representation of `.tunegrep/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub store: Option<StoreSection>,

    #[serde(default)]
    pub library: Option<LibrarySection>,

    #[serde(default)]
    pub index: Option<IndexSection>,

    #[serde(default)]
    pub search: Option<SearchSection>,

    #[serde(default)]
    pub serve: Option<ServeSection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: Option<StoreBackendArg>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LibrarySection {
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub globs: Vec<String>,
    #[serde(default, alias = "exclude")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub extractor: Option<ExtractorArg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexSection {
    #[serde(default)]
    pub serial: Option<bool>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub watermark: Option<WatermarkArg>,
    #[serde(default)]
    pub prune: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchSection {
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub show_paths: Option<bool>,
    #[serde(default)]
    pub indent: Option<usize>,
    #[serde(default)]
    pub native_syntax: Option<bool>,
    #[serde(default)]
    pub auto_index: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServeSection {
    #[serde(default)]
    pub addr: Option<String>,
}

/// Discover and load a project-local `.tunegrep/config.toml` starting
/// from the current working directory and walking up parent directories.
pub fn load_cli_config() -> Result<Option<CliConfig>> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let Some(path) = find_project_config(&cwd) else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: CliConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse TOML config at {}", path.display()))?;

    Ok(Some(config))
}

fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".tunegrep").join("config.toml"))
        .find(|candidate| candidate.is_file())
}

/// Replace a leading `~` with the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match UserDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// The user's music directory, or `~/Music` when the platform has none.
pub fn default_library_root() -> PathBuf {
    match UserDirs::new() {
        Some(dirs) => dirs
            .audio_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.home_dir().join("Music")),
        None => PathBuf::from("."),
    }
}

/// `library.<backend>` inside the per-user data directory.
pub fn default_store_location(backend: StoreKind) -> PathBuf {
    let file_name = format!("library.{}", backend.extension());
    match ProjectDirs::from("", "", "tunegrep") {
        Some(dirs) => dirs.data_dir().join(file_name),
        None => PathBuf::from(".tunegrep").join(file_name),
    }
}

pub fn apply_store_config_defaults(config: &CliConfig, args: &mut StoreArgs) {
    let Some(store) = &config.store else {
        return;
    };

    if args.backend.is_none() {
        args.backend = store.backend;
    }

    if args.store_path.is_none() {
        if let Some(path) = &store.path {
            args.store_path = Some(path.clone());
        }
    }
}

pub fn apply_library_config_defaults(config: &CliConfig, args: &mut LibraryArgs) {
    let Some(library) = &config.library else {
        return;
    };

    if args.library.is_none() {
        if let Some(root) = &library.root {
            args.library = Some(root.clone());
        }
    }

    if args.extensions.is_empty() && !library.extensions.is_empty() {
        args.extensions = library.extensions.clone();
    }

    if args.globs.is_empty() && !library.globs.is_empty() {
        args.globs = library.globs.clone();
    }

    if args.exclude_globs.is_empty() && !library.exclude_globs.is_empty() {
        args.exclude_globs = library.exclude_globs.clone();
    }

    if matches!(args.extractor, ExtractorArg::Tags) {
        if let Some(extractor) = library.extractor {
            args.extractor = extractor;
        }
    }
}

pub fn apply_pipeline_config_defaults(config: &CliConfig, args: &mut PipelineArgs) {
    let Some(index) = &config.index else {
        return;
    };

    if !args.serial {
        if let Some(true) = index.serial {
            args.serial = true;
        }
    }

    if args.workers.is_none() {
        args.workers = index.workers;
    }

    if args.batch_size.is_none() {
        args.batch_size = index.batch_size;
    }

    if args.queue_capacity.is_none() {
        args.queue_capacity = index.queue_capacity;
    }
}

pub fn apply_index_config_defaults(config: &CliConfig, args: &mut IndexArgs) {
    apply_store_config_defaults(config, &mut args.store);
    apply_library_config_defaults(config, &mut args.library);
    apply_pipeline_config_defaults(config, &mut args.pipeline);

    if let Some(index) = &config.index {
        if args.watermark.is_none() {
            args.watermark = index.watermark;
        }

        if !args.prune {
            if let Some(true) = index.prune {
                args.prune = true;
            }
        }
    }
}

pub fn apply_search_config_defaults(config: &CliConfig, args: &mut SearchArgs) {
    apply_store_config_defaults(config, &mut args.store);
    apply_library_config_defaults(config, &mut args.library);
    apply_pipeline_config_defaults(config, &mut args.pipeline);

    let Some(search) = &config.search else {
        return;
    };

    if matches!(args.format, OutputFormat::Text) {
        if let Some(format) = search.format {
            args.format = format;
        }
    }

    if args.limit.is_none() {
        args.limit = search.limit;
    }

    if !args.show_paths {
        if let Some(true) = search.show_paths {
            args.show_paths = true;
        }
    }

    if args.indent == 2 {
        if let Some(indent) = search.indent {
            args.indent = indent;
        }
    }

    if !args.no_native {
        if let Some(false) = search.native_syntax {
            args.no_native = true;
        }
    }

    if !args.no_auto_index {
        if let Some(false) = search.auto_index {
            args.no_auto_index = true;
        }
    }
}

pub fn apply_prune_config_defaults(config: &CliConfig, args: &mut PruneArgs) {
    apply_store_config_defaults(config, &mut args.store);
}

pub fn apply_info_config_defaults(config: &CliConfig, args: &mut InfoArgs) {
    apply_store_config_defaults(config, &mut args.store);
}

pub fn apply_serve_config_defaults(config: &CliConfig, args: &mut ServeArgs) {
    apply_store_config_defaults(config, &mut args.store);
    apply_library_config_defaults(config, &mut args.library);
    apply_pipeline_config_defaults(config, &mut args.pipeline);

    if let Some(serve) = &config.serve {
        if args.addr == "127.0.0.1:7878" {
            if let Some(addr) = &serve.addr {
                args.addr = addr.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn finds_config_in_parent_directory() {
        let dir = tempdir().expect("tempdir");
        let config_dir = dir.path().join(".tunegrep");
        fs::create_dir_all(&config_dir).expect("mkdir");
        fs::write(config_dir.join("config.toml"), "").expect("write");
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir");

        let found = find_project_config(&nested).expect("config found");
        assert_eq!(found, config_dir.join("config.toml"));
    }

    #[test]
    fn parses_all_sections() {
        let config: CliConfig = toml::from_str(
            r#"
[store]
backend = "tantivy"
path = "/data/music.tantivy"

[library]
root = "~/Music"
extensions = ["mp3", "flac"]
exclude = ["**/podcasts/**"]
extractor = "key-value"

[index]
workers = 4
watermark = "store-mtime"

[search]
format = "json"
indent = 0
native_syntax = false

[serve]
addr = "0.0.0.0:9000"
"#,
        )
        .expect("parse");

        let store = config.store.as_ref().expect("store");
        assert_eq!(store.backend, Some(StoreBackendArg::Tantivy));
        let library = config.library.as_ref().expect("library");
        assert_eq!(library.exclude_globs, vec!["**/podcasts/**"]);
        assert_eq!(library.extractor, Some(ExtractorArg::KeyValue));
        let index = config.index.as_ref().expect("index");
        assert_eq!(index.watermark, Some(WatermarkArg::StoreMtime));
        let search = config.search.as_ref().expect("search");
        assert_eq!(search.format, Some(OutputFormat::Json));
        assert_eq!(search.native_syntax, Some(false));
    }

    #[test]
    fn cli_values_win_over_config() {
        let config = CliConfig {
            store: Some(StoreSection {
                backend: Some(StoreBackendArg::Tantivy),
                path: Some(PathBuf::from("/config/path.tantivy")),
            }),
            ..CliConfig::default()
        };

        let mut args = StoreArgs {
            backend: None,
            store_path: Some(PathBuf::from("/cli/path.sqlite")),
        };
        apply_store_config_defaults(&config, &mut args);

        assert_eq!(args.backend, Some(StoreBackendArg::Tantivy));
        assert_eq!(args.store_path, Some(PathBuf::from("/cli/path.sqlite")));
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde(Path::new("~/Music"));
        if UserDirs::new().is_some() {
            assert!(!expanded.starts_with("~"));
            assert!(expanded.ends_with("Music"));
        }
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn default_store_uses_backend_extension() {
        let path = default_store_location(StoreKind::Sqlite);
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("library.sqlite"));
    }
}
