use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::search::engine;
use crate::server::{self, ServerState};

mod args;
mod config;
mod format;

pub use args::{
    Cli, Commands, IndexArgs, InfoArgs, LibraryArgs, OutputFormat, PipelineArgs, PruneArgs,
    SearchArgs, ServeArgs, StoreArgs,
};

use config::{
    apply_index_config_defaults, apply_info_config_defaults, apply_prune_config_defaults,
    apply_search_config_defaults, apply_serve_config_defaults, load_cli_config,
};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "TUNEGREP_LOG";

const SYNTAX_GUIDE: &str = "\
Query syntax

  A query is a comma-separated list of terms. A leading sigil limits a
  term to one field:

    !text   genre contains text
    @text   artist contains text
    #text   album contains text
    $text   title contains text
    text    artist, album or title contains text

  Terms for the same field are alternatives; terms for different fields
  must all match. Every bare term narrows the result further.

    @miles, @coltrane     tracks by either artist
    !jazz, @miles         jazz tracks by Miles
    blue, train           both words appear in artist, album or title

  Matching ignores case. The sqlite store matches substrings; the tantivy
  store matches whole words.

  With the tantivy store, a query without sigils or commas is handed to
  the tantivy query parser, so expressions such as `artist:coltrane` or
  `\"blue train\"` work there. Pass --no-native to turn this off.

  An empty query lists the whole library.
";

/// Entry point for the CLI binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cli_config = load_cli_config()?;

    match cli.command {
        Some(Commands::Search(mut search_args)) => {
            if let Some(ref config) = cli_config {
                apply_search_config_defaults(config, &mut search_args);
            }

            let config = args::search_config_from_args(&search_args)?;
            let result = engine::run_search(config)?;

            match search_args.format {
                OutputFormat::Text => format::print_text(&result, search_args.show_paths),
                OutputFormat::Table => format::print_table(&result, search_args.show_paths),
                OutputFormat::Json if search_args.flat => {
                    format::print_json(&result, search_args.indent)
                }
                OutputFormat::Json => format::print_json(
                    &format::build_hierarchy(&result.records, search_args.show_paths),
                    search_args.indent,
                ),
            }
        }
        Some(Commands::Index(mut index_args)) => {
            if let Some(ref config) = cli_config {
                apply_index_config_defaults(config, &mut index_args);
            }

            let config = args::index_config_from_args(&index_args)?;
            let summary = engine::run_index(&config)?;
            let pruned = if index_args.prune {
                Some(engine::run_prune(&config.store)?)
            } else {
                None
            };

            match index_args.format {
                OutputFormat::Json => {
                    format::print_json(&summary, 0)?;
                    if let Some(pruned) = &pruned {
                        format::print_json(pruned, 0)?;
                    }
                    Ok(())
                }
                OutputFormat::Text | OutputFormat::Table => {
                    format::print_index_summary_text(&summary)?;
                    if let Some(pruned) = &pruned {
                        println!();
                        format::print_prune_summary_text(pruned)?;
                    }
                    Ok(())
                }
            }
        }
        Some(Commands::Prune(mut prune_args)) => {
            if let Some(ref config) = cli_config {
                apply_prune_config_defaults(config, &mut prune_args);
            }

            let store = args::store_config_from_args(&prune_args.store);
            let summary = engine::run_prune(&store)?;

            match prune_args.format {
                OutputFormat::Json => format::print_json(&summary, 0),
                OutputFormat::Text | OutputFormat::Table => {
                    format::print_prune_summary_text(&summary)
                }
            }
        }
        Some(Commands::Info(mut info_args)) => {
            if let Some(ref config) = cli_config {
                apply_info_config_defaults(config, &mut info_args);
            }

            let store = args::store_config_from_args(&info_args.store);
            let summary = crate::index::get_store_info(&store)?;

            match info_args.format {
                OutputFormat::Json => format::print_json(&summary, 0),
                OutputFormat::Text | OutputFormat::Table => {
                    format::print_store_summary_text(&summary)
                }
            }
        }
        Some(Commands::Serve(mut serve_args)) => {
            if let Some(ref config) = cli_config {
                apply_serve_config_defaults(config, &mut serve_args);
            }

            let addr: SocketAddr = serve_args
                .addr
                .parse()
                .with_context(|| format!("invalid listen address {:?}", serve_args.addr))?;
            let state = ServerState::new(args::serve_index_config_from_args(&serve_args)?);
            println!("Starting tunegrep HTTP server on http://{addr}");

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(server::run(addr, state))?;
            Ok(())
        }
        Some(Commands::Syntax) => {
            print!("{SYNTAX_GUIDE}");
            Ok(())
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Install a stderr `fmt` subscriber. `TUNEGREP_LOG` takes precedence over
/// `--verbose`; the fallback level is `warn`.
fn init_tracing(verbose: bool) -> Result<()> {
    let default_directive = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;
    Ok(())
}
