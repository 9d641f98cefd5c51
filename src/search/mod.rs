//! Core search engine module.
//!
//! This module hosts the sigil query compiler and the `run_search`
//! entry point used by the CLI and the HTTP server.

pub mod engine;
pub mod query;

pub use engine::{run_index, run_prune, run_search};
pub use query::compile;
