//! tunegrep: index a media library's tags and query it with a compact
//! sigil-based DSL.
//!
//! The crate is organised around two subsystems that only share the
//! [`models::Media`] record and the [`index::MediaStore`] contract:
//!
//! - [`search`] compiles query strings into backend-neutral plans and
//!   runs them against a store.
//! - [`index`] walks a library, extracts tags in parallel and writes
//!   batches into one of the two store backends (SQLite or Tantivy).

pub mod cli;
pub mod extract;
pub mod index;
pub mod models;
pub mod search;
pub mod server;
