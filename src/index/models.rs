//! Persisted store metadata and batch write reports shared by the
//! store backends.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::WriteFailure;

/// Current on-disk schema version written by both backends.
pub const STORE_SCHEMA_VERSION: &str = "1";

/// Metadata for an entire media store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Schema version for the store on disk.
    pub schema_version: String,
    /// Version of the tunegrep tool that wrote the store.
    pub tool_version: String,
    /// Canonical library root of the last scan, stored as an absolute path.
    #[serde(default)]
    pub library_root: String,
    /// Unix timestamp (seconds since epoch) when the store was created.
    pub created_at: u64,
    /// Unix timestamp (seconds since epoch) when the store was last updated.
    pub updated_at: u64,
    /// Unix timestamp at which the last completed scan started.
    ///
    /// Freshen runs only pick up files modified after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scan_started_at: Option<u64>,
}

impl StoreMeta {
    /// Metadata for a store that has never been written.
    pub fn fresh(now: u64) -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            library_root: String::new(),
            created_at: now,
            updated_at: now,
            last_scan_started_at: None,
        }
    }
}

/// Outcome of writing one batch of records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Records committed to the store.
    pub written: u64,
    /// Records the store rejected; the rest of the batch still commits.
    pub failures: Vec<WriteFailure>,
}

impl BatchReport {
    /// A report where every path in `paths` failed with the same error.
    pub fn all_failed<I>(paths: I, error: &str) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        Self {
            written: 0,
            failures: paths
                .into_iter()
                .map(|path| WriteFailure {
                    path,
                    error: error.to_string(),
                })
                .collect(),
        }
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.written += other.written;
        self.failures.extend(other.failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_meta_accepts_missing_optional_fields() {
        let json = r#"{
            "schema_version": "1",
            "tool_version": "0.0.0",
            "created_at": 1700000000,
            "updated_at": 1700000500
        }"#;

        let meta: StoreMeta = serde_json::from_str(json).expect("deserialize");
        assert_eq!(meta.library_root, "");
        assert_eq!(meta.last_scan_started_at, None);
    }

    #[test]
    fn batch_reports_merge_counts_and_failures() {
        let mut report = BatchReport {
            written: 3,
            failures: Vec::new(),
        };
        report.merge(BatchReport::all_failed(
            vec![PathBuf::from("/a.mp3"), PathBuf::from("/b.mp3")],
            "disk full",
        ));

        assert_eq!(report.written, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[1].error, "disk full");
    }
}
