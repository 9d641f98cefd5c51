//! SQLite-based media store.
//!
//! This backend stores media records in a single SQLite database file
//! with the following schema:
//!
//! - `meta(key TEXT PRIMARY KEY, value TEXT NOT NULL)`
//! - `media(title, artist, album, tracknumber, discnumber, genre, path UNIQUE)`
//!
//! Query plans are lowered to a `WHERE` clause of `LIKE` substring
//! matches with bound parameters. SQLite's `LIKE` folds ASCII case
//! only, so non-ASCII text matches case-sensitively. The connection is
//! configured with:
//!
//! - `journal_mode = WAL` for concurrent readers and a single writer.
//! - `synchronous = NORMAL` as a balance between safety and speed.
//! - `busy_timeout` to avoid transient `database is locked` errors.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use tracing::warn;

use crate::index::backend::MediaStore;
use crate::index::models::{BatchReport, StoreMeta};
use crate::models::{FieldSelector, Media, QueryPlan, SearchRequest, StoreKind, WriteFailure};

const SELECT_MEDIA: &str =
    "SELECT title, artist, album, tracknumber, discnumber, genre, path FROM media";

const ORDER_BY_PLAYBACK: &str = " ORDER BY artist, album, discnumber, tracknumber, path";

/// SQLite-backed implementation of `MediaStore`.
pub struct SqliteMediaStore {
    path: PathBuf,
    conn: Connection,
}

impl SqliteMediaStore {
    /// Open (or create) a SQLite store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open sqlite database {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;

        Self::initialize_schema(&conn)?;

        Ok(Self {
            path: db_path.to_path_buf(),
            conn,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS media (
                title       TEXT NOT NULL,
                artist      TEXT NOT NULL,
                album       TEXT NOT NULL,
                tracknumber INTEGER NOT NULL,
                discnumber  INTEGER NOT NULL,
                genre       TEXT NOT NULL,
                path        TEXT NOT NULL UNIQUE
            );

            CREATE INDEX IF NOT EXISTS idx_media_playback
                ON media(artist, album, discnumber, tracknumber);
        "#,
        )?;

        Ok(())
    }

    fn row_to_media(row: &rusqlite::Row<'_>) -> rusqlite::Result<Media> {
        let track: i64 = row.get(3)?;
        let disc: i64 = row.get(4)?;
        let path: String = row.get(6)?;

        Ok(Media {
            title: row.get(0)?,
            artist: row.get(1)?,
            album: row.get(2)?,
            track_number: track.clamp(0, u32::MAX as i64) as u32,
            disc_number: disc.clamp(0, u32::MAX as i64) as u32,
            genre: row.get(5)?,
            path: PathBuf::from(path),
        })
    }
}

/// Escape `LIKE` wildcards so `text` matches literally.
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn column(selector: FieldSelector) -> Option<&'static str> {
    match selector {
        FieldSelector::Genre => Some("genre"),
        FieldSelector::Artist => Some("artist"),
        FieldSelector::Album => Some("album"),
        FieldSelector::Title => Some("title"),
        FieldSelector::Any => None,
    }
}

/// Lower a plan to a `WHERE` clause (without the keyword) plus its
/// positional parameters. An empty plan yields `None`.
pub(crate) fn translate(plan: &QueryPlan) -> Option<(String, Vec<String>)> {
    if plan.is_empty() {
        return None;
    }

    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for group in &plan.groups {
        match column(group.selector) {
            Some(col) => {
                let alternatives: Vec<String> = group
                    .texts
                    .iter()
                    .map(|text| {
                        params.push(like_pattern(text));
                        format!("{col} LIKE ? ESCAPE '\\'")
                    })
                    .collect();
                clauses.push(format!("({})", alternatives.join(" OR ")));
            }
            None => {
                for text in &group.texts {
                    let pattern = like_pattern(text);
                    let alternatives: Vec<String> = ["artist", "album", "title"]
                        .iter()
                        .map(|col| {
                            params.push(pattern.clone());
                            format!("{col} LIKE ? ESCAPE '\\'")
                        })
                        .collect();
                    clauses.push(format!("({})", alternatives.join(" OR ")));
                }
            }
        }
    }

    Some((clauses.join(" AND "), params))
}

impl MediaStore for SqliteMediaStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn load_meta(&self) -> Result<StoreMeta> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM meta")?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            Ok((key, value))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }

        if map.is_empty() {
            return Ok(StoreMeta::fresh(crate::index::current_epoch_seconds()));
        }

        let schema_version = map
            .get("schema_version")
            .cloned()
            .unwrap_or_else(|| crate::index::models::STORE_SCHEMA_VERSION.to_string());

        if schema_version != crate::index::models::STORE_SCHEMA_VERSION {
            bail!(
                "unsupported store schema version {}; expected {}",
                schema_version,
                crate::index::models::STORE_SCHEMA_VERSION
            );
        }

        let created_at = map
            .get("created_at")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(StoreMeta {
            schema_version,
            tool_version: map
                .get("tool_version")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            library_root: map.get("library_root").cloned().unwrap_or_default(),
            created_at,
            updated_at: map
                .get("updated_at")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(created_at),
            last_scan_started_at: map
                .get("last_scan_started_at")
                .and_then(|s| s.parse::<u64>().ok()),
        })
    }

    fn save_meta(&mut self, meta: &StoreMeta) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM meta", [])?;

        {
            let mut stmt = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;

            let mut rows = vec![
                ("schema_version", meta.schema_version.clone()),
                ("tool_version", meta.tool_version.clone()),
                ("library_root", meta.library_root.clone()),
                ("created_at", meta.created_at.to_string()),
                ("updated_at", meta.updated_at.to_string()),
            ];
            if let Some(started) = meta.last_scan_started_at {
                rows.push(("last_scan_started_at", started.to_string()));
            }

            for (key, value) in rows {
                stmt.execute(params![key, value])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn index_batch(&mut self, records: &[Media]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let tx = self.conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO media (
                    title,
                    artist,
                    album,
                    tracknumber,
                    discnumber,
                    genre,
                    path
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for record in records {
                let path = record.path.to_string_lossy().into_owned();
                let result = stmt.execute(params![
                    record.title,
                    record.artist,
                    record.album,
                    record.track_number as i64,
                    record.disc_number as i64,
                    record.genre,
                    path,
                ]);

                match result {
                    Ok(_) => report.written += 1,
                    Err(err) => {
                        warn!(
                            path = %record.path.display(),
                            error = %err,
                            "failed to store record"
                        );
                        report.failures.push(WriteFailure {
                            path: record.path.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn search(&self, request: &SearchRequest) -> Result<Vec<Media>> {
        let (sql, params) = match translate(&request.plan) {
            Some((clause, params)) => (
                format!("{SELECT_MEDIA} WHERE {clause}{ORDER_BY_PLAYBACK}"),
                params,
            ),
            None => (format!("{SELECT_MEDIA}{ORDER_BY_PLAYBACK}"), Vec::new()),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), Self::row_to_media)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    fn all_paths(&self) -> Result<Vec<PathBuf>> {
        let mut stmt = self.conn.prepare("SELECT path FROM media ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            Ok(PathBuf::from(path))
        })?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    fn remove_paths(&mut self, paths: &[PathBuf]) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let mut removed: u64 = 0;

        {
            let mut stmt = tx.prepare("DELETE FROM media WHERE path = ?1")?;
            for path in paths {
                removed += stmt.execute(params![path.to_string_lossy().into_owned()])? as u64;
            }
        }

        tx.commit()?;
        Ok(removed)
    }

    fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM media", [])?;
        tx.commit()?;
        Ok(())
    }

    fn last_modified(&self) -> Result<Option<SystemTime>> {
        let mut wal = self.path.clone().into_os_string();
        wal.push("-wal");

        let newest = [self.path.clone(), PathBuf::from(wal)]
            .iter()
            .filter_map(|p| fs::metadata(p).and_then(|m| m.modified()).ok())
            .max();
        Ok(newest)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let store = *self;
        store
            .conn
            .close()
            .map_err(|(_, err)| anyhow::anyhow!("failed to close sqlite store: {err}"))
    }
}
