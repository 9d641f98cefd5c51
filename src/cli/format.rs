use std::cmp;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{IndexMode, IndexSummary, Media, PruneSummary, SearchResult, StoreSummary};

/// Render records grouped by artist and album, numbered in playback order.
///
/// ```text
///
///  Miles Davis
/// ===========
///
///   Kind of Blue
///    ------------
///     [ 1 ] So What
/// ```
pub fn render_grouped(records: &[Media], show_paths: bool) -> String {
    let width = records.len().to_string().len();
    let mut out = String::new();
    let mut artist: Option<&str> = None;
    let mut album: Option<&str> = None;

    for (idx, record) in records.iter().enumerate() {
        if artist != Some(record.artist.as_str()) {
            let _ = write!(
                out,
                "\n {}\n{}\n",
                record.artist,
                "=".repeat(record.artist.chars().count())
            );
            artist = Some(record.artist.as_str());
            album = None;
        }
        if album != Some(record.album.as_str()) {
            let _ = write!(
                out,
                "\n  {}\n   {}\n",
                record.album,
                "-".repeat(record.album.chars().count())
            );
            album = Some(record.album.as_str());
        }

        let _ = writeln!(out, "    [ {:>width$} ] {}", idx + 1, record.title);
        if show_paths {
            let _ = writeln!(out, "      {:width$}   {}", "", record.path.display());
        }
    }

    out
}

pub fn print_text(result: &SearchResult, show_paths: bool) -> Result<()> {
    if result.records.is_empty() {
        eprintln!("no matches for {:?}", result.query);
        return Ok(());
    }

    print!("{}", render_grouped(&result.records, show_paths));
    if result.summary.truncated {
        eprintln!(
            "\nshowing {} of {} matches",
            commatize(result.records.len() as u64),
            commatize(result.summary.total_matches)
        );
    }

    Ok(())
}

/// Render a `SearchResult` as a simple table.
///
/// Columns: `#`, ARTIST, ALBUM, DISC, TRACK, TITLE and optionally PATH.
pub fn print_table(result: &SearchResult, show_paths: bool) -> Result<()> {
    print!("{}", render_table(&result.records, show_paths));
    Ok(())
}

fn render_table(records: &[Media], show_paths: bool) -> String {
    let mut out = String::new();
    if records.is_empty() {
        return out;
    }

    const MAX_ARTIST_WIDTH: usize = 24;
    const MAX_ALBUM_WIDTH: usize = 30;
    const MAX_TITLE_WIDTH: usize = 40;

    let widest = |header: &str, max: usize, field: fn(&Media) -> &str| {
        let longest = records
            .iter()
            .map(|r| field(r).chars().count())
            .max()
            .unwrap_or(0);
        cmp::min(cmp::max(header.len(), longest), max)
    };

    let idx_width = cmp::max(1, records.len().to_string().len());
    let artist_width = widest("ARTIST", MAX_ARTIST_WIDTH, |r| r.artist.as_str());
    let album_width = widest("ALBUM", MAX_ALBUM_WIDTH, |r| r.album.as_str());
    let title_width = widest("TITLE", MAX_TITLE_WIDTH, |r| r.title.as_str());

    let mut header = format!(
        "{:>idx_width$} {:<artist_width$} {:<album_width$} {:>4} {:>5} {:<title_width$}",
        "#", "ARTIST", "ALBUM", "DISC", "TRACK", "TITLE"
    );
    if show_paths {
        header.push_str(" PATH");
    }
    let _ = writeln!(out, "{}", header.trim_end());

    for (idx, record) in records.iter().enumerate() {
        let mut line = format!(
            "{:>idx_width$} {:<artist_width$} {:<album_width$} {:>4} {:>5} {:<title_width$}",
            idx + 1,
            truncate(&record.artist, artist_width),
            truncate(&record.album, album_width),
            record.disc_number,
            record.track_number,
            truncate(&record.title, title_width),
        );
        if show_paths {
            let _ = write!(line, " {}", record.path.display());
        }
        let _ = writeln!(out, "{}", line.trim_end());
    }

    out
}

/// Nest records as `artist -> album -> [title]`.
///
/// With `show_paths` every leaf is a `{title, path}` object instead of a
/// bare title.
pub fn build_hierarchy(records: &[Media], show_paths: bool) -> Value {
    let mut tree: BTreeMap<&str, BTreeMap<&str, Vec<Value>>> = BTreeMap::new();

    for record in records {
        let leaf = if show_paths {
            json!({ "title": record.title, "path": record.path })
        } else {
            Value::String(record.title.clone())
        };
        tree.entry(record.artist.as_str())
            .or_default()
            .entry(record.album.as_str())
            .or_default()
            .push(leaf);
    }

    json!(tree)
}

/// Serialize with `indent` spaces per level; zero produces compact JSON.
pub fn to_json_string<T: Serialize>(value: &T, indent: usize) -> Result<String> {
    if indent == 0 {
        return Ok(serde_json::to_string(value)?);
    }

    let spaces = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(spaces.as_bytes());
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8(buf)?)
}

pub fn print_json<T: Serialize>(value: &T, indent: usize) -> Result<()> {
    println!("{}", to_json_string(value, indent)?);
    Ok(())
}

/// Render an `IndexSummary` in human-readable text form.
pub fn print_index_summary_text(summary: &IndexSummary) -> Result<()> {
    println!("backend        : {}", summary.backend.as_str());
    println!("location       : {}", summary.location.display());
    if let Some(root) = &summary.library_root {
        println!("library_root   : {root}");
    }
    let mode = match summary.mode {
        IndexMode::Full => "full",
        IndexMode::Freshen => "freshen",
    };
    println!("mode           : {mode}");
    println!("discovered     : {}", commatize(summary.files_discovered));
    println!("indexed        : {}", commatize(summary.files_indexed));
    println!("extract_failed : {}", commatize(summary.extraction_failures));
    println!(
        "write_failed   : {}",
        commatize(summary.write_failures.len() as u64)
    );
    println!("records        : {}", commatize(summary.total_records));
    println!("workers        : {}", summary.workers);
    println!("elapsed_ms     : {}", summary.elapsed_ms);

    for failure in &summary.write_failures {
        eprintln!("write failed: {}: {}", failure.path.display(), failure.error);
    }

    Ok(())
}

pub fn print_prune_summary_text(summary: &PruneSummary) -> Result<()> {
    println!("backend   : {}", summary.backend.as_str());
    println!("location  : {}", summary.location.display());
    println!("removed   : {}", commatize(summary.removed));
    println!("remaining : {}", commatize(summary.remaining));
    Ok(())
}

/// Render a `StoreSummary` in human-readable text form.
pub fn print_store_summary_text(summary: &StoreSummary) -> Result<()> {
    println!("backend          : {}", summary.backend.as_str());
    println!("location         : {}", summary.location.display());

    if let Some(root) = &summary.library_root {
        println!("library_root     : {root}");
    }
    if let Some(schema) = &summary.schema_version {
        println!("schema           : {schema}");
    }
    if let Some(tool) = &summary.tool_version {
        println!("tool_version     : {tool}");
    }
    if let Some(created) = &summary.created_at {
        println!("created_at       : {created}");
    }
    if let Some(updated) = &summary.updated_at {
        println!("updated_at       : {updated}");
    }
    if let Some(scan) = &summary.last_scan_started_at {
        println!("last_scan_start  : {scan}");
    }

    println!("records          : {}", commatize(summary.records));

    Ok(())
}

/// Format an integer with `,` thousands separators.
pub fn commatize(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn truncate(s: &str, max_width: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_width {
        s.to_string()
    } else if max_width <= 1 {
        "…".to_string()
    } else {
        s.chars()
            .take(max_width.saturating_sub(1))
            .collect::<String>()
            + "…"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn media(artist: &str, album: &str, track: u32, title: &str) -> Media {
        Media {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            track_number: track,
            disc_number: 1,
            genre: "Jazz".to_string(),
            path: PathBuf::from(format!("/music/{title}.mp3")),
        }
    }

    fn fixture() -> Vec<Media> {
        vec![
            media("John Coltrane", "Blue Train", 1, "Blue Train"),
            media("Miles Davis", "Kind of Blue", 1, "So What"),
            media("Miles Davis", "Kind of Blue", 2, "Freddie Freeloader"),
        ]
    }

    #[test]
    fn grouped_output_underlines_artists_and_albums() {
        let text = render_grouped(&fixture(), false);
        let expected = "\n John Coltrane\n=============\n\n  Blue Train\n   ----------\n    [ 1 ] Blue Train\n\n Miles Davis\n===========\n\n  Kind of Blue\n   ------------\n    [ 2 ] So What\n    [ 3 ] Freddie Freeloader\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn grouped_output_pads_indices_to_count_width() {
        let records: Vec<_> = (1..=10)
            .map(|n| media("A", "B", n, &format!("t{n}")))
            .collect();
        let text = render_grouped(&records, false);
        assert!(text.contains("    [  1 ] t1\n"));
        assert!(text.contains("    [ 10 ] t10\n"));
    }

    #[test]
    fn hierarchy_nests_titles_under_artist_and_album() {
        let value = build_hierarchy(&fixture(), false);
        assert_eq!(
            value["Miles Davis"]["Kind of Blue"],
            json!(["So What", "Freddie Freeloader"])
        );

        let value = build_hierarchy(&fixture(), true);
        assert_eq!(
            value["John Coltrane"]["Blue Train"][0]["path"],
            "/music/Blue Train.mp3"
        );
    }

    #[test]
    fn json_indent_zero_is_compact() {
        let value = json!({"a": [1]});
        assert_eq!(to_json_string(&value, 0).expect("json"), r#"{"a":[1]}"#);
        assert_eq!(
            to_json_string(&value, 4).expect("json"),
            "{\n    \"a\": [\n        1\n    ]\n}"
        );
    }

    #[test]
    fn table_has_header_and_one_row_per_record() {
        let table = render_table(&fixture(), false);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("# ARTIST"));
        assert!(lines[3].ends_with("Freddie Freeloader"));
    }

    #[test]
    fn commatize_groups_thousands() {
        assert_eq!(commatize(0), "0");
        assert_eq!(commatize(999), "999");
        assert_eq!(commatize(1000), "1,000");
        assert_eq!(commatize(1234567), "1,234,567");
    }

    #[test]
    fn truncate_leaves_short_strings_unchanged() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[test]
    fn truncate_handles_unicode_characters() {
        let s = "éééé";
        assert_eq!(truncate(s, 3), "éé…");
        assert_eq!(truncate(s, 1), "…");
    }
}
