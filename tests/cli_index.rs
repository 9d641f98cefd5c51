use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

const TRACKS: &[(&str, &str)] = &[
    (
        "miles/so_what.mp3",
        "title = So What\nartist = Miles Davis\nalbum = Kind of Blue\ngenre = Jazz\ntrack = 1\n",
    ),
    (
        "miles/freddie.mp3",
        "title = Freddie Freeloader\nartist = Miles Davis\nalbum = Kind of Blue\ngenre = Jazz\ntrack = 2\n",
    ),
    (
        "coltrane/blue_train.flac",
        "title = Blue Train\nartist = John Coltrane\nalbum = Blue Train\ngenre = Jazz\ntrack = 1\n",
    ),
];

fn write_library(root: &Path) {
    for (rel, body) in TRACKS {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, body).expect("write track");
    }
    fs::write(root.join("cover.jpg"), "not media").expect("write cover");
}

fn tunegrep(cwd: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("tunegrep");
    cmd.current_dir(cwd)
        .env_remove("TUNEGREP_BACKEND")
        .env_remove("TUNEGREP_STORE")
        .env_remove("TUNEGREP_LIBRARY")
        .env_remove("TUNEGREP_LOG");
    cmd
}

fn index_json(cwd: &Path, library: &Path, store: &Path, extra: &[&str]) -> Value {
    let mut cmd = tunegrep(cwd);
    cmd.arg("index")
        .arg("--library")
        .arg(library)
        .arg("--store-path")
        .arg(store)
        .args(["--extractor", "key-value", "--format", "json"])
        .args(extra);

    let assert = cmd.assert().success();
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json output")
}

fn store_paths(dir: &Path) -> Vec<PathBuf> {
    vec![dir.join("library.sqlite"), dir.join("library.tantivy")]
}

#[test]
fn index_reports_discovered_and_indexed_files() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());

    for store in store_paths(data.path()) {
        let summary = index_json(data.path(), lib.path(), &store, &[]);
        assert_eq!(summary["files_discovered"], 3, "{}", store.display());
        assert_eq!(summary["files_indexed"], 3);
        assert_eq!(summary["extraction_failures"], 0);
        assert_eq!(summary["total_records"], 3);
        assert_eq!(summary["mode"], "full");
    }
}

#[test]
fn reindexing_is_idempotent() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());
    let store = data.path().join("library.sqlite");

    index_json(data.path(), lib.path(), &store, &[]);
    let summary = index_json(data.path(), lib.path(), &store, &[]);
    assert_eq!(summary["total_records"], 3);
}

#[test]
fn freshen_only_picks_up_new_files() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());
    let store = data.path().join("library.sqlite");

    // Watermarks have one-second resolution.
    thread::sleep(Duration::from_millis(1100));
    index_json(data.path(), lib.path(), &store, &[]);
    thread::sleep(Duration::from_millis(1100));

    fs::write(
        lib.path().join("miles/blue_in_green.mp3"),
        "title = Blue in Green\nartist = Miles Davis\nalbum = Kind of Blue\ngenre = Jazz\ntrack = 3\n",
    )
    .expect("write new track");

    let summary = index_json(data.path(), lib.path(), &store, &["--freshen"]);
    assert_eq!(summary["mode"], "freshen");
    assert_eq!(summary["files_discovered"], 1);
    assert_eq!(summary["total_records"], 4);
}

#[test]
fn index_with_prune_drops_deleted_files() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());
    let store = data.path().join("library.tantivy");

    index_json(data.path(), lib.path(), &store, &[]);
    fs::remove_file(lib.path().join("miles/freddie.mp3")).expect("remove");

    let mut cmd = tunegrep(data.path());
    cmd.arg("index")
        .arg("--library")
        .arg(lib.path())
        .arg("--store-path")
        .arg(&store)
        .args(["--extractor", "key-value", "--prune"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("removed   : 1"))
        .stdout(predicate::str::contains("remaining : 2"));
}

#[test]
fn prune_subcommand_reports_json() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());
    let store = data.path().join("library.sqlite");

    index_json(data.path(), lib.path(), &store, &[]);
    fs::remove_file(lib.path().join("coltrane/blue_train.flac")).expect("remove");

    let mut cmd = tunegrep(data.path());
    cmd.arg("prune")
        .arg("--store-path")
        .arg(&store)
        .args(["--format", "json"]);
    let assert = cmd.assert().success();
    let value: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("valid json output");
    assert_eq!(value["removed"], 1);
    assert_eq!(value["remaining"], 2);
    assert_eq!(value["backend"], "sqlite");
}

#[test]
fn missing_library_root_fails() {
    let data = tempdir().expect("data");

    let mut cmd = tunegrep(data.path());
    cmd.arg("index")
        .arg("--library")
        .arg(data.path().join("nowhere"))
        .arg("--store-path")
        .arg(data.path().join("library.sqlite"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot scan a nonexistent path"));
}

#[test]
fn info_requires_an_existing_store() {
    let data = tempdir().expect("data");

    let mut cmd = tunegrep(data.path());
    cmd.arg("info")
        .arg("--store-path")
        .arg(data.path().join("library.sqlite"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("store not found at"));
}

#[test]
fn info_describes_an_indexed_store() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());
    let store = data.path().join("library.tantivy");
    index_json(data.path(), lib.path(), &store, &[]);

    let mut cmd = tunegrep(data.path());
    cmd.arg("info")
        .arg("--store-path")
        .arg(&store)
        .args(["--format", "json"]);
    let assert = cmd.assert().success();
    let value: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("valid json output");

    assert_eq!(value["backend"], "tantivy");
    assert_eq!(value["records"], 3);
    assert!(value["created_at"].is_string());
    assert!(value["last_scan_started_at"].is_string());

    let mut text = tunegrep(data.path());
    text.arg("info").arg("--store-path").arg(&store);
    text.assert()
        .success()
        .stdout(predicate::str::contains("records          : 3"));
}

#[test]
fn switching_backend_imports_existing_records() {
    let lib = tempdir().expect("lib");
    let data = tempdir().expect("data");
    write_library(lib.path());
    index_json(data.path(), lib.path(), &data.path().join("library.sqlite"), &[]);

    // Removing the library proves the records come from the sibling store.
    fs::remove_dir_all(lib.path().join("miles")).expect("remove");

    let mut cmd = tunegrep(data.path());
    cmd.arg("search")
        .arg("--store-path")
        .arg(data.path().join("library.tantivy"))
        .args(["--no-auto-index", "--format", "json", "--flat", "@miles"]);
    let assert = cmd.assert().success();
    let value: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("valid json output");

    assert_eq!(value["backend"], "tantivy");
    assert_eq!(value["records"].as_array().map(Vec::len), Some(2));
}
