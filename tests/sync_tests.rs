mod common;

use assert_fs::prelude::*;
use common::{lines_with, snapshot, TestTrees};
use dirmirror::{
    sync_directories, ErrorPolicy, FileLogSink, LogFormat, MemorySink, Reconciler, SyncAction,
    SyncOptions,
};
use predicates::prelude::*;
use std::fs;

fn reconciler() -> Reconciler<MemorySink> {
    Reconciler::new(SyncOptions::default(), MemorySink::new())
}

#[test]
fn test_copy_into_empty_replica() {
    let trees = TestTrees::new();
    let source_file = trees.write_source("a.txt", "hello");

    let mut reconciler = reconciler();
    let summary = reconciler.sync(&trees.source, &trees.replica).unwrap();

    trees
        .temp_dir
        .child("replica/a.txt")
        .assert(predicate::str::diff("hello"));

    let lines = reconciler.into_sink().into_lines();
    assert_eq!(
        lines,
        vec![format!(
            "Copied: {} -> {}",
            source_file.display(),
            trees.replica.join("a.txt").display()
        )]
    );
    assert_eq!(summary.files_copied, 1);
    assert_eq!(summary.files_deleted, 0);
}

#[test]
fn test_stale_replica_file_removed() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "hello");
    trees.write_replica("a.txt", "hello");
    let stale = trees.write_replica("b.txt", "stale");

    let mut reconciler = reconciler();
    let summary = reconciler.sync(&trees.source, &trees.replica).unwrap();

    trees.temp_dir.child("replica/a.txt").assert("hello");
    trees
        .temp_dir
        .child("replica/b.txt")
        .assert(predicate::path::missing());

    let lines = reconciler.into_sink().into_lines();
    assert_eq!(lines, vec![format!("Removed: {}", stale.display())]);
    assert!(lines_with(&lines, "Copied:").is_empty());
    assert_eq!(summary.files_unchanged, 1);
}

#[test]
fn test_changed_content_is_recopied() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "v2");
    trees.write_replica("a.txt", "v1");

    let mut reconciler = reconciler();
    reconciler.sync(&trees.source, &trees.replica).unwrap();

    trees.temp_dir.child("replica/a.txt").assert("v2");
    let lines = reconciler.into_sink().into_lines();
    assert_eq!(lines_with(&lines, "Copied:").len(), 1);
    assert_eq!(lines.len(), 1);
}

#[test]
fn test_same_size_different_content_is_recopied() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "abcd");
    trees.write_replica("a.txt", "abce");

    let summary = reconciler().sync(&trees.source, &trees.replica).unwrap();

    assert_eq!(summary.files_copied, 1);
    trees.temp_dir.child("replica/a.txt").assert("abcd");
}

#[test]
fn test_second_pass_is_idempotent() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "hello");
    trees.write_source("docs/guide.md", "# Guide");
    trees.write_replica("old/leftover.bin", "x");

    let mut reconciler = reconciler();
    let first = reconciler.sync(&trees.source, &trees.replica).unwrap();
    assert!(!first.is_noop());

    let second = reconciler.sync(&trees.source, &trees.replica).unwrap();
    assert!(second.is_noop());
    assert!(second.actions.is_empty());
}

#[test]
fn test_nested_tree_converges() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "root file");
    trees.write_source("sub/b.txt", "nested");
    trees.write_source("sub/deeper/c.txt", "deeper");
    trees.write_source("sub/deeper/empty.txt", "");
    fs::create_dir_all(trees.source.join("empty-dir")).unwrap();

    trees.write_replica("sub/b.txt", "outdated");
    trees.write_replica("sub/orphan.txt", "orphan");
    trees.write_replica("gone/x.txt", "gone");

    sync_directories(&trees.source, &trees.replica, MemorySink::new()).unwrap();

    assert_eq!(snapshot(&trees.source), snapshot(&trees.replica));
    assert!(trees.replica.join("empty-dir").is_dir());
}

#[test]
fn test_files_in_both_trees_are_never_deleted() {
    let trees = TestTrees::new();
    trees.write_source("keep/a.txt", "new");
    trees.write_replica("keep/a.txt", "old");
    trees.write_replica("keep/drop.txt", "drop");

    let summary = reconciler().sync(&trees.source, &trees.replica).unwrap();

    let deleted: Vec<_> = summary
        .actions
        .iter()
        .filter_map(|a| match a {
            SyncAction::Delete { path } => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec![trees.replica.join("keep/drop.txt")]);
    assert!(trees.replica.join("keep/a.txt").exists());
}

#[test]
fn test_empty_directories_kept_by_default() {
    let trees = TestTrees::new();
    trees.write_replica("gone/x.txt", "gone");

    reconciler().sync(&trees.source, &trees.replica).unwrap();

    assert!(!trees.replica.join("gone/x.txt").exists());
    assert!(trees.replica.join("gone").is_dir());
}

#[test]
fn test_prune_empty_dirs_removes_orphan_directories() {
    let trees = TestTrees::new();
    trees.write_source("kept/a.txt", "a");
    fs::create_dir_all(trees.source.join("empty-in-source")).unwrap();
    trees.write_replica("gone/deep/x.txt", "gone");

    let options = SyncOptions {
        prune_empty_dirs: true,
        ..Default::default()
    };
    let mut reconciler = Reconciler::new(options, MemorySink::new());
    let summary = reconciler.sync(&trees.source, &trees.replica).unwrap();

    assert!(!trees.replica.join("gone").exists());
    assert!(trees.replica.join("kept").is_dir());
    assert!(trees.replica.join("empty-in-source").is_dir());
    assert_eq!(summary.dirs_removed, 2);
}

#[test]
fn test_file_log_sink_receives_actions() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "hello");
    trees.write_replica("b.txt", "stale");

    let sink = FileLogSink::open(&trees.log_path(), LogFormat::Text).unwrap();
    sync_directories(&trees.source, &trees.replica, sink).unwrap();

    let log = fs::read_to_string(trees.log_path()).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Copied: "));
    assert!(lines[1].starts_with("Removed: "));
}

#[test]
fn test_json_log_lines() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "hello");

    let mut reconciler = Reconciler::new(
        SyncOptions::default(),
        MemorySink::with_format(LogFormat::Json),
    );
    reconciler.sync(&trees.source, &trees.replica).unwrap();

    let lines = reconciler.into_sink().into_lines();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record["action"], "copy");
}

#[test]
fn test_plan_matches_sync() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "hello");
    trees.write_source("sub/b.txt", "b");
    trees.write_replica("sub/b.txt", "b");
    trees.write_replica("c.txt", "orphan");

    let mut reconciler = reconciler();
    let planned = reconciler.plan(&trees.source, &trees.replica).unwrap();
    let summary = reconciler.sync(&trees.source, &trees.replica).unwrap();

    assert_eq!(planned, summary.actions);
}

#[test]
fn test_continue_policy_reports_no_failures_on_clean_tree() {
    let trees = TestTrees::new();
    trees.write_source("a.txt", "hello");

    let options = SyncOptions {
        on_error: ErrorPolicy::Continue,
        ..Default::default()
    };
    let summary = Reconciler::new(options, MemorySink::new())
        .sync(&trees.source, &trees.replica)
        .unwrap();

    assert!(!summary.has_failures());
    assert_eq!(summary.files_copied, 1);
}
