//! Common test utilities and helpers for dirmirror tests
#![allow(dead_code)]

use assert_fs::prelude::*;
use assert_fs::TempDir;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A source tree and a replica tree under one temporary directory
pub struct TestTrees {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub replica: PathBuf,
}

impl TestTrees {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.child("source");
        let replica = temp_dir.child("replica");
        source.create_dir_all().expect("Failed to create source dir");
        replica.create_dir_all().expect("Failed to create replica dir");

        Self {
            source: source.path().to_path_buf(),
            replica: replica.path().to_path_buf(),
            temp_dir,
        }
    }

    pub fn write_source(&self, relative: &str, content: &str) -> PathBuf {
        write_file(&self.source, relative, content)
    }

    pub fn write_replica(&self, relative: &str, content: &str) -> PathBuf {
        write_file(&self.replica, relative, content)
    }

    pub fn log_path(&self) -> PathBuf {
        self.temp_dir.path().join("logs").join("actions.log")
    }
}

pub fn write_file(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Every regular file under `root`, keyed by relative path
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            let content = std::fs::read(e.path()).expect("Failed to read file");
            (relative, content)
        })
        .collect()
}

/// Lines starting with the given prefix
pub fn lines_with<'a>(lines: &'a [String], prefix: &str) -> Vec<&'a String> {
    lines.iter().filter(|l| l.starts_with(prefix)).collect()
}
