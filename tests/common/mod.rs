#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn bin() -> Command {
    let mut cmd = Command::cargo_bin("jira-csv-reconcile").expect("binary exists");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Scratch directory that is removed on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Copies a `tests/data` fixture into the workspace so commands may
    /// rewrite it in place.
    pub fn copy_fixture(&self, fixture: &str, name: &str) -> PathBuf {
        let path = self.join(name);
        fs::copy(fixture_path(fixture), &path).expect("copy fixture");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.join(name)).expect("read workspace file")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.join(name).exists()
    }
}
