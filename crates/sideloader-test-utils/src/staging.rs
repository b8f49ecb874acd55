//! Download-directory fixtures.
//!
//! [`StagedSnap`] owns a temporary download directory and writes the
//! `<name>_<revision>.assert` / `<name>_<revision>.snap` pairs the sideloader
//! expects to find there.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary download directory holding staged snaps.
///
/// The directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct StagedSnap {
    dir: TempDir,
}

impl StagedSnap {
    /// Create an empty download directory.
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Create a download directory holding one assertion/snap pair.
    pub fn new(name: &str, revision: &str, assertion: &[u8], snap: &[u8]) -> Self {
        Self::empty()
            .with_assertion(name, revision, assertion)
            .with_snap(name, revision, snap)
    }

    /// Write `<name>_<revision>.assert`.
    pub fn with_assertion(self, name: &str, revision: &str, content: &[u8]) -> Self {
        std::fs::write(self.assert_path(name, revision), content)
            .expect("failed to write assertion");
        self
    }

    /// Write `<name>_<revision>.snap`.
    pub fn with_snap(self, name: &str, revision: &str, content: &[u8]) -> Self {
        std::fs::write(self.snap_path(name, revision), content).expect("failed to write snap");
        self
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn assert_path(&self, name: &str, revision: &str) -> PathBuf {
        self.dir().join(format!("{name}_{revision}.assert"))
    }

    pub fn snap_path(&self, name: &str, revision: &str) -> PathBuf {
        self.dir().join(format!("{name}_{revision}.snap"))
    }
}
