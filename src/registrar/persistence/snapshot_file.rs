// SPDX-License-Identifier: Apache-2.0

//! Snapshot file with atomic writes.
//!
//! Writes go to a temp file in the same directory which is flushed, synced
//! and renamed over the snapshot, so a crash never leaves a partial file.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::schema::{PersistedStateV1, decode};
use crate::error::{Error, Result};
use crate::registrar::state::FileStateTable;

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. Returns None if it does not exist yet.
    pub fn load(&self) -> Result<Option<PersistedStateV1>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        decode(&bytes).map(Some).map_err(|e| {
            Error::Persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Load the table, degrading to an empty one when the snapshot is
    /// missing or unreadable.
    pub fn load_table(&self) -> FileStateTable {
        match self.load() {
            Ok(Some(state)) => {
                let table = state.into_table();
                debug!(
                    path = %self.path.display(),
                    files = table.len(),
                    "Loaded registrar snapshot"
                );
                table
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No registrar snapshot, starting empty");
                FileStateTable::new()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Unable to load registrar snapshot, all files will be treated as new"
                );
                FileStateTable::new()
            }
        }
    }

    pub fn persist(&self, state: &PersistedStateV1) -> Result<()> {
        atomic_write(&self.path, state)
    }
}

fn atomic_write(path: &Path, state: &PersistedStateV1) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create snapshot directory: {}", e))
            })?;
        }
    }

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let result = write_synced(&temp_path, state).and_then(|()| {
        fs::rename(&temp_path, path)
            .map_err(|e| Error::Persistence(format!("failed to rename snapshot file: {}", e)))
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_synced(temp_path: &Path, state: &PersistedStateV1) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write snapshot: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush snapshot: {}", e)))?;

    // Data must be on disk before the rename makes it visible
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync snapshot: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::state::FileState;
    use crate::stream::Stream;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn table() -> FileStateTable {
        [(Stream::new(1, 100), FileState::new("/var/log/app.log", 128))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_load_missing() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join(".courier"));
        assert!(file.load().unwrap().is_none());
        assert!(file.load_table().is_empty());
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested/dir/.courier"));

        file.persist(&PersistedStateV1::from_table(&table())).unwrap();
        assert_eq!(file.load_table(), table());

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path().join("nested/dir"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from(".courier")]);
    }

    #[test]
    fn test_persist_load_persist_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let file = SnapshotFile::new(dir.path().join(".courier"));

        file.persist(&PersistedStateV1::from_table(&table())).unwrap();
        let first = fs::read(file.path()).unwrap();

        let reloaded = file.load().unwrap().unwrap();
        file.persist(&reloaded).unwrap();
        let second = fs::read(file.path()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    #[traced_test]
    fn test_corrupt_snapshot_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".courier");
        fs::write(&path, b"{\"version\": 1, \"files\": {").unwrap();

        let file = SnapshotFile::new(&path);
        assert!(file.load().is_err());
        assert!(file.load_table().is_empty());
        assert!(logs_contain("Unable to load registrar snapshot"));
    }

    #[test]
    fn test_persist_into_missing_parent_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        // Parent path is a regular file, so the directory cannot be created
        let file = SnapshotFile::new(blocker.join(".courier"));
        assert!(matches!(
            file.persist(&PersistedStateV1::from_table(&table())),
            Err(Error::Persistence(_))
        ));
    }

    #[test]
    fn test_load_snapshot_from_much_newer_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".courier");
        fs::write(
            &path,
            br#"{"version": 256, "files": {"1:5": {"path": "/var/log/app.log", "offset": 77}}}"#,
        )
        .unwrap();

        let table = SnapshotFile::new(&path).load_table();
        assert_eq!(table.get(&Stream::new(1, 5)).unwrap().offset, 77);
    }
}
