//! Durable storage for run records.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::RunRecord;
use crate::errors::StoreError;
use crate::utils::{is_safe_id, read_json, write_json_atomic};

/// Persistence for run records.
///
/// The registry keeps records in memory while they are live and writes each
/// change through this trait; failures are logged by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait RunStore: Send + Sync {
    /// Writes `record`, replacing any previous copy.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record cannot be written.
    fn save(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a stored copy exists but cannot be read.
    fn load(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Reads every stored record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be enumerated.
    fn list(&self) -> Result<Vec<RunRecord>, StoreError>;
}

/// One `{run_id}.json` file per run in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileRunStore {
    dir: PathBuf,
}

impl JsonFileRunStore {
    /// Creates a store rooted at `dir`; the directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_id(run_id) {
            return Err(StoreError::InvalidId(run_id.to_string()));
        }
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

impl RunStore for JsonFileRunStore {
    fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.path_for(&record.run_id)?, record)
    }

    fn load(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        read_json(&self.path_for(run_id)?)
    }

    fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<RunRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run record"),
            }
        }
        Ok(records)
    }
}

/// Keeps records in memory only.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    records: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryRunStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.records.lock().insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.records.lock().get(run_id).cloned())
    }

    fn list(&self) -> Result<Vec<RunRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RunStatus;
    use crate::testing::json_map;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str) -> RunRecord {
        RunRecord::new(id, "content", json_map(json!({"sport": "f1"})), Utc::now())
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileRunStore::new(dir.path().join("runs"));

        let mut rec = record("f1_20240526_130000_abcd1234");
        rec.status = RunStatus::Completed;
        store.save(&rec).unwrap();

        assert!(dir.path().join("runs/f1_20240526_130000_abcd1234.json").exists());
        assert_eq!(store.load(&rec.run_id).unwrap(), Some(rec.clone()));
        assert_eq!(store.list().unwrap(), vec![rec]);
    }

    #[test]
    fn test_file_store_missing() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileRunStore::new(dir.path().join("never-created"));
        assert_eq!(store.load("nope").unwrap(), None);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_rejects_unsafe_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileRunStore::new(dir.path());
        assert!(matches!(store.load("../secrets"), Err(StoreError::InvalidId(_))));
        assert!(matches!(store.save(&record("a/b")), Err(StoreError::InvalidId(_))));
    }

    #[test]
    fn test_file_store_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileRunStore::new(dir.path());
        store.save(&record("good")).unwrap();
        fs::write(dir.path().join("bad.json"), b"{").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["good".to_string()]);
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryRunStore::new();
        store.save(&record("r1")).unwrap();
        assert!(store.load("r1").unwrap().is_some());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
