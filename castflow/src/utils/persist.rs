//! Atomic JSON file persistence.
//!
//! Every durable document is written to a sibling temp file, synced, then
//! renamed over the target. A crash mid-write leaves the previous copy in
//! place.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::StoreError;

/// Serializes `value` as pretty JSON and atomically replaces `path`.
///
/// # Errors
///
/// Returns `StoreError` if serialization, the temp write or the rename fails.
/// On error the previous file (if any) is left untouched.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::serialization(path, e))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let tmp = temp_path(path);
    let result = write_and_sync(&tmp, &bytes).and_then(|()| {
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
    });

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Reads and deserializes a JSON file, returning `None` if it does not exist.
///
/// # Errors
///
/// Returns `StoreError` on read failures other than not-found, or if the
/// contents do not match `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::serialization(path, e))
}

fn write_and_sync(tmp: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = File::create(tmp).map_err(|e| StoreError::io(tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(tmp, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{name}.{}.tmp", &suffix[..8]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_json_atomic(&path, &json!({"a": 1})).unwrap();
        let back: Option<serde_json::Value> = read_json(&path).unwrap();
        assert_eq!(back, Some(json!({"a": 1})));
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let back: Option<serde_json::Value> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!([1, 2, 3])).unwrap();
        write_json_atomic(&path, &json!([4])).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[test]
    fn test_failed_rename_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();

        // A non-empty directory at the target path makes the rename fail.
        let blocked = dir.path().join("blocked");
        fs::create_dir_all(blocked.join("inner")).unwrap();
        assert!(write_json_atomic(&blocked, &json!({"v": 2})).is_err());

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["blocked".to_string(), "doc.json".to_string()]);

        let back: Option<serde_json::Value> = read_json(&path).unwrap();
        assert_eq!(back, Some(json!({"v": 1})));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{not json").unwrap();
        let back: Result<Option<serde_json::Value>, _> = read_json(&path);
        assert!(matches!(back, Err(StoreError::Serialization { .. })));
    }
}
