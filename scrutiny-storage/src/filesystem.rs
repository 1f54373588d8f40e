//! Filesystem observation store
//!
//! One file per location under a root directory. The same implementation
//! serves local disk and networked volumes (PVC): only the root path
//! differs, chosen at configuration time.

use crate::ObservationStore;
use dashmap::DashMap;
use scrutiny_core::error::StorageError;
use scrutiny_core::ScrutinyResult;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Filesystem backend rooted at a directory.
///
/// Writes to one location are serialized through a per-location mutex;
/// `save` goes through a temp file plus rename so readers never observe a
/// half-written overwrite, and a failed `append` truncates back to the
/// pre-append length.
#[derive(Debug)]
pub struct FilesystemStore {
    root: PathBuf,
    data_filename: String,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FilesystemStore {
    pub fn new(root: PathBuf, data_filename: String) -> Self {
        FilesystemStore {
            root,
            data_filename,
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    fn lock_for(&self, location: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(location.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn write_failed(location: &str, err: std::io::Error) -> StorageError {
        StorageError::WriteFailed {
            location: location.to_string(),
            reason: err.to_string(),
        }
    }
}

impl ObservationStore for FilesystemStore {
    fn save(&self, data: &[u8], location: &str) -> ScrutinyResult<()> {
        let lock = self.lock_for(location);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(&self.root).map_err(|e| Self::write_failed(location, e))?;
        let path = self.path_for(location);
        let tmp = self.root.join(format!("{}.tmp", location));

        tracing::debug!(location, bytes = data.len(), "Saving data");
        fs::write(&tmp, data).map_err(|e| Self::write_failed(location, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Self::write_failed(location, e)
        })?;
        Ok(())
    }

    fn append(&self, data: &[u8], location: &str) -> ScrutinyResult<()> {
        let lock = self.lock_for(location);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let path = self.path_for(location);
        if !path.is_file() {
            return Err(StorageError::NotFound {
                location: location.to_string(),
            }
            .into());
        }

        let previous_len = fs::metadata(&path)
            .map_err(|e| Self::write_failed(location, e))?
            .len();

        tracing::debug!(location, bytes = data.len(), "Appending data");
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Self::write_failed(location, e))?;

        if let Err(e) = file.write_all(data).and_then(|_| file.flush()) {
            // Roll back any partial write so the failure is not observable.
            let _ = file.set_len(previous_len);
            return Err(Self::write_failed(location, e).into());
        }
        Ok(())
    }

    fn read(&self, location: &str) -> ScrutinyResult<Vec<u8>> {
        let lock = self.lock_for(location);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let path = self.path_for(location);
        match fs::read(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                location: location.to_string(),
            }
            .into()),
            Err(e) => Err(StorageError::ReadFailed {
                location: location.to_string(),
                reason: e.to_string(),
            }
            .into()),
        }
    }

    fn file_exists(&self, location: &str) -> bool {
        self.path_for(location).is_file()
    }

    fn data_suffix(&self) -> &str {
        &self.data_filename
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (FilesystemStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path().to_path_buf(), "data.jsonl".to_string());
        (store, dir)
    }

    #[test]
    fn test_save_creates_root_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        let store = FilesystemStore::new(nested.clone(), "data.jsonl".to_string());
        store.save(b"x\n", "loc").unwrap();
        assert!(nested.join("loc").is_file());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let (store, dir) = store();
        store.save(b"x\n", "loc").unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["loc".to_string()]);
    }

    #[test]
    fn test_append_missing_file_is_not_found() {
        let (store, _dir) = store();
        let result = store.append(b"x\n", "ghost");
        assert!(result.is_err());
        assert!(!store.file_exists("ghost"));
    }

    #[test]
    fn test_read_follows_append() {
        let (store, _dir) = store();
        store.save(b"r1\n", "loc").unwrap();
        store.append(b"r2\n", "loc").unwrap();
        store.append(b"r3\n", "loc").unwrap();
        assert_eq!(store.read("loc").unwrap(), b"r1\nr2\nr3\n");
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        use std::sync::Arc;

        let (store, _dir) = store();
        let store = Arc::new(store);
        store.save(b"", "loc").unwrap();

        let mut handles = Vec::new();
        for worker in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    store
                        .append(format!("w{}-{}\n", worker, i).as_bytes(), "loc")
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let content = String::from_utf8(store.read("loc").unwrap()).unwrap();
        assert_eq!(content.lines().count(), 4 * 25);
    }
}
