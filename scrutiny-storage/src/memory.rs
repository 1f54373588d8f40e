//! In-memory observation store

use crate::ObservationStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use scrutiny_core::error::StorageError;
use scrutiny_core::ScrutinyResult;

/// Concurrent in-memory backend. Each location is one map entry; the map's
/// per-entry locking makes every mutation atomic to readers of the same
/// location without any cross-location lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: DashMap<String, String>,
    data_filename: String,
}

impl MemoryStore {
    pub fn new(data_filename: String) -> Self {
        MemoryStore {
            data: DashMap::new(),
            data_filename,
        }
    }

    /// Number of stored locations.
    pub fn location_count(&self) -> usize {
        self.data.len()
    }

    /// Drop all stored content.
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl ObservationStore for MemoryStore {
    fn save(&self, data: &[u8], location: &str) -> ScrutinyResult<()> {
        let text = String::from_utf8(data.to_vec()).map_err(|e| StorageError::WriteFailed {
            location: location.to_string(),
            reason: format!("content is not valid UTF-8: {}", e),
        })?;
        tracing::debug!(location, bytes = data.len(), "Saving data");
        self.data.insert(location.to_string(), text);
        Ok(())
    }

    fn append(&self, data: &[u8], location: &str) -> ScrutinyResult<()> {
        let text = String::from_utf8(data.to_vec()).map_err(|e| StorageError::WriteFailed {
            location: location.to_string(),
            reason: format!("content is not valid UTF-8: {}", e),
        })?;
        tracing::debug!(location, bytes = data.len(), "Appending data");
        match self.data.entry(location.to_string()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().push_str(&text);
                Ok(())
            }
            Entry::Vacant(_) => Err(StorageError::NotFound {
                location: location.to_string(),
            }
            .into()),
        }
    }

    fn read(&self, location: &str) -> ScrutinyResult<Vec<u8>> {
        match self.data.get(location) {
            Some(content) => Ok(content.as_bytes().to_vec()),
            None => Err(StorageError::NotFound {
                location: location.to_string(),
            }
            .into()),
        }
    }

    fn file_exists(&self, location: &str) -> bool {
        self.data.contains_key(location)
    }

    fn data_suffix(&self) -> &str {
        &self.data_filename
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_and_count() {
        let store = MemoryStore::new("data.jsonl".to_string());
        store.save(b"x\n", "a").unwrap();
        store.save(b"y\n", "b").unwrap();
        assert_eq!(store.location_count(), 2);

        store.clear();
        assert_eq!(store.location_count(), 0);
        assert!(!store.file_exists("a"));
    }

    #[test]
    fn test_locations_are_independent() {
        let store = MemoryStore::new("data.jsonl".to_string());
        store.save(b"a\n", "modelA-data.jsonl").unwrap();
        store.save(b"b\n", "modelB-data.jsonl").unwrap();
        store.append(b"a2\n", "modelA-data.jsonl").unwrap();

        assert_eq!(store.read("modelA-data.jsonl").unwrap(), b"a\na2\n");
        assert_eq!(store.read("modelB-data.jsonl").unwrap(), b"b\n");
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new("data.jsonl".to_string()));
        store.save(b"", "loc").unwrap();

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
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
        assert_eq!(content.lines().count(), 8 * 50);
    }
}
