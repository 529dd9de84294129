//! Persistence layer for project state
//!
//! Every piece of on-disk state (PID file, worktree tracker, remote registry,
//! execution history) goes through [`StateStore`], so the components that own
//! that state can be tested against [`MemoryStateStore`].

pub mod history;
pub mod store;

pub use history::{create_summary, ExecutionSummary, PipelineHistory};
pub use store::FileStateStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Attempts made by [`update_json`] before giving up on a contended key
const MAX_CAS_ATTEMPTS: usize = 64;

/// Error types for state store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid state key: {0}")]
    InvalidKey(String),

    #[error("Corrupt state in {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Timed out waiting for lock on {0}")]
    LockTimeout(String),

    #[error("Too much contention updating {0}")]
    Contended(String),
}

/// Key/value store for project state
///
/// Values are opaque strings; callers decide the encoding (plain text for the
/// PID file, JSON for everything else).
pub trait StateStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally store `value` under `key`
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`, returning whether it existed
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Replace the value under `key` with `new` only if it currently equals
    /// `expected` (`None` meaning absent). `new = None` deletes the key.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError>;
}

/// Read and decode a JSON value
pub fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encode and store a JSON value
pub fn save_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = encode(key, value)?;
    store.put(key, &raw)
}

/// Read-modify-write a JSON value with a compare-and-swap retry loop
///
/// Concurrent writers never lose each other's updates: if another writer got
/// in between the read and the write, the closure runs again on fresh state.
pub fn update_json<T, F>(store: &dyn StateStore, key: &str, mut apply: F) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnMut(&mut T),
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = store.get(key)?;
        let mut value: T = match &current {
            Some(raw) => serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?,
            None => T::default(),
        };

        apply(&mut value);
        let updated = encode(key, &value)?;

        if store.compare_and_swap(key, current.as_deref(), Some(&updated))? {
            return Ok(value);
        }
    }

    Err(StoreError::Contended(key.to_string()))
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// In-memory state store (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries().remove(key).is_some())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries();
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        match new {
            Some(value) => {
                entries.insert(key.to_string(), value.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_compare_and_swap_requires_expected_value() {
        let store = MemoryStateStore::new();

        assert!(store.compare_and_swap("k", None, Some("a")).unwrap());
        assert!(!store.compare_and_swap("k", None, Some("b")).unwrap());
        assert!(!store.compare_and_swap("k", Some("x"), Some("b")).unwrap());
        assert!(store.compare_and_swap("k", Some("a"), Some("b")).unwrap());
        assert_eq!(store.get("k").unwrap(), Some("b".to_string()));

        assert!(store.compare_and_swap("k", Some("b"), None).unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_update_json_starts_from_default() {
        let store = MemoryStateStore::new();
        let value: Vec<u32> = update_json(&store, "list", |v: &mut Vec<u32>| v.push(1)).unwrap();
        assert_eq!(value, vec![1]);

        let loaded: Vec<u32> = load_json(&store, "list").unwrap().unwrap();
        assert_eq!(loaded, vec![1]);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStateStore::new());
        let mut handles = Vec::new();

        for i in 0..8u32 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..10u32 {
                    update_json(store.as_ref(), "counter", |v: &mut Vec<u32>| v.push(i * 100 + j))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let values: Vec<u32> = load_json(store.as_ref(), "counter").unwrap().unwrap();
        assert_eq!(values.len(), 80);
    }

    #[test]
    fn test_corrupt_json_is_reported() {
        let store = MemoryStateStore::new();
        store.put("bad", "{not json").unwrap();
        let result: Result<Option<Vec<u32>>, _> = load_json(&store, "bad");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
