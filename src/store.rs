//! Local key-value store seam.
//!
//! Every durable piece of chime state (sync queue, task cache, profile,
//! retry queue, execution log, deferrals) is serialized into a scoped
//! key-value store. [`JsonFileStore`] keeps one JSON file per key under a
//! root directory; [`MemoryStore`] backs tests and embedders that bring
//! their own persistence.

use crate::error::{ChimeError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Namespaced store keys used by the core.
pub mod keys {
    /// Durable FIFO of pending mutations.
    pub const SYNC_QUEUE: &str = "chime.sync_queue";
    /// Mutations that exhausted retries or were permanently rejected.
    pub const FAILED_MUTATIONS: &str = "chime.failed_mutations";
    /// Timestamp of the last successful sync pass.
    pub const LAST_SYNC: &str = "chime.last_sync";
    /// Unified task cache.
    pub const TASKS: &str = "chime.tasks";
    /// User delivery profile.
    pub const PROFILE: &str = "chime.profile";
    /// Delivery retry queue.
    pub const RETRY_QUEUE: &str = "chime.retry_queue";
    /// Execution log ring buffer.
    pub const EXECUTION_LOG: &str = "chime.execution_log";
    /// Quiet-hours deferrals.
    pub const DEFERRALS: &str = "chime.deferrals";
    /// Last known network status.
    pub const NET_STATUS: &str = "chime.net_status";
}

/// Scoped persistent key-value storage.
///
/// Reads and writes are blocking but bounded; failures surface as
/// [`ChimeError::Storage`] and callers degrade instead of panicking.
pub trait LocalStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the value under `key`. Deleting a missing key is a no-op.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value from the store.
///
/// A missing key is `Ok(None)`; unparseable contents are a storage error.
pub fn get_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ChimeError::Storage(format!("cannot parse '{key}': {e}"))),
    }
}

/// Serialize a value to JSON and write it to the store.
pub fn set_json<T: Serialize>(store: &dyn LocalStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| ChimeError::Storage(format!("cannot serialize '{key}': {e}")))?;
    store.set(key, &raw)
}

/// File-backed store: one JSON file per key under a root directory.
///
/// Writes go through a temp file and rename so a crash mid-write never
/// leaves a truncated value behind.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| ChimeError::Storage(format!("cannot create store dir: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl LocalStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ChimeError::Storage(format!("cannot read '{key}': {e}"))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = self.root.join(format!("{key}.json.tmp"));
        std::fs::write(&tmp, value)
            .map_err(|e| ChimeError::Storage(format!("cannot write '{key}': {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| ChimeError::Storage(format!("cannot commit '{key}': {e}")))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChimeError::Storage(format!("cannot remove '{key}': {e}"))),
        }
    }
}

/// In-memory store for tests and hosts that scope persistence themselves.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .map
            .lock()
            .map_err(|_| ChimeError::Storage("store lock poisoned".to_owned()))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| ChimeError::Storage("store lock poisoned".to_owned()))?;
        map.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|_| ChimeError::Storage("store lock poisoned".to_owned()))?;
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("chime.tasks").unwrap().is_none());

        store.set("chime.tasks", "[]").unwrap();
        assert_eq!(store.get("chime.tasks").unwrap().as_deref(), Some("[]"));

        store.remove("chime.tasks").unwrap();
        assert!(store.get("chime.tasks").unwrap().is_none());
        // Removing again is a no-op.
        store.remove("chime.tasks").unwrap();
    }

    #[test]
    fn json_helpers_round_trip() {
        let store = MemoryStore::new();
        set_json(&store, keys::LAST_SYNC, &vec![1u32, 2, 3]).unwrap();
        let restored: Option<Vec<u32>> = get_json(&store, keys::LAST_SYNC).unwrap();
        assert_eq!(restored, Some(vec![1, 2, 3]));
    }

    #[test]
    fn corrupt_value_is_a_storage_error_not_a_panic() {
        let store = MemoryStore::new();
        store.set(keys::PROFILE, "not json{").unwrap();
        let result: Result<Option<Vec<u32>>> = get_json(&store, keys::PROFILE);
        assert!(matches!(result, Err(ChimeError::Storage(_))));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path()).unwrap();

        assert!(store.get(keys::SYNC_QUEUE).unwrap().is_none());
        store.set(keys::SYNC_QUEUE, r#"{"version":1}"#).unwrap();
        assert_eq!(
            store.get(keys::SYNC_QUEUE).unwrap().as_deref(),
            Some(r#"{"version":1}"#)
        );

        // A second store over the same root sees committed values.
        let reopened = JsonFileStore::new(dir.path()).unwrap();
        assert!(reopened.get(keys::SYNC_QUEUE).unwrap().is_some());

        store.remove(keys::SYNC_QUEUE).unwrap();
        assert!(store.get(keys::SYNC_QUEUE).unwrap().is_none());
    }
}
