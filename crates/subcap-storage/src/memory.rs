//! In-process store, used as a fallback and in tests

use std::collections::HashMap;
use std::sync::Mutex;
use subcap_core::{SyncError, SyncResult};

use crate::adapter::StorageAdapter;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    durable: bool,
}

impl MemoryStore {
    /// A volatile store: values are lost when the process exits.
    pub fn new() -> Self {
        Self::default()
    }

    /// A memory store that reports itself as durable.
    ///
    /// For embedders that persist the contents themselves, and for tests
    /// exercising code paths that require durability.
    pub fn durable() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            durable: true,
        }
    }

    /// Snapshot of the keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Storage("memory store lock poisoned".into()))
    }
}

impl StorageAdapter for MemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn is_durable(&self) -> bool {
        self.durable
    }
}
