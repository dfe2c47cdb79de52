//! The local key-value contract the sync manager and vault persist through

use std::future::Future;
use std::sync::Arc;
use subcap_core::SyncResult;

/// String-keyed, string-valued local persistence.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = SyncResult<Option<String>>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Whether values survive a restart of the process.
    fn is_durable(&self) -> bool;

    /// Read `key`, returning `fallback` when it is absent.
    fn get_or(&self, key: &str, fallback: &str) -> impl Future<Output = SyncResult<String>> + Send {
        async move {
            Ok(self
                .get(key)
                .await?
                .unwrap_or_else(|| fallback.to_string()))
        }
    }
}

impl<T: StorageAdapter> StorageAdapter for Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = SyncResult<Option<String>>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> impl Future<Output = SyncResult<()>> + Send {
        (**self).remove(key)
    }

    fn is_durable(&self) -> bool {
        (**self).is_durable()
    }
}
