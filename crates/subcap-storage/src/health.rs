//! Storage health check

use subcap_core::{SyncError, SyncResult};

use crate::adapter::StorageAdapter;

const PROBE_KEY: &str = "__subcap_probe__";

/// Verify the store accepts a write, reads it back, and deletes it
pub async fn check_health<S: StorageAdapter>(store: &S) -> SyncResult<()> {
    let token = subcap_core::now_millis().to_string();
    store.set(PROBE_KEY, &token).await?;
    let read_back = store.get(PROBE_KEY).await?;
    store.remove(PROBE_KEY).await?;

    if read_back.as_deref() == Some(token.as_str()) {
        Ok(())
    } else {
        Err(SyncError::Storage(
            "storage health check failed: probe value did not round-trip".into(),
        ))
    }
}

/// Returns true if the store is writable, false otherwise (non-panicking)
pub async fn is_healthy<S: StorageAdapter>(store: &S) -> bool {
    check_health(store).await.is_ok()
}
