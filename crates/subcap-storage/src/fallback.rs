//! Primary/secondary store chain
//!
//! Reads and writes go to the primary. When a primary write fails, the value
//! is parked in the secondary and a warning is logged. Parked values shadow
//! the primary on read and move back to it on the first read after the
//! primary recovers. Removes only succeed once the primary has forgotten the
//! key, so a deleted value cannot reappear after an outage.

use subcap_core::SyncResult;
use tracing::{debug, warn};

use crate::adapter::StorageAdapter;

#[derive(Debug)]
pub struct FallbackStore<P, S> {
    primary: P,
    secondary: S,
}

impl<P: StorageAdapter, S: StorageAdapter> FallbackStore<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    async fn parked(&self, key: &str) -> Option<String> {
        match self.secondary.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "fallback store read failed: {e}");
                None
            }
        }
    }
}

impl<P: StorageAdapter, S: StorageAdapter> StorageAdapter for FallbackStore<P, S> {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        if let Some(value) = self.parked(key).await {
            match self.primary.set(key, &value).await {
                Ok(()) => {
                    debug!(key, "moved parked value back to primary store");
                    if let Err(e) = self.secondary.remove(key).await {
                        warn!(key, "clearing parked value failed: {e}");
                    }
                }
                Err(e) => debug!(key, "primary store still failing: {e}"),
            }
            return Ok(Some(value));
        }

        match self.primary.get(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(key, "primary store read failed, nothing parked: {e}");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        match self.primary.set(key, value).await {
            Ok(()) => {
                if let Err(e) = self.secondary.remove(key).await {
                    warn!(key, "clearing stale parked value failed: {e}");
                }
                Ok(())
            }
            Err(e) => {
                warn!(key, "primary store write failed, parking in fallback: {e}");
                self.secondary.set(key, value).await
            }
        }
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.primary.remove(key).await?;
        self.secondary.remove(key).await
    }

    fn is_durable(&self) -> bool {
        self.primary.is_durable()
    }
}
