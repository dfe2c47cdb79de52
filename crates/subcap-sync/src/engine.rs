//! Sync engine: one pull → merge → push round against the remote blob.
//!
//! The remote version counter is the only concurrency control. A push is
//! always made against the version this round pulled, so a concurrent write
//! from another device makes the push fail with [`SyncError::Conflict`]
//! instead of silently overwriting it. The engine never retries; re-running
//! the whole round is the caller's decision.

use std::sync::Arc;
use subcap_core::{now_millis, SyncData, SyncError, SyncPayload, SyncResult};
use subcap_crypto::SyncCrypto;
use tracing::{debug, info, warn};

use crate::merge::merge_sync_data;
use crate::transport::ApiClient;

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult {
    /// `None` when the account has no blob yet.
    pub data: Option<SyncData>,
    pub version: u64,
    /// When the remote payload was written (ms), if there is one.
    pub timestamp: Option<u64>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushResult {
    pub version: u64,
}

/// Result of a full sync round.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRound {
    /// What was pushed: the merged data, or local data if the remote was empty.
    pub data: SyncData,
    pub version: u64,
}

pub struct SyncEngine<C> {
    client: C,
    crypto: Arc<SyncCrypto>,
}

impl<C: ApiClient> SyncEngine<C> {
    pub fn new(client: C, crypto: Arc<SyncCrypto>) -> Self {
        Self { client, crypto }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch and open the remote blob.
    ///
    /// Undecryptable blobs fail with [`SyncError::Decryption`]; blobs that
    /// decrypt to anything but a complete payload fail with
    /// [`SyncError::InvalidPayload`]. Nothing from a failed pull is used.
    pub async fn pull(&self) -> SyncResult<PullResult> {
        let remote = self.client.get_sync_data().await?;

        let Some(envelope) = remote.encrypted_data else {
            debug!(version = remote.version, "remote has no blob");
            return Ok(PullResult {
                data: None,
                version: 0,
                timestamp: None,
                device_id: None,
            });
        };

        let plaintext = self.crypto.decrypt(&envelope).map_err(|e| match e {
            SyncError::InvalidPayload(_) | SyncError::Decryption(_) => e,
            other => SyncError::Decryption(other.to_string()),
        })?;
        let payload = SyncPayload::from_value(plaintext)?;

        if payload.version != remote.version {
            warn!(
                payload = payload.version,
                server = remote.version,
                "payload version differs from server version, trusting server"
            );
        }
        debug!(
            version = remote.version,
            from = %payload.device_id,
            cards = payload.data.cards.len(),
            "pulled remote settings"
        );

        Ok(PullResult {
            data: Some(payload.data),
            version: remote.version,
            timestamp: Some(payload.timestamp),
            device_id: Some(payload.device_id),
        })
    }

    /// Encrypt `data` as version `version + 1` and submit it conditionally.
    pub async fn push(
        &self,
        data: &SyncData,
        version: u64,
        device_id: &str,
    ) -> SyncResult<PushResult> {
        let next = version.checked_add(1).ok_or_else(|| {
            SyncError::InvalidPayload(format!("server version {version} cannot advance"))
        })?;
        let payload = SyncPayload {
            version: next,
            device_id: device_id.to_string(),
            timestamp: now_millis(),
            data: data.clone(),
        };
        let envelope = self.crypto.encrypt(&payload)?;

        let resp = self.client.put_sync_data(&envelope, next).await?;
        debug!(version = resp.version, "pushed settings");
        Ok(PushResult {
            version: resp.version,
        })
    }

    /// Pull, merge with `local`, and push against the pulled version.
    ///
    /// `current_version` is what the caller last saw; it is only logged.
    pub async fn sync(
        &self,
        local: &SyncData,
        current_version: u64,
        device_id: &str,
    ) -> SyncResult<SyncRound> {
        let pulled = self.pull().await?;

        if pulled.version != current_version {
            debug!(
                local = current_version,
                remote = pulled.version,
                "remote moved since last sync"
            );
        }

        let data = match &pulled.data {
            Some(remote) => merge_sync_data(local, remote),
            None => local.clone(),
        };

        let pushed = self.push(&data, pulled.version, device_id).await?;
        info!(version = pushed.version, cards = data.cards.len(), "sync complete");
        Ok(SyncRound {
            data,
            version: pushed.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryApiClient, MemoryRemote};
    use secrecy::SecretString;
    use subcap_core::{CardSettings, EncryptedEnvelope};

    const ITERATIONS: u32 = 1_000;

    fn crypto(passphrase: &str) -> Arc<SyncCrypto> {
        Arc::new(SyncCrypto::new(SecretString::from(passphrase), ITERATIONS).unwrap())
    }

    async fn account(remote: &MemoryRemote) -> MemoryApiClient {
        let auth = remote
            .client(None)
            .register("a@example.com", "hash", "free")
            .await
            .unwrap();
        remote.client(Some(&auth.token))
    }

    fn data_with(card: &str, merchant: &str, category: &str) -> SyncData {
        let mut settings = CardSettings::default();
        settings
            .merchant_map
            .insert(merchant.to_string(), category.to_string());
        let mut data = SyncData::default();
        data.cards.insert(card.to_string(), settings);
        data
    }

    #[tokio::test]
    async fn test_pull_empty_account() {
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(account(&remote).await, crypto("pw"));

        let pulled = engine.pull().await.unwrap();
        assert_eq!(pulled.data, None);
        assert_eq!(pulled.version, 0);
        assert_eq!(pulled.timestamp, None);
    }

    #[tokio::test]
    async fn test_push_then_pull() {
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(account(&remote).await, crypto("pw"));
        let data = data_with("UOB", "GRAB", "Transport");

        let pushed = engine.push(&data, 0, "device-1").await.unwrap();
        assert_eq!(pushed.version, 1);

        let pulled = engine.pull().await.unwrap();
        assert_eq!(pulled.data, Some(data));
        assert_eq!(pulled.version, 1);
        assert_eq!(pulled.device_id.as_deref(), Some("device-1"));
        assert!(pulled.timestamp.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_decryption_error() {
        let remote = MemoryRemote::new();
        SyncEngine::new(account(&remote).await, crypto("right"))
            .push(&SyncData::default(), 0, "device-1")
            .await
            .unwrap();

        let auth = remote
            .client(None)
            .login("a@example.com", "hash")
            .await
            .unwrap();
        let other = SyncEngine::new(remote.client(Some(&auth.token)), crypto("wrong"));
        let err = other.pull().await.unwrap_err();
        assert!(matches!(err, SyncError::Decryption(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_garbage_blob_is_decryption_error() {
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(account(&remote).await, crypto("pw"));
        remote.force_blob(
            "a@example.com",
            3,
            Some(EncryptedEnvelope {
                ciphertext: "%%%".into(),
                iv: "%%%".into(),
                salt: None,
            }),
        );

        assert!(matches!(
            engine.pull().await.unwrap_err(),
            SyncError::Decryption(_)
        ));
    }

    #[tokio::test]
    async fn test_incomplete_payload_is_invalid() {
        let remote = MemoryRemote::new();
        let crypto = crypto("pw");
        let engine = SyncEngine::new(account(&remote).await, crypto.clone());

        let envelope = crypto
            .encrypt(&serde_json::json!({ "version": 1, "data": { "cards": {} } }))
            .unwrap();
        remote.force_blob("a@example.com", 1, Some(envelope));

        assert!(matches!(
            engine.pull().await.unwrap_err(),
            SyncError::InvalidPayload(_)
        ));
    }

    #[tokio::test]
    async fn test_sync_with_empty_remote_pushes_local_at_version_one() {
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(account(&remote).await, crypto("pw"));
        let local = data_with("UOB", "GRAB", "Transport");

        let result = engine.sync(&local, 7, "device-1").await.unwrap();
        assert_eq!(result.version, 1);
        assert_eq!(result.data, local);
    }

    #[tokio::test]
    async fn test_exhausted_server_version_is_rejected() {
        let remote = MemoryRemote::new();
        let crypto = crypto("pw");
        let engine = SyncEngine::new(account(&remote).await, crypto.clone());
        let payload = SyncPayload {
            version: u64::MAX,
            device_id: "device-evil".into(),
            timestamp: 1,
            data: SyncData::default(),
        };
        remote.force_blob("a@example.com", u64::MAX, Some(crypto.encrypt(&payload).unwrap()));

        let err = engine
            .sync(&SyncData::default(), 0, "device-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidPayload(_)), "{err:?}");
        assert_eq!(remote.snapshot("a@example.com").unwrap().version, u64::MAX);
    }

    #[tokio::test]
    async fn test_failed_pull_pushes_nothing() {
        let remote = MemoryRemote::new();
        let engine = SyncEngine::new(account(&remote).await, crypto("pw"));
        remote.set_offline(true);

        let err = engine
            .sync(&data_with("UOB", "A", "B"), 0, "device-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));

        remote.set_offline(false);
        assert_eq!(remote.snapshot("a@example.com").unwrap().version, 0);
    }
}
