//! Remembered-unlock cache
//!
//! A host-scoped, time-limited entry holding the passphrase encrypted under
//! the device vault key. Entries move through
//! `Missing -> Valid -> {Expired | Malformed}`; terminal states are deleted
//! on the next [`RememberedUnlockCache::read`].

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use subcap_core::{EncryptedEnvelope, RememberedUnlockCacheEntry, SyncResult};
use subcap_storage::StorageAdapter;
use tracing::{debug, warn};

/// Prefix of the host-scoped cache key.
pub const CACHE_KEY_PREFIX: &str = "ccSubcapRememberedUnlock";

/// Unscoped key written by older builds. Read once, migrated, then removed.
pub const LEGACY_CACHE_KEY: &str = CACHE_KEY_PREFIX;

pub const CACHE_ENTRY_VERSION: u32 = 1;

pub fn scoped_key(scope: &str) -> String {
    format!("{CACHE_KEY_PREFIX}:{scope}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheState {
    Missing,
    Valid(RememberedUnlockCacheEntry),
    Expired,
    /// Failed structural validation. Nothing in the entry is trusted.
    Malformed(String),
    /// Well-formed and unexpired, but written for another account or server.
    Mismatched(String),
}

impl CacheState {
    pub fn label(&self) -> &'static str {
        match self {
            CacheState::Missing => "missing",
            CacheState::Valid(_) => "valid",
            CacheState::Expired => "expired",
            CacheState::Malformed(_) => "malformed",
            CacheState::Mismatched(_) => "mismatched",
        }
    }

    /// States that must be deleted from storage once observed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CacheState::Expired | CacheState::Malformed(_) | CacheState::Mismatched(_)
        )
    }
}

/// Who the entry must belong to. `None` fields are not checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOwner<'a> {
    pub email: Option<&'a str>,
    pub server_url: Option<&'a str>,
}

/// Classify a raw stored entry. Pure; performs no I/O.
pub fn classify_entry(raw: &str, now: u64, owner: CacheOwner<'_>) -> CacheState {
    let entry = match validate_shape(raw) {
        Ok(entry) => entry,
        Err(reason) => return CacheState::Malformed(reason),
    };

    if entry.expires_at <= now {
        return CacheState::Expired;
    }

    if let (Some(cached), Some(expected)) = (entry.email.as_deref(), owner.email) {
        if normalize_email(cached) != normalize_email(expected) {
            return CacheState::Mismatched("email".into());
        }
    }
    if let (Some(cached), Some(expected)) = (entry.server_url.as_deref(), owner.server_url) {
        if normalize_url(cached) != normalize_url(expected) {
            return CacheState::Mismatched("serverUrl".into());
        }
    }

    CacheState::Valid(entry)
}

fn validate_shape(raw: &str) -> Result<RememberedUnlockCacheEntry, String> {
    let value: Value = serde_json::from_str(raw).map_err(|_| "not JSON".to_string())?;
    let obj = value.as_object().ok_or("not an object")?;

    let version = obj
        .get("version")
        .and_then(Value::as_u64)
        .ok_or("missing version")?;
    if version != u64::from(CACHE_ENTRY_VERSION) {
        return Err(format!("unsupported version {version}"));
    }

    let created_at = obj
        .get("createdAt")
        .and_then(Value::as_u64)
        .ok_or("missing createdAt")?;
    let expires_at = obj
        .get("expiresAt")
        .and_then(Value::as_u64)
        .ok_or("missing expiresAt")?;

    let optional_str = |name: &str| -> Result<Option<String>, String> {
        match obj.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(format!("{name} is not a string")),
        }
    };
    let email = optional_str("email")?;
    let server_url = optional_str("serverUrl")?;

    let encrypted = obj
        .get("encrypted")
        .and_then(Value::as_object)
        .ok_or("missing encrypted envelope")?;
    let ciphertext = encrypted
        .get("ciphertext")
        .and_then(Value::as_str)
        .ok_or("ciphertext is not a string")?;
    let iv = encrypted
        .get("iv")
        .and_then(Value::as_str)
        .ok_or("iv is not a string")?;

    Ok(RememberedUnlockCacheEntry {
        version: CACHE_ENTRY_VERSION,
        email,
        server_url,
        created_at,
        expires_at,
        encrypted: EncryptedEnvelope {
            ciphertext: ciphertext.to_string(),
            iv: iv.to_string(),
            salt: None,
        },
    })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn normalize_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// Storage-backed access to the cache entry for one scope.
pub struct RememberedUnlockCache<S> {
    storage: Arc<S>,
    scope: String,
    ttl: Duration,
}

impl<S: StorageAdapter> RememberedUnlockCache<S> {
    pub fn new(storage: Arc<S>, scope: &str, ttl: Duration) -> Self {
        Self {
            storage,
            scope: scope.to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> String {
        scoped_key(&self.scope)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Raw entry for this scope, migrating the legacy key if only it exists.
    async fn load_raw(&self) -> SyncResult<Option<String>> {
        let key = self.key();
        if let Some(raw) = self.storage.get(&key).await? {
            return Ok(Some(raw));
        }

        let Some(raw) = self.storage.get(LEGACY_CACHE_KEY).await? else {
            return Ok(None);
        };
        self.storage.set(&key, &raw).await?;
        if let Err(e) = self.storage.remove(LEGACY_CACHE_KEY).await {
            warn!("removing legacy remembered-unlock entry failed: {e}");
        }
        debug!(key, "migrated legacy remembered-unlock entry");
        Ok(Some(raw))
    }

    /// Load and classify the entry, deleting it if it is in a terminal state.
    pub async fn read(&self, owner: CacheOwner<'_>) -> SyncResult<CacheState> {
        let state = match self.load_raw().await? {
            None => CacheState::Missing,
            Some(raw) => classify_entry(&raw, subcap_core::now_millis(), owner),
        };

        if state.is_terminal() {
            debug!(state = state.label(), "discarding remembered-unlock entry");
            self.clear().await?;
        }
        Ok(state)
    }

    /// Classify without migrating or deleting anything.
    pub async fn peek(&self, owner: CacheOwner<'_>) -> SyncResult<CacheState> {
        let raw = match self.storage.get(&self.key()).await? {
            Some(raw) => Some(raw),
            None => self.storage.get(LEGACY_CACHE_KEY).await?,
        };
        Ok(match raw {
            None => CacheState::Missing,
            Some(raw) => classify_entry(&raw, subcap_core::now_millis(), owner),
        })
    }

    pub fn build_entry(
        &self,
        email: Option<&str>,
        server_url: Option<&str>,
        encrypted: EncryptedEnvelope,
        now: u64,
    ) -> RememberedUnlockCacheEntry {
        RememberedUnlockCacheEntry {
            version: CACHE_ENTRY_VERSION,
            email: email.map(str::to_string),
            server_url: server_url.map(str::to_string),
            created_at: now,
            expires_at: now.saturating_add(self.ttl.as_millis() as u64),
            encrypted,
        }
    }

    pub async fn store(&self, entry: &RememberedUnlockCacheEntry) -> SyncResult<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| subcap_core::SyncError::Storage(format!("serialize cache entry: {e}")))?;
        self.storage.set(&self.key(), &json).await
    }

    /// Remove both the scoped and the legacy entry.
    pub async fn clear(&self) -> SyncResult<()> {
        self.storage.remove(&self.key()).await?;
        self.storage.remove(LEGACY_CACHE_KEY).await
    }
}
