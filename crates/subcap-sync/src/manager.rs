//! Sync manager: account lifecycle and the single entry point for the UI.
//!
//! States: `Disabled → Locked → Unlocked`. Setup and unlock hold the
//! passphrase-derived key in memory; lock and disable drop it. Every public
//! operation returns an [`Outcome`] so expected failures never surface as
//! panics or raw errors.

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use subcap_core::config::SubcapConfig;
use subcap_core::{
    now_millis, ErrorKind, SyncConfig, SyncData, SyncError, SyncResult, MALFORMED_PAYLOAD_MESSAGE,
};
use subcap_crypto::{generate_device_id, hash_passphrase, SyncCrypto};
use subcap_storage::StorageAdapter;
use subcap_vault::{
    open_cache, CacheOwner, CacheState, DeviceKeyStore, RememberedUnlockCache, SecretVault,
};
use tracing::{debug, info, warn};

use crate::engine::{SyncEngine, SyncRound};
use crate::outcome::Outcome;
use crate::transport::{
    validate_server_url, ApiClient, AuthResponse, ClientFactory, MerchantMappings, DEFAULT_TIER,
};

/// Local-store key of the persisted [`SyncConfig`].
pub const SYNC_CONFIG_KEY: &str = "ccSubcapSyncConfig";

const REMEMBER_WARNING: &str = "Unlocked, but the unlock could not be remembered on this device";

// ── Classifiers ───────────────────────────────────────────────────────────────

/// True if `message` is the server telling us the credentials are wrong.
pub fn is_confirmed_remembered_unlock_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("invalid credentials") || message.contains("unauthorized")
}

/// True if a remembered-unlock failure came from the local cache itself
/// (unreadable envelope, vault tag mismatch) rather than the account.
pub fn is_malformed_remembered_unlock_error(err: &SyncError) -> bool {
    match err {
        SyncError::Authentication
        | SyncError::MalformedPayload
        | SyncError::MalformedCache(_)
        | SyncError::Crypto(_) => true,
        other => other.to_string().contains(MALFORMED_PAYLOAD_MESSAGE),
    }
}

/// True if the device key that sealed a remembered unlock can never come back.
fn is_lost_device_key_error(err: &SyncError) -> bool {
    matches!(err, SyncError::DeviceKeyLost(_))
}

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct UnlockOptions {
    /// Keep a vault-encrypted copy of the passphrase for silent unlock.
    pub remember: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Disabled,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub enabled: bool,
    pub unlocked: bool,
    pub device_id: String,
    pub device_name: String,
    pub email: String,
    pub server_url: String,
    pub version: u64,
    pub last_sync: Option<u64>,
    pub remember_unlock: bool,
    pub remembered_unlock_available: bool,
}

/// Key material held while unlocked.
struct Session {
    crypto: Arc<SyncCrypto>,
    from_cache: bool,
}

pub struct SyncManager<S, F, K> {
    storage: Arc<S>,
    factory: F,
    vault: SecretVault<S, K>,
    cache: RememberedUnlockCache<S>,
    kdf_iterations: u32,
    config: SyncConfig,
    session: Option<Session>,
}

impl<S, F, K> SyncManager<S, F, K>
where
    S: StorageAdapter,
    F: ClientFactory,
    K: DeviceKeyStore,
{
    /// Build a manager over `storage`, loading any persisted [`SyncConfig`].
    ///
    /// An unreadable persisted config is treated as "sync disabled".
    pub async fn load(
        storage: Arc<S>,
        factory: F,
        keys: K,
        settings: &SubcapConfig,
    ) -> SyncResult<Self> {
        let config = match storage.get(SYNC_CONFIG_KEY).await? {
            None => SyncConfig::default(),
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("persisted sync config is unreadable, starting disabled: {e}");
                SyncConfig::default()
            }),
        };

        Ok(Self {
            vault: SecretVault::new(storage.clone(), keys),
            cache: open_cache(storage.clone(), &settings.vault),
            storage,
            factory,
            kdf_iterations: settings.crypto.kdf_iterations,
            config,
            session: None,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        match (self.config.enabled, self.session.is_some()) {
            (false, _) => SyncState::Disabled,
            (true, false) => SyncState::Locked,
            (true, true) => SyncState::Unlocked,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SyncState::Unlocked
    }

    // ── Setup ────────────────────────────────────────────────────────────────

    /// Sign in (or register) and persist a fresh config.
    ///
    /// Nothing is persisted unless every step succeeds. On success the
    /// manager is unlocked with the new key material.
    pub async fn setup_sync(
        &mut self,
        email: &str,
        passphrase: SecretString,
        server_url: &str,
        prefer_register: bool,
    ) -> Outcome<()> {
        let server_url = match validate_server_url(server_url) {
            Ok(_) => server_url.trim().to_string(),
            Err(e) => return Outcome::failed(&e),
        };
        let email = email.trim().to_string();
        if email.is_empty() {
            return Outcome::failed_message(ErrorKind::Configuration, "Email is required");
        }
        if passphrase.expose_secret().is_empty() {
            return Outcome::failed_message(ErrorKind::Configuration, "Password is required");
        }

        let client = match self.factory.build(&server_url, None) {
            Ok(client) => client,
            Err(e) => return Outcome::failed(&e),
        };

        let device_id = generate_device_id();
        let crypto = match SyncCrypto::new(passphrase.clone(), self.kdf_iterations) {
            Ok(crypto) => crypto,
            Err(e) => return Outcome::failed_during("Setup failed", &e),
        };
        let password_hash = match hash_passphrase(&passphrase, &email, self.kdf_iterations) {
            Ok(hash) => hash,
            Err(e) => return Outcome::failed_during("Setup failed", &e),
        };

        let auth = match self
            .authenticate(&client, &email, &password_hash, prefer_register)
            .await
        {
            Ok(auth) => auth,
            Err(e) => return Outcome::failed_during("Setup failed", &e),
        };

        let config = SyncConfig {
            enabled: true,
            device_id,
            device_name: device_name(),
            email,
            token: auth.token,
            tier: auth.tier.unwrap_or_else(|| DEFAULT_TIER.to_string()),
            share_mappings: true,
            server_url,
            version: 0,
            last_sync: None,
            remember_unlock: self.config.remember_unlock,
        };
        if let Err(e) = persist_config(&*self.storage, &config).await {
            return Outcome::failed_during("Setup failed", &e);
        }

        info!(device = %config.device_id, tier = %config.tier, "sync set up");
        self.config = config;
        self.session = Some(Session {
            crypto: Arc::new(crypto),
            from_cache: false,
        });
        Outcome::done()
    }

    async fn authenticate(
        &self,
        client: &F::Client,
        email: &str,
        password_hash: &str,
        prefer_register: bool,
    ) -> SyncResult<AuthResponse> {
        if prefer_register {
            return client.register(email, password_hash, DEFAULT_TIER).await;
        }

        let login_err = match client.login(email, password_hash).await {
            Ok(auth) => return Ok(auth),
            Err(e) => e,
        };
        debug!("login failed, trying registration: {login_err}");
        client
            .register(email, password_hash, DEFAULT_TIER)
            .await
            .map_err(|register_err| match register_err {
                SyncError::Transport(msg) => {
                    SyncError::Transport(format!("{login_err}; registration: {msg}"))
                }
                other => other,
            })
    }

    // ── Unlock / lock ────────────────────────────────────────────────────────

    /// Derive key material from `passphrase`, optionally remembering it.
    ///
    /// Failing to remember only adds a warning; the unlock still succeeds.
    pub async fn unlock_sync(
        &mut self,
        passphrase: SecretString,
        options: UnlockOptions,
    ) -> Outcome<()> {
        if !self.config.enabled {
            return Outcome::failed(&SyncError::NotEnabled);
        }
        if passphrase.expose_secret().is_empty() {
            return Outcome::failed_message(ErrorKind::Configuration, "Password is required");
        }

        let crypto = match SyncCrypto::new(passphrase.clone(), self.kdf_iterations) {
            Ok(crypto) => crypto,
            Err(e) => return Outcome::failed_during("Unlock failed", &e),
        };
        self.session = Some(Session {
            crypto: Arc::new(crypto),
            from_cache: false,
        });
        info!("sync unlocked");

        if !options.remember {
            return Outcome::done();
        }
        match self.remember(&passphrase).await {
            Ok(()) => Outcome::done(),
            Err(e) => {
                warn!("could not remember unlock: {e}");
                Outcome::done().with_warning(format!("{REMEMBER_WARNING}: {e}"))
            }
        }
    }

    async fn remember(&mut self, passphrase: &SecretString) -> SyncResult<()> {
        if !self.vault.is_available().await {
            return Err(SyncError::VaultUnavailable(
                "remembering unlock is not supported on this device".into(),
            ));
        }
        let encrypted = self.vault.encrypt_text(passphrase).await?;
        let entry = self.cache.build_entry(
            Some(&self.config.email),
            Some(&self.config.server_url),
            encrypted,
            now_millis(),
        );
        self.cache.store(&entry).await?;

        if !self.config.remember_unlock {
            let mut config = self.config.clone();
            config.remember_unlock = true;
            persist_config(&*self.storage, &config).await?;
            self.config = config;
        }
        debug!(expires_at = entry.expires_at, "remembered unlock");
        Ok(())
    }

    /// Unlock silently from the remembered-unlock cache.
    ///
    /// Returns `false` on any failure. Expired, malformed and mismatched
    /// entries are deleted, as are entries that fail to decrypt for reasons
    /// tied to the entry itself. A vault that is merely unavailable right
    /// now keeps its entry.
    pub async fn try_unlock_from_remembered_cache(&mut self) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.session.is_some() {
            return true;
        }

        let state = match self.cache.read(self.cache_owner()).await {
            Ok(state) => state,
            Err(e) => {
                warn!("reading remembered unlock failed: {e}");
                return false;
            }
        };
        let entry = match state {
            CacheState::Valid(entry) => entry,
            other => {
                debug!(state = other.label(), "no usable remembered unlock");
                return false;
            }
        };

        let envelope = match serde_json::to_value(&entry.encrypted) {
            Ok(v) => v,
            Err(e) => {
                warn!("remembered unlock envelope unserializable: {e}");
                return false;
            }
        };
        let passphrase = match self.vault.decrypt_text(&envelope).await {
            Ok(p) => p,
            Err(e) => {
                if is_malformed_remembered_unlock_error(&e)
                    || is_lost_device_key_error(&e)
                    || is_confirmed_remembered_unlock_auth_failure(&e.to_string())
                {
                    debug!("discarding undecryptable remembered unlock: {e}");
                    self.discard_cache().await;
                } else {
                    warn!("vault could not open remembered unlock: {e}");
                }
                return false;
            }
        };

        let outcome = self.unlock_sync(passphrase, UnlockOptions::default()).await;
        if !outcome.success {
            if outcome
                .error
                .as_deref()
                .is_some_and(is_confirmed_remembered_unlock_auth_failure)
            {
                self.discard_cache().await;
            }
            return false;
        }
        if let Some(session) = self.session.as_mut() {
            session.from_cache = true;
        }
        info!("unlocked from remembered cache");
        true
    }

    /// Drop key material. Config and remembered unlock are kept.
    pub fn lock(&mut self) {
        if self.session.take().is_some() {
            info!("sync locked");
        }
    }

    // ── Sync ─────────────────────────────────────────────────────────────────

    /// Run one pull → merge → push round and persist the new version.
    pub async fn sync(&mut self, local: &SyncData) -> Outcome<SyncRound> {
        if !self.config.enabled {
            return Outcome::failed(&SyncError::NotEnabled);
        }
        if self.session.is_none() {
            self.try_unlock_from_remembered_cache().await;
        }
        let Some(session) = self.session.as_ref() else {
            return Outcome::failed(&SyncError::Locked);
        };

        let client = match self
            .factory
            .build(&self.config.server_url, Some(&self.config.token))
        {
            Ok(client) => client,
            Err(e) => {
                return Outcome::failed_message(
                    ErrorKind::Configuration,
                    format!("Invalid sync configuration: {e}"),
                )
            }
        };
        let from_cache = session.from_cache;
        let engine = SyncEngine::new(client, session.crypto.clone());

        let round = match engine
            .sync(local, self.config.version, &self.config.device_id)
            .await
        {
            Ok(round) => round,
            Err(e) => {
                warn!(kind = ?e.kind(), "sync failed: {e}");
                if from_cache && is_confirmed_remembered_unlock_auth_failure(&e.to_string()) {
                    self.discard_cache().await;
                    self.lock();
                }
                return Outcome::failed_during("Sync failed", &e);
            }
        };

        let mut config = self.config.clone();
        config.version = round.version;
        config.last_sync = Some(now_millis());
        let persisted = persist_config(&*self.storage, &config).await;
        self.config = config;

        match persisted {
            Ok(()) => Outcome::ok(round),
            Err(e) => {
                warn!("could not persist sync state: {e}");
                Outcome::ok(round)
                    .with_warning(format!("Synced, but sync state was not saved: {e}"))
            }
        }
    }

    // ── Shared mappings ──────────────────────────────────────────────────────

    pub async fn get_shared_mappings(&self, card_type: &str) -> Outcome<MerchantMappings> {
        let client = match self.authorized_client() {
            Ok(client) => client,
            Err(outcome) => return outcome,
        };
        match client.get_shared_mappings(card_type).await {
            Ok(mappings) => Outcome::ok(mappings),
            Err(e) => Outcome::failed_during("Fetching shared mappings failed", &e),
        }
    }

    pub async fn contribute_mappings(
        &self,
        card_type: &str,
        mappings: &MerchantMappings,
    ) -> Outcome<()> {
        if self.config.enabled && !self.config.share_mappings {
            return Outcome::done().with_message("Sharing disabled");
        }
        let client = match self.authorized_client() {
            Ok(client) => client,
            Err(outcome) => return outcome,
        };
        match client.contribute_mappings(card_type, mappings).await {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed_during("Contributing mappings failed", &e),
        }
    }

    pub async fn set_share_mappings(&mut self, share: bool) -> Outcome<()> {
        if !self.config.enabled {
            return Outcome::failed(&SyncError::NotEnabled);
        }
        let mut config = self.config.clone();
        config.share_mappings = share;
        if let Err(e) = persist_config(&*self.storage, &config).await {
            return Outcome::failed(&e);
        }
        self.config = config;
        Outcome::done()
    }

    fn authorized_client<T>(&self) -> Result<F::Client, Outcome<T>> {
        if !self.config.enabled {
            return Err(Outcome::failed(&SyncError::NotEnabled));
        }
        self.factory
            .build(&self.config.server_url, Some(&self.config.token))
            .map_err(|e| {
                Outcome::failed_message(
                    ErrorKind::Configuration,
                    format!("Invalid sync configuration: {e}"),
                )
            })
    }

    // ── Disable / cache management ───────────────────────────────────────────

    /// Forget the account on this device. Card settings and the remembered
    /// unlock are left alone.
    pub async fn disable_sync(&mut self) -> Outcome<()> {
        self.session = None;
        let config = SyncConfig::default();
        let persisted = persist_config(&*self.storage, &config).await;
        self.config = config;
        info!("sync disabled");

        match persisted {
            Ok(()) => Outcome::done(),
            Err(e) => Outcome::failed_during("Disabling sync failed", &e),
        }
    }

    /// Delete the remembered unlock; optionally also turn the preference off.
    pub async fn clear_remembered_unlock_cache(&mut self, set_preference_off: bool) -> Outcome<()> {
        if let Err(e) = self.cache.clear().await {
            return Outcome::failed(&e);
        }
        if set_preference_off && self.config.remember_unlock {
            let mut config = self.config.clone();
            config.remember_unlock = false;
            if let Err(e) = persist_config(&*self.storage, &config).await {
                return Outcome::failed(&e);
            }
            self.config = config;
        }
        Outcome::done()
    }

    /// Classify the remembered unlock without changing anything.
    pub async fn remembered_unlock_status(&self) -> Outcome<&'static str> {
        match self.cache.peek(self.cache_owner()).await {
            Ok(state) => Outcome::ok(state.label()),
            Err(e) => Outcome::failed(&e),
        }
    }

    pub async fn status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            state,
            enabled: self.config.enabled,
            unlocked: state == SyncState::Unlocked,
            device_id: self.config.device_id.clone(),
            device_name: self.config.device_name.clone(),
            email: self.config.email.clone(),
            server_url: self.config.server_url.clone(),
            version: self.config.version,
            last_sync: self.config.last_sync,
            remember_unlock: self.config.remember_unlock,
            remembered_unlock_available: self.vault.is_available().await,
        }
    }

    fn cache_owner(&self) -> CacheOwner<'_> {
        CacheOwner {
            email: Some(self.config.email.as_str()).filter(|e| !e.is_empty()),
            server_url: Some(self.config.server_url.as_str()).filter(|u| !u.is_empty()),
        }
    }

    async fn discard_cache(&self) {
        if let Err(e) = self.cache.clear().await {
            warn!("clearing remembered unlock failed: {e}");
        }
    }
}

async fn persist_config<S: StorageAdapter>(storage: &S, config: &SyncConfig) -> SyncResult<()> {
    let json = serde_json::to_string(config)
        .map_err(|e| SyncError::Storage(format!("serialize sync config: {e}")))?;
    storage.set(SYNC_CONFIG_KEY, &json).await
}

fn device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "Unknown device".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_classifier() {
        assert!(is_confirmed_remembered_unlock_auth_failure("HTTP 401: Invalid credentials"));
        assert!(is_confirmed_remembered_unlock_auth_failure("UNAUTHORIZED"));
        assert!(is_confirmed_remembered_unlock_auth_failure("request unauthorized by server"));
        assert!(!is_confirmed_remembered_unlock_auth_failure("network unreachable"));
        assert!(!is_confirmed_remembered_unlock_auth_failure(""));
    }

    #[test]
    fn test_malformed_classifier() {
        assert!(is_malformed_remembered_unlock_error(&SyncError::Authentication));
        assert!(is_malformed_remembered_unlock_error(&SyncError::MalformedPayload));
        assert!(is_malformed_remembered_unlock_error(&SyncError::Crypto("op".into())));
        assert!(is_malformed_remembered_unlock_error(&SyncError::Other(
            anyhow::anyhow!("{MALFORMED_PAYLOAD_MESSAGE}")
        )));
        assert!(!is_malformed_remembered_unlock_error(&SyncError::VaultUnavailable(
            "no keychain".into()
        )));
        assert!(!is_malformed_remembered_unlock_error(&SyncError::Transport(
            "timeout".into()
        )));
    }

    #[test]
    fn test_lost_device_key_classifier() {
        assert!(is_lost_device_key_error(&SyncError::DeviceKeyLost(
            "device key material is missing".into()
        )));
        assert!(!is_lost_device_key_error(&SyncError::VaultUnavailable(
            "keychain locked".into()
        )));
    }

    #[test]
    fn test_device_name_is_never_empty() {
        assert!(!device_name().is_empty());
    }
}
