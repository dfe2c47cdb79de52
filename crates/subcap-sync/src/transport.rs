//! Transport contract between the sync engine and the sync server.
//!
//! The server only ever sees the password hash and the encrypted envelope.
//! Implementations must reject non-2xx responses with an error carrying the
//! server's message; an HTTP 409 on `put_sync_data` is [`SyncError::Conflict`].

use indexmap::IndexMap;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::future::Future;
use subcap_core::{EncryptedEnvelope, SyncError, SyncResult};

/// Merchant name → category, as shared between users of the same card.
pub type MerchantMappings = IndexMap<String, String>;

/// Tier requested when registering a new account.
pub const DEFAULT_TIER: &str = "free";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    #[serde(default)]
    pub tier: Option<String>,
}

/// What the server holds for this account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSyncState {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub encrypted_data: Option<EncryptedEnvelope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutSyncResponse {
    pub version: u64,
}

pub trait ApiClient: Send + Sync {
    fn login(
        &self,
        email: &str,
        password_hash: &str,
    ) -> impl Future<Output = SyncResult<AuthResponse>> + Send;

    fn register(
        &self,
        email: &str,
        password_hash: &str,
        tier: &str,
    ) -> impl Future<Output = SyncResult<AuthResponse>> + Send;

    fn get_sync_data(&self) -> impl Future<Output = SyncResult<RemoteSyncState>> + Send;

    /// Conditional write: applied only if the stored version is below `version`.
    fn put_sync_data(
        &self,
        envelope: &EncryptedEnvelope,
        version: u64,
    ) -> impl Future<Output = SyncResult<PutSyncResponse>> + Send;

    fn get_shared_mappings(
        &self,
        card_type: &str,
    ) -> impl Future<Output = SyncResult<MerchantMappings>> + Send;

    fn contribute_mappings(
        &self,
        card_type: &str,
        mappings: &MerchantMappings,
    ) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Builds clients from persisted configuration.
pub trait ClientFactory: Send + Sync {
    type Client: ApiClient;

    /// Fails with [`SyncError::Configuration`] if a client cannot be built
    /// for `server_url`. No network I/O happens here.
    fn build(&self, server_url: &str, token: Option<&str>) -> SyncResult<Self::Client>;
}

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_server_url(raw: &str) -> SyncResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SyncError::Configuration("Server URL is required".into()));
    }

    let url = Url::parse(raw)
        .map_err(|e| SyncError::Configuration(format!("Server URL is invalid: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(SyncError::Configuration(format!(
                "Server URL must use HTTP or HTTPS (got {other}:)"
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SyncError::Configuration("Server URL must include a host".into()));
    }
    Ok(url)
}
