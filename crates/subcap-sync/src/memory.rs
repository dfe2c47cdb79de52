//! In-process sync server.
//!
//! Models the server contract: one encrypted blob per account behind a
//! version counter, with the conditional write applied atomically. Clients
//! built from the same [`MemoryRemote`] see each other's writes, which makes
//! multi-device scenarios reproducible without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use subcap_core::{EncryptedEnvelope, SyncError, SyncResult};
use tracing::debug;

use crate::transport::{
    validate_server_url, ApiClient, AuthResponse, ClientFactory, MerchantMappings,
    PutSyncResponse, RemoteSyncState,
};

#[derive(Debug)]
struct Account {
    password_hash: String,
    tier: String,
    version: u64,
    blob: Option<EncryptedEnvelope>,
}

#[derive(Debug, Default)]
struct RemoteState {
    accounts: HashMap<String, Account>,
    /// token → email
    sessions: HashMap<String, String>,
    shared: HashMap<String, MerchantMappings>,
    offline: bool,
}

/// Shared server state. Cloning yields another handle to the same server.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
    next_token: Arc<AtomicU64>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Current version and blob stored for `email`.
    pub fn snapshot(&self, email: &str) -> Option<RemoteSyncState> {
        let state = self.state.lock().ok()?;
        state.accounts.get(email).map(|a| RemoteSyncState {
            version: a.version,
            encrypted_data: a.blob.clone(),
        })
    }

    /// Overwrite the stored blob, bypassing the version check.
    pub fn force_blob(&self, email: &str, version: u64, blob: Option<EncryptedEnvelope>) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(account) = state.accounts.get_mut(email) {
                account.version = version;
                account.blob = blob;
            }
        }
    }

    pub fn client(&self, token: Option<&str>) -> MemoryApiClient {
        MemoryApiClient {
            remote: self.clone(),
            token: token.map(str::to_string),
        }
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, RemoteState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| SyncError::Transport("remote lock poisoned".into()))?;
        if state.offline {
            return Err(SyncError::Transport("network unreachable".into()));
        }
        Ok(state)
    }

    fn issue_token(&self, state: &mut RemoteState, email: &str) -> String {
        let token = format!("mem-token-{}", self.next_token.fetch_add(1, Ordering::SeqCst));
        state.sessions.insert(token.clone(), email.to_string());
        token
    }
}

pub struct MemoryApiClient {
    remote: MemoryRemote,
    token: Option<String>,
}

impl MemoryApiClient {
    fn account_email(&self, state: &RemoteState) -> SyncResult<String> {
        self.token
            .as_deref()
            .and_then(|t| state.sessions.get(t))
            .cloned()
            .ok_or_else(|| SyncError::Transport("HTTP 401: Unauthorized".into()))
    }
}

impl ApiClient for MemoryApiClient {
    async fn login(&self, email: &str, password_hash: &str) -> SyncResult<AuthResponse> {
        let mut state = self.remote.lock()?;
        let tier = match state.accounts.get(email) {
            Some(account) if account.password_hash == password_hash => account.tier.clone(),
            _ => return Err(SyncError::Transport("HTTP 401: Invalid credentials".into())),
        };
        let token = self.remote.issue_token(&mut state, email);
        Ok(AuthResponse {
            token,
            tier: Some(tier),
        })
    }

    async fn register(
        &self,
        email: &str,
        password_hash: &str,
        tier: &str,
    ) -> SyncResult<AuthResponse> {
        let mut state = self.remote.lock()?;
        if state.accounts.contains_key(email) {
            return Err(SyncError::Transport("HTTP 409: Account already exists".into()));
        }
        state.accounts.insert(
            email.to_string(),
            Account {
                password_hash: password_hash.to_string(),
                tier: tier.to_string(),
                version: 0,
                blob: None,
            },
        );
        let token = self.remote.issue_token(&mut state, email);
        Ok(AuthResponse {
            token,
            tier: Some(tier.to_string()),
        })
    }

    async fn get_sync_data(&self) -> SyncResult<RemoteSyncState> {
        let state = self.remote.lock()?;
        let email = self.account_email(&state)?;
        let account = state
            .accounts
            .get(&email)
            .ok_or_else(|| SyncError::Transport("HTTP 404: Account not found".into()))?;
        Ok(RemoteSyncState {
            version: account.version,
            encrypted_data: account.blob.clone(),
        })
    }

    async fn put_sync_data(
        &self,
        envelope: &EncryptedEnvelope,
        version: u64,
    ) -> SyncResult<PutSyncResponse> {
        let mut state = self.remote.lock()?;
        let email = self.account_email(&state)?;
        let account = state
            .accounts
            .get_mut(&email)
            .ok_or_else(|| SyncError::Transport("HTTP 404: Account not found".into()))?;

        if version <= account.version {
            debug!(stored = account.version, attempted = version, "rejecting stale write");
            return Err(SyncError::Conflict { attempted: version });
        }
        account.version = version;
        account.blob = Some(envelope.clone());
        Ok(PutSyncResponse { version })
    }

    async fn get_shared_mappings(&self, card_type: &str) -> SyncResult<MerchantMappings> {
        let state = self.remote.lock()?;
        self.account_email(&state)?;
        Ok(state.shared.get(card_type).cloned().unwrap_or_default())
    }

    async fn contribute_mappings(
        &self,
        card_type: &str,
        mappings: &MerchantMappings,
    ) -> SyncResult<()> {
        let mut state = self.remote.lock()?;
        self.account_email(&state)?;
        let shared = state.shared.entry(card_type.to_string()).or_default();
        for (merchant, category) in mappings {
            shared.insert(merchant.clone(), category.clone());
        }
        Ok(())
    }
}

/// Client factory over a [`MemoryRemote`]. URLs are validated like the HTTP
/// factory does, so configuration errors surface the same way.
#[derive(Debug, Clone, Default)]
pub struct MemoryClientFactory {
    remote: MemoryRemote,
}

impl MemoryClientFactory {
    pub fn new(remote: MemoryRemote) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &MemoryRemote {
        &self.remote
    }
}

impl ClientFactory for MemoryClientFactory {
    type Client = MemoryApiClient;

    fn build(&self, server_url: &str, token: Option<&str>) -> SyncResult<MemoryApiClient> {
        validate_server_url(server_url)?;
        Ok(self.remote.client(token))
    }
}
