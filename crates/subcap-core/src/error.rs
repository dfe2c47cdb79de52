use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Literal message used when a locally stored envelope fails shape checks.
///
/// The remembered-unlock classifier matches on this text, so it must not change.
pub const MALFORMED_PAYLOAD_MESSAGE: &str = "Malformed encrypted payload";

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or HTTP failure talking to the sync server.
    #[error("transport error: {0}")]
    Transport(String),

    /// AEAD tag did not verify: tampered ciphertext or wrong key.
    #[error("authentication failed: ciphertext could not be verified")]
    Authentication,

    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Plaintext decrypted fine but is not a well-formed sync payload.
    #[error("invalid sync payload: {0}")]
    InvalidPayload(String),

    /// An envelope handed to the vault is missing fields or has the wrong types.
    #[error("Malformed encrypted payload")]
    MalformedPayload,

    #[error("malformed remembered-unlock cache entry: {0}")]
    MalformedCache(String),

    #[error("secret vault unavailable: {0}")]
    VaultUnavailable(String),

    /// The device key behind a vault envelope is gone for good: no handle,
    /// no material under the handle, or material that cannot be a key.
    #[error("secret vault unavailable: {0}")]
    DeviceKeyLost(String),

    #[error("{0}")]
    Configuration(String),

    /// Optimistic version check lost against another device's write.
    #[error("version conflict: server rejected version {attempted}")]
    Conflict { attempted: u64 },

    #[error("Sync is locked. Enter your passphrase to unlock.")]
    Locked,

    #[error("Sync is not enabled")]
    NotEnabled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stable, serializable classification of a [`SyncError`] for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Authentication,
    Decryption,
    InvalidPayload,
    MalformedPayload,
    MalformedCache,
    VaultUnavailable,
    Configuration,
    Conflict,
    Locked,
    NotEnabled,
    Storage,
    Crypto,
    Internal,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::Authentication => ErrorKind::Authentication,
            SyncError::Decryption(_) => ErrorKind::Decryption,
            SyncError::InvalidPayload(_) => ErrorKind::InvalidPayload,
            SyncError::MalformedPayload => ErrorKind::MalformedPayload,
            SyncError::MalformedCache(_) => ErrorKind::MalformedCache,
            SyncError::VaultUnavailable(_) | SyncError::DeviceKeyLost(_) => {
                ErrorKind::VaultUnavailable
            }
            SyncError::Configuration(_) => ErrorKind::Configuration,
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::Locked => ErrorKind::Locked,
            SyncError::NotEnabled => ErrorKind::NotEnabled,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Crypto(_) => ErrorKind::Crypto,
            SyncError::Other(_) => ErrorKind::Internal,
        }
    }

    /// True for failures where retrying the whole pull-merge-push cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Conflict { .. })
    }
}
