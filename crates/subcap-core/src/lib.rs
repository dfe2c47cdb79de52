pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::SubcapConfig;
pub use error::{ErrorKind, SyncError, SyncResult, MALFORMED_PAYLOAD_MESSAGE};
pub use types::{
    now_millis, CardSettings, EncryptedEnvelope, RememberedUnlockCacheEntry, SyncConfig,
    SyncData, SyncPayload,
};
