//! subcap-sync: encrypted multi-device sync of card settings
//!
//! Layers, leaf first:
//!   - `transport`: the [`ApiClient`] contract, with HTTP and in-memory clients
//!   - `merge`: field-level merge of two devices' settings
//!   - `engine`: one pull → merge → push round
//!   - `manager`: setup/unlock/lock/disable lifecycle and the UI entry points

pub mod engine;
pub mod http;
pub mod manager;
pub mod memory;
pub mod merge;
pub mod outcome;
pub mod transport;

pub use engine::{PullResult, PushResult, SyncEngine, SyncRound};
pub use http::{HttpApiClient, HttpClientFactory};
pub use manager::{
    is_confirmed_remembered_unlock_auth_failure, is_malformed_remembered_unlock_error,
    SyncManager, SyncState, SyncStatus, UnlockOptions, SYNC_CONFIG_KEY,
};
pub use memory::{MemoryApiClient, MemoryClientFactory, MemoryRemote};
pub use merge::{merge_card_settings, merge_sync_data};
pub use outcome::Outcome;
pub use transport::{
    validate_server_url, ApiClient, AuthResponse, ClientFactory, MerchantMappings,
    PutSyncResponse, RemoteSyncState,
};
