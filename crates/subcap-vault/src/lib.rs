//! subcap-vault: device-bound protection for the cached passphrase
//!
//! Two layers:
//!   1. [`SecretVault`] encrypts short secrets under a per-device key held
//!      in a [`DeviceKeyStore`] (the platform keychain in production).
//!   2. [`RememberedUnlockCache`] persists the vault-encrypted passphrase
//!      under a host-scoped key with an expiry.
//!
//! Neither layer is required for correctness. When [`SecretVault::is_available`]
//! is false, "remember unlock" is simply unsupported on this device.

pub mod cache;
pub mod keystore;
pub mod vault;

pub use cache::{
    classify_entry, scoped_key, CacheOwner, CacheState, RememberedUnlockCache,
    CACHE_ENTRY_VERSION, LEGACY_CACHE_KEY,
};
pub use keystore::{DeviceKeyStore, KeychainKeyStore, MemoryKeyStore};
pub use vault::{parse_envelope, SecretVault, DEVICE_KEY_HANDLE_KEY};

use std::sync::Arc;
use std::time::Duration;
use subcap_core::config::VaultConfig;
use subcap_storage::StorageAdapter;

/// Open the remembered-unlock cache described by `config`.
pub fn open_cache<S: StorageAdapter>(
    storage: Arc<S>,
    config: &VaultConfig,
) -> RememberedUnlockCache<S> {
    RememberedUnlockCache::new(
        storage,
        &config.cache_scope,
        Duration::from_secs(config.remember_unlock_ttl_secs),
    )
}
