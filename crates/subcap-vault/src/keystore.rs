//! Device key stores: where the vault's non-exportable key material lives.
//!
//! The production store uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: kernel keyutils
//! - Windows: Credential Manager (DPAPI)
//!
//! The local key-value store only ever sees the opaque handle a key is filed
//! under, never the key bytes.

use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Mutex;
use subcap_core::{SyncError, SyncResult};
use zeroize::Zeroize;

const SERVICE_NAME: &str = "subcap-sync";

/// A place to file device key material under an opaque handle.
pub trait DeviceKeyStore: Send + Sync {
    /// Whether the backing key primitive exists on this platform.
    fn is_available(&self) -> bool;

    /// Key material (base64) filed under `handle`, if any.
    fn load(&self, handle: &str) -> SyncResult<Option<SecretString>>;

    fn store(&self, handle: &str, material: &SecretString) -> SyncResult<()>;

    /// Deleting a missing handle is not an error.
    fn delete(&self, handle: &str) -> SyncResult<()>;
}

/// Platform keychain store.
#[derive(Debug, Clone)]
pub struct KeychainKeyStore {
    service: String,
}

impl KeychainKeyStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, handle: &str) -> SyncResult<keyring::Entry> {
        keyring::Entry::new(&self.service, handle)
            .map_err(|e| SyncError::VaultUnavailable(format!("keychain entry creation: {e}")))
    }
}

impl Default for KeychainKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

const PROBE_HANDLE: &str = "__subcap_probe__";

/// A lookup that found nothing still proves the backend is reachable.
fn backend_answered(lookup: &keyring::Result<String>) -> bool {
    match lookup {
        Ok(_) | Err(keyring::Error::NoEntry) => true,
        Err(e) => {
            tracing::debug!("keychain backend unusable: {e}");
            false
        }
    }
}

impl DeviceKeyStore for KeychainKeyStore {
    fn is_available(&self) -> bool {
        match keyring::Entry::new(&self.service, PROBE_HANDLE) {
            Ok(entry) => backend_answered(&entry.get_password()),
            Err(e) => {
                tracing::debug!("keychain entry rejected: {e}");
                false
            }
        }
    }

    fn load(&self, handle: &str) -> SyncResult<Option<SecretString>> {
        match self.entry(handle)?.get_password() {
            Ok(mut material) => {
                let secret = SecretString::from(material.clone());
                material.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SyncError::VaultUnavailable(format!(
                "keychain get for '{handle}': {e}"
            ))),
        }
    }

    fn store(&self, handle: &str, material: &SecretString) -> SyncResult<()> {
        self.entry(handle)?
            .set_password(material.expose_secret())
            .map_err(|e| {
                SyncError::VaultUnavailable(format!("keychain store for '{handle}': {e}"))
            })?;
        tracing::debug!(handle, "stored device key in platform keychain");
        Ok(())
    }

    fn delete(&self, handle: &str) -> SyncResult<()> {
        match self.entry(handle)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(handle, "deleted device key from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()), // already deleted
            Err(e) => Err(SyncError::VaultUnavailable(format!(
                "keychain delete for '{handle}': {e}"
            ))),
        }
    }
}

/// Process-local key store for tests and platforms without a keychain.
#[derive(Debug)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, String>>,
    available: bool,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: true,
        }
    }

    /// A store that reports the key primitive as missing.
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: false,
        }
    }

    /// Overwrite the material under `handle` verbatim.
    pub fn put_raw(&self, handle: &str, material: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(handle.to_string(), material.to_string());
        }
    }

    fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SyncError::VaultUnavailable("key store lock poisoned".into()))
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceKeyStore for MemoryKeyStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn load(&self, handle: &str) -> SyncResult<Option<SecretString>> {
        Ok(self.lock()?.get(handle).cloned().map(SecretString::from))
    }

    fn store(&self, handle: &str, material: &SecretString) -> SyncResult<()> {
        self.lock()?
            .insert(handle.to_string(), material.expose_secret().to_string());
        Ok(())
    }

    fn delete(&self, handle: &str) -> SyncResult<()> {
        self.lock()?.remove(handle);
        Ok(())
    }
}

impl<T: DeviceKeyStore> DeviceKeyStore for std::sync::Arc<T> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn load(&self, handle: &str) -> SyncResult<Option<SecretString>> {
        (**self).load(handle)
    }

    fn store(&self, handle: &str, material: &SecretString) -> SyncResult<()> {
        (**self).store(handle, material)
    }

    fn delete(&self, handle: &str) -> SyncResult<()> {
        (**self).delete(handle)
    }
}
