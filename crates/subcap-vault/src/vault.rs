//! Device-bound secret vault
//!
//! Encrypts short secrets (the cached passphrase) under a per-device key that
//! never leaves the device's key store. Losing the key store makes every
//! vault envelope permanently unreadable, which callers must treat as
//! "remembering is unavailable", never as a hard failure.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use subcap_core::{EncryptedEnvelope, SyncError, SyncResult};
use subcap_crypto::{decrypt_bytes, encrypt_bytes, SymmetricKey, KEY_SIZE};
use subcap_storage::{is_healthy, StorageAdapter};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::keystore::DeviceKeyStore;

/// Local-store key holding the opaque handle of this device's vault key.
pub const DEVICE_KEY_HANDLE_KEY: &str = "ccSubcapDeviceVaultKeyHandle";

pub struct SecretVault<S, K> {
    storage: Arc<S>,
    keys: K,
}

impl<S: StorageAdapter, K: DeviceKeyStore> SecretVault<S, K> {
    pub fn new(storage: Arc<S>, keys: K) -> Self {
        Self { storage, keys }
    }

    /// True only if the key primitive exists and the local store is durable and writable.
    pub async fn is_available(&self) -> bool {
        self.keys.is_available() && self.storage.is_durable() && is_healthy(&*self.storage).await
    }

    /// Return this device's vault key, generating and filing one on first use.
    pub async fn get_or_create_device_key(&self) -> SyncResult<SymmetricKey> {
        if let Some(handle) = self.storage.get(DEVICE_KEY_HANDLE_KEY).await? {
            match self.keys.load(&handle)? {
                Some(material) => return decode_key(&material),
                None => warn!(handle, "device key handle has no key material, regenerating"),
            }
        }

        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        let material = SecretString::from(STANDARD.encode(bytes));
        let key = SymmetricKey::from_bytes(bytes);
        bytes.zeroize();

        let handle = format!("device-vault-key-{}", uuid::Uuid::new_v4());
        self.keys.store(&handle, &material)?;
        self.storage.set(DEVICE_KEY_HANDLE_KEY, &handle).await?;
        debug!(handle, "created device vault key");
        Ok(key)
    }

    /// Encrypt `plaintext` under the device key with a fresh IV.
    pub async fn encrypt_text(&self, plaintext: &SecretString) -> SyncResult<EncryptedEnvelope> {
        let key = self.get_or_create_device_key().await?;
        encrypt_bytes(&key, plaintext.expose_secret().as_bytes())
    }

    /// Decrypt an envelope previously produced by [`encrypt_text`](Self::encrypt_text).
    ///
    /// The envelope arrives as untrusted JSON: anything but an object with
    /// string `ciphertext` and `iv` is [`SyncError::MalformedPayload`].
    pub async fn decrypt_text(&self, envelope: &Value) -> SyncResult<SecretString> {
        let envelope = parse_envelope(envelope)?;
        let key = self.existing_device_key().await?;

        let plaintext = decrypt_bytes(&key, &envelope.ciphertext, &envelope.iv)?;
        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|e| {
                let mut bytes = e.into_bytes();
                bytes.zeroize();
                SyncError::Crypto("vault plaintext is not UTF-8".into())
            })
    }

    /// Forget the device key. Every envelope it produced becomes unreadable.
    pub async fn destroy_device_key(&self) -> SyncResult<()> {
        if let Some(handle) = self.storage.get(DEVICE_KEY_HANDLE_KEY).await? {
            self.keys.delete(&handle)?;
            self.storage.remove(DEVICE_KEY_HANDLE_KEY).await?;
        }
        Ok(())
    }

    async fn existing_device_key(&self) -> SyncResult<SymmetricKey> {
        let handle = self
            .storage
            .get(DEVICE_KEY_HANDLE_KEY)
            .await?
            .ok_or_else(|| SyncError::DeviceKeyLost("no device key on this device".into()))?;
        let material = self
            .keys
            .load(&handle)?
            .ok_or_else(|| SyncError::DeviceKeyLost("device key material is missing".into()))?;
        decode_key(&material)
    }
}

/// Structurally validate an untrusted envelope.
pub fn parse_envelope(value: &Value) -> SyncResult<EncryptedEnvelope> {
    let obj = value.as_object().ok_or(SyncError::MalformedPayload)?;
    let field = |name: &str| -> SyncResult<String> {
        obj.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(SyncError::MalformedPayload)
    };
    let salt = match obj.get("salt") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(SyncError::MalformedPayload),
    };
    Ok(EncryptedEnvelope {
        ciphertext: field("ciphertext")?,
        iv: field("iv")?,
        salt,
    })
}

fn decode_key(material: &SecretString) -> SyncResult<SymmetricKey> {
    let mut raw = STANDARD
        .decode(material.expose_secret())
        .map_err(|_| SyncError::DeviceKeyLost("device key material is undecodable".into()))?;
    if raw.len() != KEY_SIZE {
        raw.zeroize();
        return Err(SyncError::DeviceKeyLost(
            "device key material has the wrong length".into(),
        ));
    }
    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&raw);
    raw.zeroize();
    let key = SymmetricKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}
