//! Passphrase-keyed crypto session used by the sync engine
//!
//! Holds the passphrase and the key derived for the current salt. Envelopes
//! carry their salt, so any device knowing the passphrase can open a blob
//! written by any other device. After successfully opening a blob with a
//! different salt, the session adopts that salt so later pushes do not force
//! every peer to re-derive.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use std::sync::RwLock;
use subcap_core::{EncryptedEnvelope, SyncError, SyncResult};
use tracing::debug;

use crate::envelope::{decrypt_json, encrypt_json};
use crate::kdf::{derive_key, SymmetricKey};
use crate::{generate_salt, SALT_SIZE};

struct SaltedKey {
    salt: [u8; SALT_SIZE],
    key: SymmetricKey,
}

pub struct SyncCrypto {
    passphrase: SecretString,
    iterations: u32,
    current: RwLock<SaltedKey>,
}

impl SyncCrypto {
    /// Derive a key for a fresh random salt.
    pub fn new(passphrase: SecretString, iterations: u32) -> SyncResult<Self> {
        let salt = generate_salt();
        let key = derive_key(&passphrase, &salt, iterations)?;
        Ok(Self {
            passphrase,
            iterations,
            current: RwLock::new(SaltedKey { salt, key }),
        })
    }

    /// Base64 of the salt the next envelope will be written with.
    pub fn current_salt(&self) -> SyncResult<String> {
        let current = self.read()?;
        Ok(STANDARD.encode(current.salt))
    }

    /// Encrypt `data` under the current key; the envelope carries the salt.
    pub fn encrypt<T: Serialize + ?Sized>(&self, data: &T) -> SyncResult<EncryptedEnvelope> {
        let current = self.read()?;
        let mut envelope = encrypt_json(&current.key, data)?;
        envelope.salt = Some(STANDARD.encode(current.salt));
        Ok(envelope)
    }

    /// Decrypt an envelope to raw JSON.
    ///
    /// Envelopes without a salt are assumed to use the current key.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> SyncResult<Value> {
        let salt = match envelope.salt.as_deref() {
            Some(encoded) => decode_salt(encoded)?,
            None => {
                let current = self.read()?;
                return decrypt_json(&current.key, &envelope.ciphertext, &envelope.iv);
            }
        };

        {
            let current = self.read()?;
            if salt == current.salt {
                return decrypt_json(&current.key, &envelope.ciphertext, &envelope.iv);
            }
        }

        let key = derive_key(&self.passphrase, &salt, self.iterations)?;
        let value = decrypt_json(&key, &envelope.ciphertext, &envelope.iv)?;

        debug!("adopting remote envelope salt");
        let mut current = self
            .current
            .write()
            .map_err(|_| SyncError::Crypto("key lock poisoned".into()))?;
        *current = SaltedKey { salt, key };
        Ok(value)
    }

    fn read(&self) -> SyncResult<std::sync::RwLockReadGuard<'_, SaltedKey>> {
        self.current
            .read()
            .map_err(|_| SyncError::Crypto("key lock poisoned".into()))
    }
}

impl std::fmt::Debug for SyncCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCrypto")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

fn decode_salt(encoded: &str) -> SyncResult<[u8; SALT_SIZE]> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|_| SyncError::MalformedPayload)?;
    raw.try_into().map_err(|_| SyncError::MalformedPayload)
}
