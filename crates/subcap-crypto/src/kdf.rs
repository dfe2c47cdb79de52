//! Key derivation: PBKDF2-HMAC-SHA256 passphrase → symmetric key

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::num::NonZeroU32;
use subcap_core::{SyncError, SyncResult};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// PBKDF2-HMAC-SHA256 iteration floor (OWASP 2023).
pub const DEFAULT_KDF_ITERATIONS: u32 = 310_000;

/// Domain tag mixed into the server-facing hash salt.
const AUTH_SALT_DOMAIN: &[u8] = b"subcap-sync:auth:";

/// A 256-bit AES-GCM key.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from a passphrase and salt using PBKDF2-HMAC-SHA256.
///
/// Deterministic for identical inputs. The salt is not secret; it travels
/// alongside the ciphertext in the envelope.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> SyncResult<SymmetricKey> {
    let rounds = NonZeroU32::new(iterations)
        .ok_or_else(|| SyncError::Crypto("PBKDF2 iterations must be non-zero".into()))?;

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        passphrase.expose_secret().as_bytes(),
        salt,
        rounds.get(),
        &mut key,
    );
    let derived = SymmetricKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}

/// One-way passphrase hash sent to the server for login/registration.
///
/// The salt is the normalized email under a fixed domain tag, so every device
/// computes the same value without a salt round-trip, and the result never
/// equals an encryption key (those use random salts).
pub fn hash_passphrase(
    passphrase: &SecretString,
    email: &str,
    iterations: u32,
) -> SyncResult<String> {
    let mut salt = AUTH_SALT_DOMAIN.to_vec();
    salt.extend_from_slice(email.trim().to_lowercase().as_bytes());

    let key = derive_key(passphrase, &salt, iterations)?;
    Ok(hex::encode(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: u32 = 1_000;

    #[test]
    fn test_default_iterations_meet_floor() {
        assert!(DEFAULT_KDF_ITERATIONS >= 310_000);
    }

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; 16];

        let key1 = derive_key(&passphrase, &salt, FAST).unwrap();
        let key2 = derive_key(&passphrase, &salt, FAST).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; 16];

        let key1 = derive_key(&SecretString::from("passphrase-a"), &salt, FAST).unwrap();
        let key2 = derive_key(&SecretString::from("passphrase-b"), &salt, FAST).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passphrases must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");

        let key1 = derive_key(&passphrase, &[1u8; 16], FAST).unwrap();
        let key2 = derive_key(&passphrase, &[2u8; 16], FAST).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_kdf_zero_iterations_rejected() {
        let result = derive_key(&SecretString::from("x"), &[0u8; 16], 0);
        assert!(matches!(result, Err(SyncError::Crypto(_))));
    }

    #[test]
    fn test_kdf_known_vector() {
        // RFC 7914 §11 PBKDF2-HMAC-SHA256 test vector (first 32 bytes).
        let key = derive_key(&SecretString::from("passwd"), b"salt", 1).unwrap();
        assert_eq!(
            hex::encode(key.as_bytes()),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_hash_passphrase_normalizes_email() {
        let pass = SecretString::from("hunter2-but-longer");
        let a = hash_passphrase(&pass, "User@Example.com ", FAST).unwrap();
        let b = hash_passphrase(&pass, "user@example.com", FAST).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), KEY_SIZE * 2);
    }

    #[test]
    fn test_hash_passphrase_differs_per_email() {
        let pass = SecretString::from("shared-passphrase");
        let a = hash_passphrase(&pass, "a@example.com", FAST).unwrap();
        let b = hash_passphrase(&pass, "b@example.com", FAST).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SymmetricKey::from_bytes([7u8; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains('7'));
    }
}
