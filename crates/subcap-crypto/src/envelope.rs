//! AES-256-GCM envelopes
//!
//! Envelope format (JSON, all fields standard base64):
//! ```text
//! { "ciphertext": ciphertext || 16-byte GCM tag, "iv": 12 random bytes, "salt"?: KDF salt }
//! ```
//!
//! A fresh IV is drawn from the OS RNG for every call, so a key is never
//! reused with the same IV in practice.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use subcap_core::{EncryptedEnvelope, SyncError, SyncResult};
use zeroize::Zeroize;

use crate::kdf::SymmetricKey;
use crate::IV_SIZE;

/// Encrypt raw bytes under `key` with a fresh IV.
pub fn encrypt_bytes(key: &SymmetricKey, plaintext: &[u8]) -> SyncResult<EncryptedEnvelope> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SyncError::Crypto(format!("AES-GCM encryption failed: {e}")))?;

    Ok(EncryptedEnvelope {
        ciphertext: STANDARD.encode(ciphertext),
        iv: STANDARD.encode(iv),
        salt: None,
    })
}

/// Decrypt base64 `ciphertext`/`iv` under `key`.
///
/// Any tag mismatch is reported as [`SyncError::Authentication`] with no
/// detail about where the data was damaged.
pub fn decrypt_bytes(key: &SymmetricKey, ciphertext: &str, iv: &str) -> SyncResult<Vec<u8>> {
    let iv_bytes = STANDARD
        .decode(iv)
        .map_err(|_| SyncError::MalformedPayload)?;
    if iv_bytes.len() != IV_SIZE {
        return Err(SyncError::MalformedPayload);
    }
    let ciphertext = STANDARD
        .decode(ciphertext)
        .map_err(|_| SyncError::MalformedPayload)?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(&iv_bytes), ciphertext.as_slice())
        .map_err(|_| SyncError::Authentication)
}

/// Serialize `data` to JSON and encrypt it.
pub fn encrypt_json<T: Serialize + ?Sized>(
    key: &SymmetricKey,
    data: &T,
) -> SyncResult<EncryptedEnvelope> {
    let mut plaintext = serde_json::to_vec(data)
        .map_err(|e| SyncError::Crypto(format!("JSON serialization failed: {e}")))?;
    let result = encrypt_bytes(key, &plaintext);
    plaintext.zeroize();
    result
}

/// Decrypt and parse JSON produced by [`encrypt_json`].
pub fn decrypt_json<T: DeserializeOwned>(
    key: &SymmetricKey,
    ciphertext: &str,
    iv: &str,
) -> SyncResult<T> {
    let mut plaintext = decrypt_bytes(key, ciphertext, iv)?;
    let parsed = serde_json::from_slice(&plaintext)
        .map_err(|e| SyncError::InvalidPayload(format!("decrypted data is not valid JSON: {e}")));
    plaintext.zeroize();
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_key;
    use crate::KEY_SIZE;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    fn test_key() -> SymmetricKey {
        SymmetricKey::from_bytes([42u8; KEY_SIZE])
    }

    fn flip_ciphertext_byte(envelope: &EncryptedEnvelope, index: usize) -> String {
        let mut raw = STANDARD.decode(&envelope.ciphertext).unwrap();
        raw[index] ^= 0x01;
        STANDARD.encode(raw)
    }

    #[test]
    fn test_json_roundtrip() {
        let key = test_key();
        let data = json!({ "cards": { "UOB": { "merchantMap": { "GRAB": "Transport" } } } });

        let envelope = encrypt_json(&key, &data).unwrap();
        let decrypted: Value = decrypt_json(&key, &envelope.ciphertext, &envelope.iv).unwrap();

        assert_eq!(decrypted, data);
        assert!(envelope.salt.is_none());
    }

    #[test]
    fn test_roundtrip_with_derived_key() {
        let salt = crate::generate_salt();
        let key = derive_key(&SecretString::from("correct horse"), &salt, 1_000).unwrap();

        let envelope = encrypt_json(&key, &json!([1, 2, 3])).unwrap();
        let again = derive_key(&SecretString::from("correct horse"), &salt, 1_000).unwrap();
        let decrypted: Value = decrypt_json(&again, &envelope.ciphertext, &envelope.iv).unwrap();

        assert_eq!(decrypted, json!([1, 2, 3]));
    }

    #[test]
    fn test_wrong_passphrase_is_authentication_error() {
        let salt = [9u8; 16];
        let right = derive_key(&SecretString::from("right"), &salt, 1_000).unwrap();
        let wrong = derive_key(&SecretString::from("wrong"), &salt, 1_000).unwrap();

        let envelope = encrypt_json(&right, &json!({ "secret": true })).unwrap();
        let result = decrypt_json::<Value>(&wrong, &envelope.ciphertext, &envelope.iv);

        assert!(matches!(result, Err(SyncError::Authentication)));
    }

    #[test]
    fn test_any_flipped_byte_is_authentication_error() {
        let key = test_key();
        let envelope = encrypt_json(&key, &json!({ "a": "b" })).unwrap();
        let len = STANDARD.decode(&envelope.ciphertext).unwrap().len();

        for index in [0, len / 2, len - 1] {
            let tampered = flip_ciphertext_byte(&envelope, index);
            let result = decrypt_json::<Value>(&key, &tampered, &envelope.iv);
            assert!(
                matches!(result, Err(SyncError::Authentication)),
                "byte {index} flip must fail authentication"
            );
        }
    }

    #[test]
    fn test_tampered_iv_fails() {
        let key = test_key();
        let envelope = encrypt_json(&key, &json!("x")).unwrap();
        let mut iv = STANDARD.decode(&envelope.iv).unwrap();
        iv[0] ^= 0xFF;

        let result = decrypt_bytes(&key, &envelope.ciphertext, &STANDARD.encode(iv));
        assert!(matches!(result, Err(SyncError::Authentication)));
    }

    #[test]
    fn test_bad_encoding_is_malformed() {
        let key = test_key();
        let envelope = encrypt_json(&key, &json!("x")).unwrap();

        assert!(matches!(
            decrypt_bytes(&key, "not base64!!", &envelope.iv),
            Err(SyncError::MalformedPayload)
        ));
        assert!(matches!(
            decrypt_bytes(&key, &envelope.ciphertext, &STANDARD.encode([0u8; 8])),
            Err(SyncError::MalformedPayload)
        ));
    }

    #[test]
    fn test_unique_ivs_across_encryptions() {
        let key = test_key();
        let e1 = encrypt_json(&key, &json!("same")).unwrap();
        let e2 = encrypt_json(&key, &json!("same")).unwrap();

        assert_ne!(e1.iv, e2.iv);
        assert_ne!(e1.ciphertext, e2.ciphertext);
    }

    #[test]
    fn test_iv_is_96_bits() {
        let envelope = encrypt_bytes(&test_key(), b"payload").unwrap();
        assert_eq!(STANDARD.decode(&envelope.iv).unwrap().len(), 12);
    }

    #[test]
    fn test_non_json_plaintext_is_invalid_payload() {
        let key = test_key();
        let envelope = encrypt_bytes(&key, b"\xff not json").unwrap();
        let result = decrypt_json::<Value>(&key, &envelope.ciphertext, &envelope.iv);
        assert!(matches!(result, Err(SyncError::InvalidPayload(_))));
    }
}
