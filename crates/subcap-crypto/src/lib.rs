//! subcap-crypto: settings encryption for subcap sync
//!
//! Key hierarchy:
//! ```text
//! Passphrase
//!   ├── Sync Key (PBKDF2-HMAC-SHA256, random 16-byte salt stored in the envelope)
//!   │   └── Settings AEAD: AES-256-GCM (key=sync_key, iv=random 96-bit)
//!   └── Auth Hash (PBKDF2-HMAC-SHA256, salt="subcap-sync:auth:"||email, sent to the server)
//! Device Vault Key (random 256-bit, never leaves the device)
//!   └── Cached passphrase AEAD: AES-256-GCM
//! ```

pub mod envelope;
pub mod ids;
pub mod kdf;
pub mod session;

pub use envelope::{decrypt_bytes, decrypt_json, encrypt_bytes, encrypt_json};
pub use ids::{generate_device_id, generate_salt};
pub use kdf::{derive_key, hash_passphrase, SymmetricKey, DEFAULT_KDF_ITERATIONS};
pub use session::SyncCrypto;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a KDF salt
pub const SALT_SIZE: usize = 16;
