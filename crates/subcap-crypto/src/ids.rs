//! Random salts and device identifiers

use rand::{rngs::OsRng, RngCore};

use crate::SALT_SIZE;

/// Generate a fresh 16-byte KDF salt from the OS CSPRNG.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a device id of the form `device-<unixMillis>-<32 hex chars>`.
///
/// Used to attribute payloads and break ties, not as a credential.
pub fn generate_device_id() -> String {
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);
    format!(
        "device-{}-{}",
        subcap_core::now_millis(),
        hex::encode(random)
    )
}
