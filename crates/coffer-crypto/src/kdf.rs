//! Key derivation: Argon2id password → key-encryption key

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyEncryptionKey, KeyMaterial};
use crate::{KEY_SIZE, SALT_SIZE};

/// Argon2id parameters, stored alongside each user's wrapped master key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Generate a random salt of the required length.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the 256-bit key-encryption key from a password and salt.
///
/// Deterministic for identical inputs. The salt is not secret but must be
/// exactly `SALT_SIZE` bytes.
pub fn derive_key_encryption_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<KeyEncryptionKey> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::InvalidSaltLength {
            expected: SALT_SIZE,
            got: salt.len(),
        });
    }

    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut out[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("Argon2id failed: {e}")))?;

    Ok(KeyEncryptionKey::from_bytes(*out))
}
