//! File content and thumbnail encryption

use zeroize::Zeroizing;

use crate::aead::EncryptedBlob;
use crate::error::CryptoResult;
use crate::keys::{FileKey, KeyMaterial};

/// Encrypt a whole file body. Output: `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt_content(key: &FileKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    Ok(EncryptedBlob::encrypt(key.as_bytes(), plaintext)?.to_bytes())
}

pub fn decrypt_content(key: &FileKey, data: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    EncryptedBlob::from_bytes(data)?.decrypt(key.as_bytes())
}

/// Lowercase hex BLAKE3 of the encrypted bytes, recorded as `encrypted_hash`.
pub fn ciphertext_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
