//! Metadata codec: JSON record → AEAD under the file key → base64 text
//!
//! The encoded form is `base64(nonce ‖ ciphertext)` so it can travel as a
//! plain string field in API payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::aead::EncryptedBlob;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::KeyMaterial;

/// Serialize `record` as JSON and seal it under `key`.
pub fn encrypt_metadata<T: Serialize, K: KeyMaterial>(record: &T, key: &K) -> CryptoResult<String> {
    let json = zeroize::Zeroizing::new(
        serde_json::to_vec(record).map_err(|e| CryptoError::Serialization(e.to_string()))?,
    );
    Ok(EncryptedBlob::encrypt(key.as_bytes(), &json)?.to_base64())
}

/// Reverse of [`encrypt_metadata`].
///
/// Inputs too short to hold a nonce and a tag fail as `MalformedCiphertext`
/// without attempting decryption; a wrong key fails as `AuthenticationFailed`.
pub fn decrypt_metadata<T: DeserializeOwned, K: KeyMaterial>(
    encoded: &str,
    key: &K,
) -> CryptoResult<T> {
    let blob = EncryptedBlob::from_base64(encoded)?;
    let json = blob.decrypt(key.as_bytes())?;
    serde_json::from_slice(&json).map_err(|e| CryptoError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_key, FileKey};
    use crate::{NONCE_SIZE, TAG_SIZE};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        size: u64,
    }

    #[test]
    fn test_metadata_roundtrip() {
        let key: FileKey = generate_key();
        let record = Record {
            name: "holiday.jpg".into(),
            size: 2048,
        };
        let encoded = encrypt_metadata(&record, &key).unwrap();
        assert!(!encoded.contains("holiday"));

        let back: Record = decrypt_metadata(&encoded, &key).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_metadata_wrong_key() {
        let key: FileKey = generate_key();
        let other: FileKey = generate_key();
        let encoded = encrypt_metadata(&Record { name: "a".into(), size: 1 }, &key).unwrap();
        let err = decrypt_metadata::<Record, _>(&encoded, &other).unwrap_err();
        assert_eq!(err, CryptoError::AuthenticationFailed);
    }

    #[test]
    fn test_metadata_too_short_is_malformed() {
        let key: FileKey = generate_key();
        let encoded = STANDARD.encode(vec![0u8; NONCE_SIZE + TAG_SIZE - 1]);
        let err = decrypt_metadata::<Record, _>(&encoded, &key).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedCiphertext(_)));
    }

    #[test]
    fn test_metadata_not_base64_is_malformed() {
        let key: FileKey = generate_key();
        let err = decrypt_metadata::<Record, _>("***not base64***", &key).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedCiphertext(_)));
    }

    #[test]
    fn test_metadata_wrong_shape_is_serialization_error() {
        let key: FileKey = generate_key();
        let encoded = encrypt_metadata(&vec![1, 2, 3], &key).unwrap();
        let err = decrypt_metadata::<Record, _>(&encoded, &key).unwrap_err();
        assert!(matches!(err, CryptoError::Serialization(_)));
    }
}
