//! XChaCha20-Poly1305 envelope shared by every layer of the hierarchy.
//!
//! Binary format of a flattened blob:
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A ciphertext together with the nonce it was sealed under.
///
/// The two halves are only meaningful as a pair, so the fields are private
/// and every constructor checks the nonce length.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    #[serde(with = "b64")]
    ciphertext: Vec<u8>,
    #[serde(with = "b64_nonce")]
    nonce: [u8; NONCE_SIZE],
}

impl EncryptedBlob {
    /// Seal `plaintext` under `key` with a freshly generated nonce.
    pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CryptoResult<Self> {
        let cipher = XChaCha20Poly1305::new(key.into());

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(Self { ciphertext, nonce })
    }

    /// Open the blob. Any tag mismatch is reported as `AuthenticationFailed`.
    pub fn decrypt(&self, key: &[u8; KEY_SIZE]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let cipher = XChaCha20Poly1305::new(key.into());
        cipher
            .decrypt(XNonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    /// Rebuild a blob from separately stored halves.
    pub fn from_parts(ciphertext: Vec<u8>, nonce: &[u8]) -> CryptoResult<Self> {
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| {
            CryptoError::MalformedCiphertext(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce.len()
            ))
        })?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "ciphertext shorter than the {TAG_SIZE}-byte tag"
            )));
        }
        Ok(Self { ciphertext, nonce })
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// `nonce ‖ ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `nonce ‖ ciphertext`, rejecting inputs too short to hold a
    /// nonce and a tag before any decryption is attempted.
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext(format!(
                "{} bytes is shorter than nonce + tag ({})",
                data.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        Self::from_parts(ciphertext.to_vec(), nonce)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedCiphertext(format!("base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("nonce", &STANDARD.encode(self.nonce))
            .finish()
    }
}

pub(crate) mod b64 {
    use super::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_nonce {
    use super::{NONCE_SIZE, STANDARD};
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &[u8; NONCE_SIZE], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(nonce))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; NONCE_SIZE], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD.decode(encoded).map_err(serde::de::Error::custom)?;
        bytes.as_slice().try_into().map_err(|_| {
            serde::de::Error::custom(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                bytes.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [7u8; KEY_SIZE];
        let blob = EncryptedBlob::encrypt(&key, b"hello vault").unwrap();
        assert_eq!(blob.decrypt(&key).unwrap().as_slice(), b"hello vault");
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let blob = EncryptedBlob::encrypt(&[1u8; KEY_SIZE], b"secret").unwrap();
        assert_eq!(
            blob.decrypt(&[2u8; KEY_SIZE]).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [3u8; KEY_SIZE];
        let blob = EncryptedBlob::encrypt(&key, b"important").unwrap();
        let mut bytes = blob.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let tampered = EncryptedBlob::from_bytes(&bytes).unwrap();
        assert_eq!(
            tampered.decrypt(&key).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn test_flattened_layout() {
        let blob = EncryptedBlob::encrypt(&[9u8; KEY_SIZE], b"abcd").unwrap();
        let bytes = blob.to_bytes();
        // nonce (24) + plaintext (4) + tag (16)
        assert_eq!(bytes.len(), NONCE_SIZE + 4 + TAG_SIZE);
        assert_eq!(&bytes[..NONCE_SIZE], blob.nonce());
        assert_eq!(EncryptedBlob::from_bytes(&bytes).unwrap(), blob);
    }

    #[test]
    fn test_short_input_is_malformed() {
        for len in [0, 1, NONCE_SIZE - 1, NONCE_SIZE, NONCE_SIZE + TAG_SIZE - 1] {
            let err = EncryptedBlob::from_bytes(&vec![0u8; len]).unwrap_err();
            assert!(
                matches!(err, CryptoError::MalformedCiphertext(_)),
                "len {len} must be rejected as malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_from_parts_rejects_wrong_nonce_size() {
        let err = EncryptedBlob::from_parts(vec![0u8; 32], &[0u8; 12]).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedCiphertext(_)));
    }

    #[test]
    fn test_json_uses_base64_fields() {
        let blob = EncryptedBlob::encrypt(&[5u8; KEY_SIZE], b"json").unwrap();
        let json = serde_json::to_value(&blob).unwrap();
        assert!(json["ciphertext"].is_string());
        assert!(json["nonce"].is_string());

        let back: EncryptedBlob = serde_json::from_value(json).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_json_rejects_short_nonce() {
        let json = serde_json::json!({
            "ciphertext": STANDARD.encode([0u8; 32]),
            "nonce": STANDARD.encode([0u8; 12]),
        });
        assert!(serde_json::from_value::<EncryptedBlob>(json).is_err());
    }
}
