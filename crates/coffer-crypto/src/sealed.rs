//! Anonymous public-key encryption for sharing collection keys
//!
//! Wire format:
//! ```text
//! [32 bytes: ephemeral X25519 public key][24 bytes: nonce][ciphertext + 16-byte tag]
//! ```
//! The AEAD key is HKDF-SHA256 over the X25519 shared secret, bound to both
//! public keys through the info string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::aead::EncryptedBlob;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyMaterial, PrivateKey};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

const PUBLIC_KEY_SIZE: usize = 32;
const SEALED_BOX_INFO: &[u8] = b"coffer-sealed-box-v1";

/// An X25519 public key, safe to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Derive the public half of a stored private key.
    pub fn from_private(private: &PrivateKey) -> Self {
        let secret = StaticSecret::from(*private.as_bytes());
        Self(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedCiphertext(format!("public key base64: {e}")))?;
        let bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: PUBLIC_KEY_SIZE,
                    got: bytes.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(d)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Generate a fresh X25519 keypair.
pub fn generate_keypair() -> (PublicKey, PrivateKey) {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = x25519_dalek::PublicKey::from(&secret);
    let private = PrivateKey::from_bytes(secret.to_bytes());
    (PublicKey(public.to_bytes()), private)
}

fn box_key(
    shared: &[u8; 32],
    ephemeral: &[u8; PUBLIC_KEY_SIZE],
    recipient: &[u8; PUBLIC_KEY_SIZE],
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut info = Vec::with_capacity(SEALED_BOX_INFO.len() + 2 * PUBLIC_KEY_SIZE);
    info.extend_from_slice(SEALED_BOX_INFO);
    info.extend_from_slice(ephemeral);
    info.extend_from_slice(recipient);

    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&info, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Encrypt `plaintext` so that only the holder of `recipient`'s private key
/// can open it. The sender stays anonymous.
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_pk = x25519_dalek::PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&x25519_dalek::PublicKey::from(recipient.0));
    if !shared.was_contributory() {
        return Err(CryptoError::Encryption(
            "recipient public key is a low-order point".into(),
        ));
    }

    let key = box_key(shared.as_bytes(), ephemeral_pk.as_bytes(), &recipient.0)?;
    let blob = EncryptedBlob::encrypt(&key, plaintext)?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + blob.ciphertext().len());
    out.extend_from_slice(ephemeral_pk.as_bytes());
    out.extend_from_slice(&blob.to_bytes());
    Ok(out)
}

/// Open a sealed box with the recipient's private key.
pub fn open_sealed(private: &PrivateKey, sealed: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < PUBLIC_KEY_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedCiphertext(format!(
            "sealed box of {} bytes is too short",
            sealed.len()
        )));
    }
    let (ephemeral, rest) = sealed.split_at(PUBLIC_KEY_SIZE);
    let mut ephemeral_pk = [0u8; PUBLIC_KEY_SIZE];
    ephemeral_pk.copy_from_slice(ephemeral);

    let secret = StaticSecret::from(*private.as_bytes());
    let own_pk = x25519_dalek::PublicKey::from(&secret);
    let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(ephemeral_pk));
    if !shared.was_contributory() {
        return Err(CryptoError::AuthenticationFailed);
    }

    let key = box_key(shared.as_bytes(), &ephemeral_pk, own_pk.as_bytes())?;
    EncryptedBlob::from_bytes(rest)?.decrypt(&key)
}
