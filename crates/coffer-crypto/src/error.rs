use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures of the cryptographic layer.
///
/// `AuthenticationFailed` is the only signal available for a wrong password:
/// a mismatched key and tampered ciphertext are indistinguishable by design
/// of the AEAD, so callers must report both the same way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid salt length: expected {expected} bytes, got {got}")]
    InvalidSaltLength { expected: usize, got: usize },

    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("decryption failed: incorrect password or corrupted data")]
    AuthenticationFailed,

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid recovery phrase: {0}")]
    InvalidMnemonic(String),
}
