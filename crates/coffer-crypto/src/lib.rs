//! coffer-crypto: client-side E2E encryption for the Coffer vault
//!
//! Every symmetric operation uses XChaCha20-Poly1305 with a fresh random
//! 192-bit nonce, so key wraps, metadata blobs and file content share one
//! wire convention: `[24-byte nonce][ciphertext + 16-byte tag]`.
//!
//! Key hierarchy:
//! ```text
//! password ──Argon2id(salt)──► Key-Encryption Key
//!                                └── Master Key (random, wrapped by KEK)
//!                                      ├── X25519 Private Key (wrapped by master key)
//!                                      ├── Recovery Key (wrapped by master key; also wraps
//!                                      │                 a second copy of the master key)
//!                                      └── Collection Key (per collection, wrapped by master key)
//!                                            └── File Key (per file, wrapped by collection key)
//!                                                  ├── content / thumbnail AEAD
//!                                                  └── metadata codec
//! ```

pub mod aead;
pub mod content;
pub mod error;
pub mod hierarchy;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod recovery;
pub mod sealed;

pub use aead::EncryptedBlob;
pub use content::{ciphertext_hash, decrypt_content, encrypt_content};
pub use error::{CryptoError, CryptoResult};
pub use hierarchy::{KeyBundle, NewAccount};
pub use kdf::{derive_key_encryption_key, generate_salt, KdfParams};
pub use keys::{
    generate_key, unwrap_collection_key, unwrap_file_key, unwrap_key, unwrap_master_key,
    unwrap_private_key, unwrap_recovery_key, wrap_collection_key, wrap_file_key, wrap_key,
    wrap_master_key, wrap_private_key, wrap_recovery_key, CollectionKey, FileKey,
    KeyEncryptionKey, KeyMaterial, MasterKey, PrivateKey, RecoveryKey,
};
pub use metadata::{decrypt_metadata, encrypt_metadata};
pub use recovery::{mnemonic_to_recovery_key, recovery_key_to_mnemonic};
pub use sealed::{generate_keypair, open_sealed, seal, PublicKey};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Required length of the Argon2id salt
pub const SALT_SIZE: usize = 16;

/// Tag recorded on every file so readers know which primitive produced it.
pub const ENCRYPTION_VERSION: &str = "xchacha20poly1305-v1";

/// Returns true for encryption-version values that mean "not encrypted yet".
pub fn is_placeholder_version(version: &str) -> bool {
    let v = version.trim();
    v.is_empty() || v.eq_ignore_ascii_case("unset")
}
