//! Key types of the hierarchy and the wrap/unwrap operations between levels
//!
//! Each level gets its own newtype so a file key can never be unwrapped with
//! a master key by accident: the named `wrap_*`/`unwrap_*` pairs fix which
//! key protects which.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::aead::EncryptedBlob;
use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Common access to the raw 256 bits behind every key type.
pub trait KeyMaterial: Sized {
    fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self;

    fn as_bytes(&self) -> &[u8; KEY_SIZE];
}

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Zeroize, ZeroizeOnDrop)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl KeyMaterial for $name {
            fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_key!(
    /// Argon2id output. Never stored; only used to open the master key.
    KeyEncryptionKey
);
secret_key!(
    /// Random per-user root key.
    MasterKey
);
secret_key!(
    /// X25519 static secret used to open collection keys shared with this user.
    PrivateKey
);
secret_key!(
    /// Second path to the master key, rendered to the user as a mnemonic.
    RecoveryKey
);
secret_key!(
    /// Per-collection key protecting the file keys of its members.
    CollectionKey
);
secret_key!(
    /// Per-file key protecting content, thumbnail and metadata.
    FileKey
);

/// Generate a random 256-bit key of any level.
pub fn generate_key<K: KeyMaterial>() -> K {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
    K::from_bytes(*bytes)
}

/// Encrypt the raw bytes of `key` under `wrapping`.
pub fn wrap_key<K: KeyMaterial, W: KeyMaterial>(
    key: &K,
    wrapping: &W,
) -> CryptoResult<EncryptedBlob> {
    EncryptedBlob::encrypt(wrapping.as_bytes(), key.as_bytes())
}

/// Open a wrapped key. The plaintext must be exactly `KEY_SIZE` bytes.
pub fn unwrap_key<K: KeyMaterial, W: KeyMaterial>(
    blob: &EncryptedBlob,
    wrapping: &W,
) -> CryptoResult<K> {
    let plaintext = blob.decrypt(wrapping.as_bytes())?;
    if plaintext.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: plaintext.len(),
        });
    }
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&plaintext);
    Ok(K::from_bytes(*bytes))
}

pub fn wrap_master_key(master: &MasterKey, kek: &KeyEncryptionKey) -> CryptoResult<EncryptedBlob> {
    wrap_key(master, kek)
}

pub fn unwrap_master_key(blob: &EncryptedBlob, kek: &KeyEncryptionKey) -> CryptoResult<MasterKey> {
    unwrap_key(blob, kek)
}

pub fn wrap_private_key(private: &PrivateKey, master: &MasterKey) -> CryptoResult<EncryptedBlob> {
    wrap_key(private, master)
}

pub fn unwrap_private_key(blob: &EncryptedBlob, master: &MasterKey) -> CryptoResult<PrivateKey> {
    unwrap_key(blob, master)
}

pub fn wrap_recovery_key(
    recovery: &RecoveryKey,
    master: &MasterKey,
) -> CryptoResult<EncryptedBlob> {
    wrap_key(recovery, master)
}

pub fn unwrap_recovery_key(blob: &EncryptedBlob, master: &MasterKey) -> CryptoResult<RecoveryKey> {
    unwrap_key(blob, master)
}

pub fn wrap_collection_key(
    collection: &CollectionKey,
    master: &MasterKey,
) -> CryptoResult<EncryptedBlob> {
    wrap_key(collection, master)
}

pub fn unwrap_collection_key(
    blob: &EncryptedBlob,
    master: &MasterKey,
) -> CryptoResult<CollectionKey> {
    unwrap_key(blob, master)
}

pub fn wrap_file_key(file: &FileKey, collection: &CollectionKey) -> CryptoResult<EncryptedBlob> {
    wrap_key(file, collection)
}

pub fn unwrap_file_key(blob: &EncryptedBlob, collection: &CollectionKey) -> CryptoResult<FileKey> {
    unwrap_key(blob, collection)
}
