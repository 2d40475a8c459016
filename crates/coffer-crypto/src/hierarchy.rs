//! Per-user key bundle: everything the server stores so any device holding
//! the password (or the recovery phrase) can rebuild the hierarchy.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aead::EncryptedBlob;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key_encryption_key, generate_salt, KdfParams};
use crate::keys::{
    generate_key, unwrap_key, unwrap_master_key, unwrap_private_key, unwrap_recovery_key,
    wrap_key, wrap_master_key, wrap_private_key, wrap_recovery_key, MasterKey, PrivateKey,
    RecoveryKey,
};
use crate::recovery::{mnemonic_to_recovery_key, recovery_key_to_mnemonic};
use crate::sealed::{generate_keypair, PublicKey};

/// Wrapped keys of one user. Contains no plaintext key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    #[serde(with = "crate::aead::b64")]
    pub salt: Vec<u8>,
    pub kdf_params: KdfParams,
    pub encrypted_master_key: EncryptedBlob,
    pub public_key: PublicKey,
    pub encrypted_private_key: EncryptedBlob,
    pub encrypted_recovery_key: EncryptedBlob,
    pub master_key_encrypted_with_recovery_key: EncryptedBlob,
}

/// Result of [`KeyBundle::create`]. The phrase must be shown to the user
/// exactly once.
pub struct NewAccount {
    pub bundle: KeyBundle,
    pub master_key: MasterKey,
    pub recovery_phrase: SecretString,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("bundle", &self.bundle)
            .field("master_key", &self.master_key)
            .field("recovery_phrase", &"[REDACTED]")
            .finish()
    }
}

impl KeyBundle {
    /// Generate a brand-new hierarchy protected by `password`.
    pub fn create(password: &SecretString, params: KdfParams) -> CryptoResult<NewAccount> {
        let salt = generate_salt();
        let kek = derive_key_encryption_key(password, &salt, &params)?;

        let master_key: MasterKey = generate_key();
        let (public_key, private_key) = generate_keypair();
        let recovery_key: RecoveryKey = generate_key();

        let bundle = KeyBundle {
            salt: salt.to_vec(),
            kdf_params: params,
            encrypted_master_key: wrap_master_key(&master_key, &kek)?,
            public_key,
            encrypted_private_key: wrap_private_key(&private_key, &master_key)?,
            encrypted_recovery_key: wrap_recovery_key(&recovery_key, &master_key)?,
            master_key_encrypted_with_recovery_key: wrap_key(&master_key, &recovery_key)?,
        };
        let recovery_phrase = recovery_key_to_mnemonic(&recovery_key)?;
        debug!("generated new key bundle");

        Ok(NewAccount {
            bundle,
            master_key,
            recovery_phrase,
        })
    }

    /// Derive the KEK from `password` and open the master key.
    ///
    /// A wrong password surfaces as `CryptoError::AuthenticationFailed`.
    pub fn unlock(&self, password: &SecretString) -> CryptoResult<MasterKey> {
        let kek = derive_key_encryption_key(password, &self.salt, &self.kdf_params)?;
        unwrap_master_key(&self.encrypted_master_key, &kek)
    }

    pub fn unlock_private_key(&self, master: &MasterKey) -> CryptoResult<PrivateKey> {
        let private = unwrap_private_key(&self.encrypted_private_key, master)?;
        if PublicKey::from_private(&private) != self.public_key {
            return Err(CryptoError::AuthenticationFailed);
        }
        Ok(private)
    }

    pub fn recovery_key(&self, master: &MasterKey) -> CryptoResult<RecoveryKey> {
        unwrap_recovery_key(&self.encrypted_recovery_key, master)
    }

    /// Open the master key through the recovery path.
    pub fn recover(&self, phrase: &str) -> CryptoResult<MasterKey> {
        let recovery_key = mnemonic_to_recovery_key(phrase)?;
        unwrap_key(&self.master_key_encrypted_with_recovery_key, &recovery_key)
    }

    /// Re-protect the same master key under a new password. Everything
    /// below the master key is untouched, so no collection or file needs
    /// re-encryption.
    pub fn rewrap(
        &self,
        master: &MasterKey,
        new_password: &SecretString,
        params: KdfParams,
    ) -> CryptoResult<KeyBundle> {
        let salt = generate_salt();
        let kek = derive_key_encryption_key(new_password, &salt, &params)?;
        Ok(KeyBundle {
            salt: salt.to_vec(),
            kdf_params: params,
            encrypted_master_key: wrap_master_key(master, &kek)?,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyMaterial;
    use secrecy::ExposeSecret;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_create_then_unlock() {
        let password = SecretString::from("hunter2");
        let account = KeyBundle::create(&password, fast_params()).unwrap();
        let master = account.bundle.unlock(&password).unwrap();
        assert_eq!(master.as_bytes(), account.master_key.as_bytes());
    }

    #[test]
    fn test_wrong_password_is_authentication_failure() {
        let account = KeyBundle::create(&SecretString::from("right"), fast_params()).unwrap();
        let err = account
            .bundle
            .unlock(&SecretString::from("wrong"))
            .unwrap_err();
        assert_eq!(err, CryptoError::AuthenticationFailed);
    }

    #[test]
    fn test_private_key_matches_public_key() {
        let account = KeyBundle::create(&SecretString::from("pw"), fast_params()).unwrap();
        let private = account
            .bundle
            .unlock_private_key(&account.master_key)
            .unwrap();
        assert_eq!(PublicKey::from_private(&private), account.bundle.public_key);
    }

    #[test]
    fn test_recover_with_phrase() {
        let account = KeyBundle::create(&SecretString::from("pw"), fast_params()).unwrap();
        let master = account
            .bundle
            .recover(account.recovery_phrase.expose_secret())
            .unwrap();
        assert_eq!(master.as_bytes(), account.master_key.as_bytes());

        let recovery = account.bundle.recovery_key(&account.master_key).unwrap();
        let again = recovery_key_to_mnemonic(&recovery).unwrap();
        assert_eq!(again.expose_secret(), account.recovery_phrase.expose_secret());
    }

    #[test]
    fn test_rewrap_changes_password_only() {
        let old = SecretString::from("old-password");
        let new = SecretString::from("new-password");
        let account = KeyBundle::create(&old, fast_params()).unwrap();

        let rewrapped = account
            .bundle
            .rewrap(&account.master_key, &new, fast_params())
            .unwrap();
        assert_ne!(rewrapped.salt, account.bundle.salt);
        assert_eq!(
            rewrapped.encrypted_private_key,
            account.bundle.encrypted_private_key
        );
        assert!(rewrapped.unlock(&old).is_err());
        let master = rewrapped.unlock(&new).unwrap();
        assert_eq!(master.as_bytes(), account.master_key.as_bytes());
    }

    #[test]
    fn test_bundle_json_roundtrip() {
        let account = KeyBundle::create(&SecretString::from("pw"), fast_params()).unwrap();
        let json = serde_json::to_string(&account.bundle).unwrap();
        let back: KeyBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account.bundle);
    }
}
