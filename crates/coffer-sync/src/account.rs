//! Account and collection setup: registration, password change, recovery,
//! collection creation and sharing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use coffer_core::{Collection, CollectionMember, CofferError, CofferResult, User};
use coffer_crypto::{
    decrypt_metadata, encrypt_metadata, generate_key, open_sealed, seal, unwrap_collection_key,
    wrap_collection_key, CollectionKey, CryptoError, KeyBundle, KeyMaterial, KEY_SIZE,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use crate::context::VaultContext;
use crate::unlock::{unlock_collection_key, unlock_master_key};

/// Outcome of [`register_user`]. The phrase is shown once and never stored.
pub struct Registration {
    pub user: User,
    pub recovery_phrase: SecretString,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("user", &self.user.id)
            .field("recovery_phrase", &"[REDACTED]")
            .finish()
    }
}

/// Plaintext of `Collection::encrypted_name`
#[derive(Debug, Serialize, Deserialize)]
struct CollectionName {
    name: String,
}

fn require_password(field: &'static str, password: &SecretString) -> CofferResult<()> {
    if password.expose_secret().is_empty() {
        return Err(CofferError::validation(field, "must not be empty"));
    }
    Ok(())
}

pub async fn register_user(
    ctx: &VaultContext,
    email: &str,
    password: &SecretString,
) -> CofferResult<Registration> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(CofferError::validation("email", "not an email address"));
    }
    require_password("password", password)?;

    let params = ctx.settings.kdf;
    let pw = password.clone();
    let account = tokio::task::spawn_blocking(move || KeyBundle::create(&pw, params))
        .await
        .map_err(|e| CofferError::Store(anyhow::anyhow!("key generation task failed: {e}")))??;

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        key_bundle: account.bundle.clone(),
        created_at: Utc::now(),
    };
    ctx.repo.put_user(&user)?;
    info!(user_id = %user.id, "registered user");

    Ok(Registration {
        user,
        recovery_phrase: account.recovery_phrase.clone(),
    })
}

/// Re-wrap the master key under `new_password`. Nothing below the master
/// key changes.
pub async fn change_password(
    ctx: &VaultContext,
    user_id: &str,
    old_password: &SecretString,
    new_password: &SecretString,
) -> CofferResult<User> {
    require_password("new_password", new_password)?;
    let mut user = ctx.repo.get_user(user_id)?;
    let master = unlock_master_key(&user, old_password).await?;

    let bundle = user.key_bundle.clone();
    let params = ctx.settings.kdf;
    let pw = new_password.clone();
    user.key_bundle = tokio::task::spawn_blocking(move || bundle.rewrap(&master, &pw, params))
        .await
        .map_err(|e| CofferError::Store(anyhow::anyhow!("key derivation task failed: {e}")))??;

    ctx.repo.put_user(&user)?;
    info!(user_id = %user.id, "password changed");
    Ok(user)
}

/// Open the master key with the recovery phrase and protect it with a new
/// password.
pub async fn recover_account(
    ctx: &VaultContext,
    user_id: &str,
    recovery_phrase: &SecretString,
    new_password: &SecretString,
) -> CofferResult<User> {
    require_password("new_password", new_password)?;
    let mut user = ctx.repo.get_user(user_id)?;

    let bundle = user.key_bundle.clone();
    let params = ctx.settings.kdf;
    let phrase = recovery_phrase.clone();
    let pw = new_password.clone();
    user.key_bundle = tokio::task::spawn_blocking(move || {
        let master = bundle.recover(phrase.expose_secret())?;
        bundle.rewrap(&master, &pw, params)
    })
    .await
    .map_err(|e| CofferError::Store(anyhow::anyhow!("key derivation task failed: {e}")))??;

    ctx.repo.put_user(&user)?;
    info!(user_id = %user.id, "account recovered with recovery phrase");
    Ok(user)
}

pub async fn create_collection(
    ctx: &VaultContext,
    owner_id: &str,
    name: &str,
    password: &SecretString,
) -> CofferResult<Collection> {
    if name.trim().is_empty() {
        return Err(CofferError::validation("name", "must not be empty"));
    }
    let owner = ctx.repo.get_user(owner_id)?;
    let master = unlock_master_key(&owner, password).await?;

    let collection_key: CollectionKey = generate_key();
    let collection = Collection {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: owner.id.clone(),
        encrypted_name: encrypt_metadata(
            &CollectionName {
                name: name.trim().to_string(),
            },
            &collection_key,
        )?,
        encrypted_collection_key: wrap_collection_key(&collection_key, &master)?,
        members: Vec::new(),
        created_at: Utc::now(),
    };
    ctx.repo.put_collection(&collection)?;
    info!(collection_id = %collection.id, owner_id = %owner.id, "created collection");
    Ok(collection)
}

pub async fn collection_name(
    ctx: &VaultContext,
    collection_id: &str,
    password: &SecretString,
) -> CofferResult<String> {
    let collection = ctx.repo.get_collection(collection_id)?;
    let key = unlock_collection_key(ctx, collection_id, password).await?;
    let record: CollectionName = decrypt_metadata(&collection.encrypted_name, &key)?;
    Ok(record.name)
}

/// Seal the collection key to `recipient_id`'s public key and record the
/// membership. Re-sharing with an existing member replaces their entry.
pub async fn share_collection(
    ctx: &VaultContext,
    collection_id: &str,
    owner_password: &SecretString,
    recipient_id: &str,
) -> CofferResult<Collection> {
    let mut collection = ctx.repo.get_collection(collection_id)?;
    let recipient = ctx.repo.get_user(recipient_id)?;
    if recipient.id == collection.owner_id {
        return Err(CofferError::validation(
            "recipient_id",
            "owner already holds the collection key",
        ));
    }

    let key = unlock_collection_key(ctx, collection_id, owner_password).await?;
    let sealed = seal(&recipient.key_bundle.public_key, key.as_bytes())?;

    collection.members.retain(|m| m.user_id != recipient.id);
    collection.members.push(CollectionMember {
        user_id: recipient.id.clone(),
        sealed_collection_key: STANDARD.encode(sealed),
    });
    ctx.repo.put_collection(&collection)?;
    info!(collection_id, recipient_id, "shared collection");
    Ok(collection)
}

/// A member's path to the collection key: password → master key → private
/// key → sealed box. The owner's path goes through the wrapped copy instead.
pub async fn open_shared_collection_key(
    ctx: &VaultContext,
    collection_id: &str,
    user_id: &str,
    password: &SecretString,
) -> CofferResult<CollectionKey> {
    let collection = ctx.repo.get_collection(collection_id)?;
    let user = ctx.repo.get_user(user_id)?;
    let master = unlock_master_key(&user, password).await?;

    if collection.owner_id == user.id {
        return Ok(unwrap_collection_key(
            &collection.encrypted_collection_key,
            &master,
        )?);
    }

    let member = collection
        .members
        .iter()
        .find(|m| m.user_id == user.id)
        .ok_or_else(|| CofferError::not_found("collection member", user_id))?;
    let sealed = STANDARD
        .decode(&member.sealed_collection_key)
        .map_err(|e| CofferError::validation("sealed_collection_key", e.to_string()))?;

    let private = user.key_bundle.unlock_private_key(&master)?;
    let opened = open_sealed(&private, &sealed)?;
    if opened.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: opened.len(),
        }
        .into());
    }
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    bytes.copy_from_slice(&opened);
    Ok(CollectionKey::from_bytes(*bytes))
}
