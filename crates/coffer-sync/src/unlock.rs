//! Password → master key → collection key → file key
//!
//! Every key unlocked here lives only as long as the call that asked for it;
//! the key types zeroize on drop.

use coffer_core::{CofferError, CofferResult, File, User};
use coffer_crypto::{unwrap_collection_key, unwrap_file_key, CollectionKey, FileKey, MasterKey};
use secrecy::SecretString;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::context::VaultContext;

/// Run the Argon2id derivation off the async workers.
pub(crate) async fn unlock_master_key(
    user: &User,
    password: &SecretString,
) -> CofferResult<MasterKey> {
    let bundle = user.key_bundle.clone();
    let password = password.clone();
    let master = tokio::task::spawn_blocking(move || bundle.unlock(&password))
        .await
        .map_err(|e| CofferError::Store(anyhow::anyhow!("key derivation task failed: {e}")))??;
    debug!(user_id = %user.id, "master key unlocked");
    Ok(master)
}

/// Resolve the collection's owner and walk the chain down to the
/// collection key.
pub(crate) async fn unlock_collection_key(
    ctx: &VaultContext,
    collection_id: &str,
    password: &SecretString,
) -> CofferResult<CollectionKey> {
    let collection = ctx.repo.get_collection(collection_id)?;
    let owner = ctx.repo.get_user(&collection.owner_id)?;
    let master = unlock_master_key(&owner, password).await?;
    Ok(unwrap_collection_key(
        &collection.encrypted_collection_key,
        &master,
    )?)
}

pub(crate) fn unlock_file_key(
    file: &File,
    collection_key: &CollectionKey,
) -> CofferResult<FileKey> {
    let wrapped = file
        .encrypted_file_key
        .as_ref()
        .ok_or_else(|| CofferError::validation("encrypted_file_key", "missing"))?;
    Ok(unwrap_file_key(wrapped, collection_key)?)
}

/// Collection key for the duration of one call, derived on first use.
///
/// Collection sync hands one of these to every file it touches so the
/// password is stretched at most once; files that need no key never
/// trigger the derivation.
pub(crate) struct CollectionKeyScope<'a> {
    ctx: &'a VaultContext,
    collection_id: String,
    password: &'a SecretString,
    key: OnceCell<CollectionKey>,
}

impl<'a> CollectionKeyScope<'a> {
    pub(crate) fn new(
        ctx: &'a VaultContext,
        collection_id: impl Into<String>,
        password: &'a SecretString,
    ) -> Self {
        Self {
            ctx,
            collection_id: collection_id.into(),
            password,
            key: OnceCell::new(),
        }
    }

    pub(crate) async fn get(&self) -> CofferResult<&CollectionKey> {
        self.key
            .get_or_try_init(|| unlock_collection_key(self.ctx, &self.collection_id, self.password))
            .await
    }
}
