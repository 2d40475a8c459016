//! Download orchestration: onload of cloud-only files and refresh of synced
//! files whose remote copy is newer.
//!
//! The status check and the whole key chain run before anything touches the
//! disk, so a wrong password leaves no trace.

use coffer_core::paths::resolve_extension;
use coffer_core::{CofferError, CofferResult, File, FileMetadata, RemoteState, SyncOp};
use coffer_crypto::{ciphertext_hash, decrypt_content, decrypt_metadata, CollectionKey};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::VaultContext;
use crate::state::next_status;
use crate::unlock::{unlock_file_key, CollectionKeyScope};

async fn fetch(ctx: &VaultContext, url: &str, cancel: &CancellationToken) -> CofferResult<Vec<u8>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CofferError::Cancelled),
        res = ctx.gateway.get_object(url) => res,
    }
}

/// Bring a `CloudOnly` file back to disk.
pub async fn onload_file(
    ctx: &VaultContext,
    file_id: &str,
    password: &SecretString,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let _guard = ctx.locks.lock(file_id).await;
    let file = ctx.repo.get_file(file_id)?;
    next_status(file.sync_status, SyncOp::Onload)?;

    let keys = CollectionKeyScope::new(ctx, file.collection_id.clone(), password);
    onload_locked(ctx, file, &keys, cancel).await
}

/// Replace the local copies of a `Synced` file with the remote content.
pub async fn download_file(
    ctx: &VaultContext,
    file_id: &str,
    password: &SecretString,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let _guard = ctx.locks.lock(file_id).await;
    let file = ctx.repo.get_file(file_id)?;
    next_status(file.sync_status, SyncOp::Download)?;

    let keys = CollectionKeyScope::new(ctx, file.collection_id.clone(), password);
    download_locked(ctx, file, &keys, cancel).await
}

pub(crate) async fn onload_locked(
    ctx: &VaultContext,
    file: File,
    keys: &CollectionKeyScope<'_>,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let next = next_status(file.sync_status, SyncOp::Onload)?;
    let collection_key = keys.get().await?;
    fetch_and_store(ctx, file, collection_key, next, cancel).await
}

pub(crate) async fn download_locked(
    ctx: &VaultContext,
    file: File,
    keys: &CollectionKeyScope<'_>,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let next = next_status(file.sync_status, SyncOp::Download)?;
    let collection_key = keys.get().await?;
    fetch_and_store(ctx, file, collection_key, next, cancel).await
}

async fn fetch_and_store(
    ctx: &VaultContext,
    mut file: File,
    collection_key: &CollectionKey,
    next: coffer_core::SyncStatus,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let remote_id = file
        .remote_id
        .clone()
        .ok_or_else(|| CofferError::validation("remote_id", "file has no remote copy"))?;

    let remote = ctx.gateway.get_file(&remote_id).await?;
    if remote.state != RemoteState::Active {
        return Err(CofferError::NotFoundInCloud(remote_id));
    }
    file.absorb_remote(&remote);

    let file_key = unlock_file_key(&file, collection_key)?;
    let metadata: FileMetadata = decrypt_metadata(&file.encrypted_metadata, &file_key)?;

    if cancel.is_cancelled() {
        return Err(CofferError::Cancelled);
    }
    let urls = ctx
        .gateway
        .download_url(&remote_id, ctx.settings.url_request())
        .await?;
    let encrypted = fetch(ctx, &urls.presigned_download_url, cancel).await?;
    if ciphertext_hash(&encrypted) != file.encrypted_hash {
        return Err(CofferError::IntegrityMismatch(file.id.clone()));
    }
    let plaintext = decrypt_content(&file_key, &encrypted)?;
    debug!(file_id = %file.id, %remote_id, bytes = plaintext.len(), "content downloaded");

    let thumbnail = match urls.presigned_thumbnail_url.as_deref() {
        Some(url) => match fetch(ctx, url, cancel).await {
            Ok(bytes) => match decrypt_content(&file_key, &bytes) {
                Ok(plain) => Some((bytes, plain)),
                Err(e) => {
                    warn!(file_id = %file.id, "thumbnail failed to decrypt, skipping: {e}");
                    None
                }
            },
            Err(CofferError::Cancelled) => return Err(CofferError::Cancelled),
            Err(e) => {
                warn!(file_id = %file.id, "thumbnail download failed, skipping: {e}");
                None
            }
        },
        None => None,
    };

    let layout = ctx.layout();
    let mode = file.storage_mode;
    let collection_id = file.collection_id.clone();
    let id = file.id.clone();

    if mode.keeps_encrypted() {
        let path = layout.encrypted_path(&collection_id, &id);
        ctx.local.write_atomic(&path, &encrypted).await?;
        file.encrypted_path = Some(path);
    }
    if mode.keeps_decrypted() {
        let path = layout.decrypted_path(&collection_id, &id, &resolve_extension(&metadata));
        ctx.local.write_atomic(&path, &plaintext).await?;
        if let Some(old) = file.decrypted_path.replace(path.clone()) {
            if old != path {
                ctx.local.remove(&old).await?;
            }
        }
    }
    if let Some((encrypted_thumb, plain_thumb)) = &thumbnail {
        if mode.keeps_encrypted() {
            let path = layout.encrypted_thumbnail_path(&collection_id, &id);
            ctx.local.write_atomic(&path, encrypted_thumb).await?;
            file.encrypted_thumbnail_path = Some(path);
        }
        if mode.keeps_decrypted() {
            let path = layout.decrypted_thumbnail_path(&collection_id, &id);
            ctx.local.write_atomic(&path, plain_thumb).await?;
            file.decrypted_thumbnail_path = Some(path);
        }
    }

    file.sync_status = next;
    ctx.repo.put_file(&file)?;

    info!(
        file_id = %file.id,
        %remote_id,
        version = file.version,
        bytes = plaintext.len(),
        storage_mode = %mode,
        "file restored from cloud"
    );
    Ok(file)
}
