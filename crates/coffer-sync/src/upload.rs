//! Upload orchestration
//!
//! New remote file (three steps):
//! ```text
//! create_pending ──► PUT content (+ thumbnail) ──► complete ──► Synced
//!       │
//!       └─ remote_id persisted here, so a failed transfer resumes from the
//!          PUT on the next attempt instead of creating a second record
//! ```
//!
//! Existing remote file: `update_file` with the last seen version, fresh
//! upload URLs, then PUT and complete as above. The update sends the remote
//! back to pending, so a failed PUT is resumed rather than mistaken for a
//! finished upload.
//!
//! Only the content transfer is fatal. A failed thumbnail transfer is logged
//! and the upload completes without it.

use coffer_core::api::{CompleteUploadRequest, CreatePendingRequest, UpdateFileRequest};
use coffer_core::{CofferError, CofferResult, File, RemoteFile, RemoteState, StorageMode, SyncOp};
use coffer_crypto::{ciphertext_hash, is_placeholder_version};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::VaultContext;
use crate::state::next_status;

/// Where the bytes go for this attempt
struct UploadTarget {
    remote_id: String,
    content_url: String,
    thumbnail_url: Option<String>,
}

/// What the remote side looks like before transferring anything
enum RemotePlan {
    Create,
    Resume(RemoteFile),
    Update(RemoteFile),
    AlreadyUploaded(RemoteFile),
}

/// Upload a `LocalOnly` or `ModifiedLocally` file, holding its lock.
pub async fn upload_file(
    ctx: &VaultContext,
    file_id: &str,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let _guard = ctx.locks.lock(file_id).await;
    let file = ctx.repo.get_file(file_id)?;
    upload_locked(ctx, file, cancel).await
}

/// Checks made before any network call.
fn check_preconditions(file: &File) -> CofferResult<()> {
    if file.storage_mode == StorageMode::DecryptedOnly {
        return Err(CofferError::validation(
            "storage_mode",
            "decrypted-only files cannot be uploaded",
        ));
    }
    if file.encrypted_file_key.is_none() {
        return Err(CofferError::validation("encrypted_file_key", "missing"));
    }
    if is_placeholder_version(&file.encryption_version) {
        return Err(CofferError::validation(
            "encryption_version",
            format!("placeholder value {:?}", file.encryption_version),
        ));
    }
    Ok(())
}

fn checkpoint(cancel: &CancellationToken) -> CofferResult<()> {
    if cancel.is_cancelled() {
        return Err(CofferError::Cancelled);
    }
    Ok(())
}

/// A failure after the remote record exists. Cancellation stays
/// cancellation; everything else carries the remote id for the retry.
fn incomplete(remote_id: &str, err: CofferError) -> CofferError {
    match err {
        CofferError::Cancelled => CofferError::Cancelled,
        other => CofferError::UploadIncomplete {
            remote_id: remote_id.to_string(),
            reason: other.to_string(),
        },
    }
}

async fn transfer(
    ctx: &VaultContext,
    url: &str,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> CofferResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CofferError::Cancelled),
        res = ctx.gateway.put_object(url, bytes) => res,
    }
}

async fn load_thumbnail(ctx: &VaultContext, file: &File) -> Option<Vec<u8>> {
    let path = file.encrypted_thumbnail_path.as_deref()?;
    match ctx.local.read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(
                file_id = %file.id,
                path = %path.display(),
                "thumbnail unreadable, uploading without it: {e}"
            );
            None
        }
    }
}

async fn plan_remote(ctx: &VaultContext, file: &File) -> CofferResult<RemotePlan> {
    let Some(remote_id) = file.remote_id.as_deref() else {
        return Ok(RemotePlan::Create);
    };

    match ctx.gateway.get_file(remote_id).await {
        Ok(remote) => Ok(match remote.state {
            RemoteState::Pending => RemotePlan::Resume(remote),
            RemoteState::Deleted => {
                warn!(file_id = %file.id, remote_id, "remote copy was deleted, creating a new one");
                RemotePlan::Create
            }
            RemoteState::Active if remote.encrypted_hash == file.encrypted_hash =>
            {
                RemotePlan::AlreadyUploaded(remote)
            }
            RemoteState::Active | RemoteState::Archived => RemotePlan::Update(remote),
        }),
        Err(CofferError::NotFoundInCloud(_)) => {
            warn!(file_id = %file.id, remote_id, "remote copy not found, creating a new one");
            Ok(RemotePlan::Create)
        }
        Err(e) => Err(e),
    }
}

/// Step 1 of the create protocol. The new remote id is saved before any
/// bytes move.
async fn create_remote(ctx: &VaultContext, file: &mut File) -> CofferResult<UploadTarget> {
    let req = CreatePendingRequest::for_file(file)?;
    let resp = ctx.gateway.create_pending(&req).await?;
    debug!(
        file_id = %file.id,
        remote_id = %resp.file_id,
        expires_at = %resp.expires_at,
        "pending remote file created"
    );

    file.remote_id = Some(resp.file_id.clone());
    file.remote_state = Some(RemoteState::Pending);
    ctx.repo.put_file(file)?;

    Ok(UploadTarget {
        remote_id: resp.file_id,
        content_url: resp.presigned_upload_url,
        thumbnail_url: resp.presigned_thumbnail_url,
    })
}

/// Fresh presigned URLs for an existing remote id, after bringing its
/// metadata in line with the local record.
async fn reuse_remote(
    ctx: &VaultContext,
    file: &File,
    remote: &RemoteFile,
    version: u64,
) -> CofferResult<UploadTarget> {
    let stale = remote.encrypted_hash != file.encrypted_hash
        || remote.encrypted_metadata != file.encrypted_metadata
        || remote.encrypted_file_size_in_bytes != file.encrypted_size
        || remote.encrypted_thumbnail_size_in_bytes != file.encrypted_thumbnail_size;
    if stale {
        let mut req = UpdateFileRequest::for_file(file)?;
        req.version = version;
        let updated = ctx.gateway.update_file(&remote.id, &req).await?;
        debug!(
            file_id = %file.id,
            remote_id = %remote.id,
            version = updated.version,
            "remote metadata updated"
        );
    }

    let urls = ctx
        .gateway
        .upload_url(&remote.id, ctx.settings.url_request())
        .await?;
    Ok(UploadTarget {
        remote_id: remote.id.clone(),
        content_url: urls.presigned_upload_url,
        thumbnail_url: urls.presigned_thumbnail_url,
    })
}

/// Upload with the file's lock already held by the caller.
pub(crate) async fn upload_locked(
    ctx: &VaultContext,
    mut file: File,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let next = next_status(file.sync_status, SyncOp::Upload)?;
    check_preconditions(&file)?;

    let content = ctx.local.load_file_data(&file).await?;
    if ciphertext_hash(&content) != file.encrypted_hash {
        return Err(CofferError::IntegrityMismatch(file.id.clone()));
    }
    let thumbnail = load_thumbnail(ctx, &file).await;
    checkpoint(cancel)?;

    let target = match plan_remote(ctx, &file).await? {
        RemotePlan::AlreadyUploaded(remote) => {
            info!(file_id = %file.id, remote_id = %remote.id, "remote already holds this content");
            file.absorb_remote(&remote);
            file.sync_status = next;
            ctx.repo.put_file(&file)?;
            return Ok(file);
        }
        RemotePlan::Create => create_remote(ctx, &mut file).await?,
        RemotePlan::Resume(remote) => {
            info!(file_id = %file.id, remote_id = %remote.id, "resuming pending upload");
            let version = remote.version;
            reuse_remote(ctx, &file, &remote, version)
                .await
                .map_err(|e| incomplete(&remote.id, e))?
        }
        RemotePlan::Update(remote) => {
            // A stale local version answers 409 here, before any bytes move.
            let target = reuse_remote(ctx, &file, &remote, file.version).await?;
            file.remote_state = Some(RemoteState::Pending);
            ctx.repo.put_file(&file)?;
            target
        }
    };
    let remote_id = target.remote_id.clone();

    // Step 2: content is fatal, thumbnail is not.
    checkpoint(cancel).map_err(|e| incomplete(&remote_id, e))?;
    transfer(ctx, &target.content_url, &content, cancel)
        .await
        .map_err(|e| incomplete(&remote_id, e))?;
    debug!(file_id = %file.id, %remote_id, bytes = content.len(), "content uploaded");

    let mut thumbnail_confirmed = false;
    match (&thumbnail, &target.thumbnail_url) {
        (Some(bytes), Some(url)) => match transfer(ctx, url, bytes, cancel).await {
            Ok(()) => thumbnail_confirmed = true,
            Err(CofferError::Cancelled) => return Err(CofferError::Cancelled),
            Err(e) => {
                warn!(
                    file_id = %file.id,
                    %remote_id,
                    "thumbnail upload failed, completing without it: {e}"
                )
            }
        },
        (Some(_), None) => {
            warn!(
                file_id = %file.id,
                %remote_id,
                "no thumbnail URL issued, completing without thumbnail"
            )
        }
        _ => {}
    }

    // Step 3
    checkpoint(cancel)?;
    let done = ctx
        .gateway
        .complete_upload(
            &remote_id,
            &CompleteUploadRequest {
                actual_file_size_in_bytes: content.len() as u64,
                actual_thumbnail_size_in_bytes: thumbnail
                    .as_ref()
                    .filter(|_| thumbnail_confirmed)
                    .map(|t| t.len() as u64),
                upload_confirmed: true,
                thumbnail_upload_confirmed: thumbnail_confirmed,
            },
        )
        .await
        .map_err(|e| incomplete(&remote_id, e))?;
    if !done.upload_verified {
        return Err(CofferError::UploadIncomplete {
            remote_id,
            reason: format!(
                "backend could not verify upload (stored {} bytes, sent {})",
                done.actual_file_size_in_bytes,
                content.len()
            ),
        });
    }

    let remote = ctx
        .gateway
        .get_file(&remote_id)
        .await
        .map_err(|e| incomplete(&remote_id, e))?;
    if remote.encrypted_hash != file.encrypted_hash {
        return Err(CofferError::IntegrityMismatch(file.id.clone()));
    }
    if remote.state != RemoteState::Active {
        return Err(CofferError::UploadIncomplete {
            remote_id,
            reason: format!("remote is still {:?} after complete", remote.state),
        });
    }
    file.absorb_remote(&remote);
    file.sync_status = next;
    ctx.repo.put_file(&file)?;

    info!(
        file_id = %file.id,
        %remote_id,
        version = file.version,
        bytes = content.len(),
        thumbnail = thumbnail_confirmed,
        "upload complete"
    );
    Ok(file)
}
