//! Offload, cloud delete and remote deletion.

use coffer_core::{CofferError, CofferResult, File, RemoteState, SyncOp, SyncStatus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::VaultContext;
use crate::state::{next_status, transition, Transition};
use crate::upload::upload_locked;

/// What happened to a file whose remote copy was deleted elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDeletion {
    /// Nothing unsynced was at stake; the record and its copies are gone
    Removed,
    /// Local edits were kept; the file is `LocalOnly` again
    Preserved(File),
}

/// Drop the local copies of a synced file, keeping the remote one. A
/// `ModifiedLocally` file is uploaded first.
pub async fn offload_file(
    ctx: &VaultContext,
    file_id: &str,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let _guard = ctx.locks.lock(file_id).await;
    let file = ctx.repo.get_file(file_id)?;
    offload_locked(ctx, file, cancel).await
}

pub(crate) async fn offload_locked(
    ctx: &VaultContext,
    file: File,
    cancel: &CancellationToken,
) -> CofferResult<File> {
    let next = next_status(file.sync_status, SyncOp::Offload)?;

    let mut file = if file.sync_status == SyncStatus::ModifiedLocally {
        info!(file_id = %file.id, "uploading local edits before offload");
        upload_locked(ctx, file, cancel).await?
    } else {
        file
    };
    let remote_id = file
        .remote_id
        .clone()
        .ok_or_else(|| CofferError::validation("remote_id", "file has no remote copy"))?;
    confirm_remote_copy(ctx, &file, &remote_id).await?;

    ctx.local.remove_all(&file).await;
    file.clear_local_paths();
    file.sync_status = next;
    ctx.repo.put_file(&file)?;

    info!(file_id = %file.id, remote_id = ?file.remote_id, "file offloaded");
    Ok(file)
}

/// The local copies may only go if the remote one is active and holds the
/// same ciphertext.
async fn confirm_remote_copy(
    ctx: &VaultContext,
    file: &File,
    remote_id: &str,
) -> CofferResult<()> {
    let remote = ctx.gateway.get_file(remote_id).await?;
    let reason = match remote.state {
        RemoteState::Active if remote.encrypted_hash == file.encrypted_hash => return Ok(()),
        RemoteState::Deleted => return Err(CofferError::NotFoundInCloud(remote_id.to_string())),
        RemoteState::Active => "remote copy holds different content",
        RemoteState::Pending | RemoteState::Archived => "remote copy is not available for download",
    };
    warn!(
        file_id = %file.id,
        remote_id,
        state = ?remote.state,
        "refusing to offload: {reason}"
    );
    Err(CofferError::InvalidState {
        operation: SyncOp::Offload,
        status: file.sync_status,
        reason,
    })
}

/// Delete the remote copy and keep whatever is local. A remote copy that is
/// already gone counts as deleted.
pub async fn cloud_delete_file(ctx: &VaultContext, file_id: &str) -> CofferResult<File> {
    let _guard = ctx.locks.lock(file_id).await;
    let mut file = ctx.repo.get_file(file_id)?;
    let next = next_status(file.sync_status, SyncOp::CloudDelete)?;

    let remote_id = file
        .remote_id
        .clone()
        .ok_or_else(|| CofferError::validation("remote_id", "file has no remote copy"))?;

    match ctx.gateway.delete_file(&remote_id).await {
        Ok(()) => {}
        Err(CofferError::NotFoundInCloud(_)) => {
            warn!(file_id, %remote_id, "remote copy already gone");
        }
        Err(e) => return Err(e),
    }

    if !file.has_local_copy() {
        warn!(file_id, "file had no local content; only its record remains");
    }
    file.remote_id = None;
    file.remote_state = None;
    file.version = 0;
    file.sync_status = next;
    ctx.repo.put_file(&file)?;

    info!(file_id, %remote_id, "deleted from cloud");
    Ok(file)
}

/// React to the backend reporting the remote copy deleted.
pub async fn apply_remote_deletion(
    ctx: &VaultContext,
    file_id: &str,
) -> CofferResult<RemoteDeletion> {
    let _guard = ctx.locks.lock(file_id).await;
    let file = ctx.repo.get_file(file_id)?;
    apply_remote_deletion_locked(ctx, file).await
}

pub(crate) async fn apply_remote_deletion_locked(
    ctx: &VaultContext,
    mut file: File,
) -> CofferResult<RemoteDeletion> {
    match transition(file.sync_status, SyncOp::RemoteDeleted)? {
        Transition::Remove => {
            ctx.local.remove_all(&file).await;
            ctx.repo.delete_file(&file.id)?;
            info!(file_id = %file.id, "remote copy deleted, removed locally");
            Ok(RemoteDeletion::Removed)
        }
        Transition::To(next) => {
            file.remote_id = None;
            file.remote_state = Some(RemoteState::Deleted);
            file.version = 0;
            file.sync_status = next;
            ctx.repo.put_file(&file)?;
            warn!(file_id = %file.id, "remote copy deleted, keeping unsynced local edits");
            Ok(RemoteDeletion::Preserved(file))
        }
    }
}
