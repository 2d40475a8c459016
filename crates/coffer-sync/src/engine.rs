//! Bidirectional per-file sync
//!
//! [`plan`] is pure: given the local record and the remote DTO it picks one
//! action. [`sync_file`] fetches both sides, plans, and executes under the
//! file's lock.

use std::cmp::Ordering;

use coffer_core::{CofferError, CofferResult, File, RemoteFile, RemoteState, SyncOp, SyncStatus};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::VaultContext;
use crate::download::{download_locked, onload_locked};
use crate::lifecycle::{apply_remote_deletion_locked, RemoteDeletion};
use crate::state::next_status;
use crate::unlock::CollectionKeyScope;
use crate::upload::upload_locked;

/// What one sync pass should do with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Push local content (create, resume or update in place)
    Upload,
    /// Replace local copies with newer remote content
    Download,
    /// Remote-only file: create a cloud-only record and onload it
    Fetch,
    /// Cloud-only file with newer remote metadata; nothing to transfer
    RefreshMetadata,
    /// The remote copy is gone
    RemoteDeleted,
    /// Both sides changed; local edits are kept and nothing moves
    Conflict,
    Noop,
}

/// Result of one executed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Uploaded(File),
    Downloaded(File),
    MetadataRefreshed(File),
    Removed,
    Preserved(File),
    Conflict,
    Unchanged,
}

/// Choose the action for a local record and its remote counterpart.
pub fn plan(
    file_id: &str,
    local: Option<&File>,
    remote: Option<&RemoteFile>,
) -> CofferResult<SyncAction> {
    let action = match (local, remote) {
        (None, None) => return Err(CofferError::not_found("file", file_id)),

        (None, Some(remote)) => match remote.state {
            RemoteState::Active => SyncAction::Fetch,
            RemoteState::Pending | RemoteState::Deleted | RemoteState::Archived => SyncAction::Noop,
        },

        (Some(local), None) => match (&local.remote_id, local.sync_status) {
            (None, SyncStatus::LocalOnly | SyncStatus::ModifiedLocally) => SyncAction::Upload,
            (None, _) => SyncAction::Noop,
            (Some(_), SyncStatus::LocalOnly) => SyncAction::Upload,
            (Some(_), _) => SyncAction::RemoteDeleted,
        },

        (Some(local), Some(remote)) => match remote.state {
            RemoteState::Deleted if local.sync_status == SyncStatus::LocalOnly => {
                SyncAction::Upload
            }
            RemoteState::Deleted => SyncAction::RemoteDeleted,
            RemoteState::Archived => SyncAction::Noop,
            // A synced or cloud-only record has nothing to push; the
            // pending transfer belongs to whoever changed the remote.
            RemoteState::Pending => match local.sync_status {
                SyncStatus::CloudOnly | SyncStatus::Synced => SyncAction::Noop,
                SyncStatus::LocalOnly | SyncStatus::ModifiedLocally => SyncAction::Upload,
            },
            RemoteState::Active => {
                match (local.sync_status, local.modified_at.cmp(&remote.modified_at)) {
                    (SyncStatus::CloudOnly, Ordering::Less) => SyncAction::RefreshMetadata,
                    (SyncStatus::CloudOnly, _) => SyncAction::Noop,
                    (SyncStatus::Synced, Ordering::Greater) => SyncAction::Upload,
                    (SyncStatus::Synced, Ordering::Less) => SyncAction::Download,
                    (SyncStatus::Synced, Ordering::Equal) => SyncAction::Noop,
                    (SyncStatus::LocalOnly | SyncStatus::ModifiedLocally, Ordering::Less) => {
                        SyncAction::Conflict
                    }
                    (SyncStatus::LocalOnly | SyncStatus::ModifiedLocally, _) => SyncAction::Upload,
                }
            }
        },
    };
    Ok(action)
}

/// Remote counterpart of `local`, or of a remote-only id. A 404 means
/// there is none.
async fn fetch_remote(
    ctx: &VaultContext,
    file_id: &str,
    local: Option<&File>,
) -> CofferResult<Option<RemoteFile>> {
    let remote_id = match local {
        Some(file) => match &file.remote_id {
            Some(id) => id.as_str(),
            None => return Ok(None),
        },
        None => file_id,
    };
    match ctx.gateway.get_file(remote_id).await {
        Ok(remote) => Ok(Some(remote)),
        Err(CofferError::NotFoundInCloud(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Sync one file in whichever direction is needed.
///
/// `file_id` is a local id, or the remote id of a file not yet known
/// locally. The password is only stretched if the action needs a key.
pub async fn sync_file(
    ctx: &VaultContext,
    file_id: &str,
    password: &SecretString,
    cancel: &CancellationToken,
) -> CofferResult<SyncOutcome> {
    let _guard = ctx.locks.lock(file_id).await;
    let local = ctx.repo.find_file(file_id)?;
    let remote = fetch_remote(ctx, file_id, local.as_ref()).await?;

    let collection_id = local
        .as_ref()
        .map(|f| f.collection_id.clone())
        .or_else(|| remote.as_ref().map(|r| r.collection_id.clone()))
        .unwrap_or_default();
    let keys = CollectionKeyScope::new(ctx, collection_id, password);

    execute(ctx, file_id, local, remote, &keys, cancel).await
}

/// Plan and run the action for one pair. The caller holds the file lock.
pub(crate) async fn execute(
    ctx: &VaultContext,
    file_id: &str,
    local: Option<File>,
    remote: Option<RemoteFile>,
    keys: &CollectionKeyScope<'_>,
    cancel: &CancellationToken,
) -> CofferResult<SyncOutcome> {
    let action = plan(file_id, local.as_ref(), remote.as_ref())?;
    debug!(file_id, ?action, "sync planned");

    if action != SyncAction::Noop && cancel.is_cancelled() {
        return Err(CofferError::Cancelled);
    }

    match (action, local, remote) {
        (SyncAction::Noop, _, _) => Ok(SyncOutcome::Unchanged),

        (SyncAction::Conflict, _, _) => {
            warn!(file_id, "local and remote both changed; keeping local edits, skipping");
            Ok(SyncOutcome::Conflict)
        }

        (SyncAction::Upload, Some(mut file), _) => {
            if file.sync_status == SyncStatus::Synced {
                file.sync_status = next_status(file.sync_status, SyncOp::LocalEdit)?;
            }
            Ok(SyncOutcome::Uploaded(upload_locked(ctx, file, cancel).await?))
        }

        (SyncAction::Download, Some(file), _) => {
            Ok(SyncOutcome::Downloaded(download_locked(ctx, file, keys, cancel).await?))
        }

        (SyncAction::Fetch, None, Some(remote)) => {
            let file = File::from_remote(&remote, ctx.settings.default_storage_mode);
            ctx.repo.put_file(&file)?;
            info!(
                file_id = %file.id,
                collection_id = %file.collection_id,
                "discovered remote file"
            );
            Ok(SyncOutcome::Downloaded(onload_locked(ctx, file, keys, cancel).await?))
        }

        (SyncAction::RefreshMetadata, Some(mut file), Some(remote)) => {
            file.absorb_remote(&remote);
            ctx.repo.put_file(&file)?;
            debug!(file_id, version = file.version, "cloud-only metadata refreshed");
            Ok(SyncOutcome::MetadataRefreshed(file))
        }

        (SyncAction::RemoteDeleted, Some(file), _) => {
            match apply_remote_deletion_locked(ctx, file).await? {
                RemoteDeletion::Removed => Ok(SyncOutcome::Removed),
                RemoteDeletion::Preserved(file) => Ok(SyncOutcome::Preserved(file)),
            }
        }

        (action, local, remote) => Err(CofferError::Store(anyhow::anyhow!(
            "sync plan {action:?} does not fit local={} remote={}",
            local.is_some(),
            remote.is_some()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coffer_core::StorageMode;
    use coffer_crypto::{generate_key, wrap_file_key, CollectionKey, FileKey};
    use proptest::prelude::*;

    fn remote(state: RemoteState, age_secs: i64) -> RemoteFile {
        let at = Utc::now() - Duration::seconds(age_secs);
        RemoteFile {
            id: "r1".into(),
            collection_id: "c1".into(),
            owner_id: "u1".into(),
            encrypted_metadata: String::new(),
            encrypted_file_key: wrap_file_key(
                &generate_key::<FileKey>(),
                &generate_key::<CollectionKey>(),
            )
            .unwrap(),
            encryption_version: coffer_crypto::ENCRYPTION_VERSION.into(),
            encrypted_hash: "00".into(),
            encrypted_file_object_key: "obj".into(),
            encrypted_file_size_in_bytes: 1,
            encrypted_thumbnail_object_key: None,
            encrypted_thumbnail_size_in_bytes: None,
            state,
            created_at: at,
            modified_at: at,
            version: 1,
        }
    }

    fn local(status: SyncStatus, remote: &RemoteFile, offset_secs: i64) -> File {
        let mut file = File::from_remote(remote, StorageMode::Hybrid);
        file.sync_status = status;
        file.modified_at = remote.modified_at + Duration::seconds(offset_secs);
        file
    }

    #[test]
    fn test_absent_everywhere_is_not_found() {
        assert!(matches!(
            plan("x", None, None).unwrap_err(),
            CofferError::NotFound { kind: "file", .. }
        ));
    }

    #[test]
    fn test_one_sided_files_transfer_toward_the_missing_side() {
        let r = remote(RemoteState::Active, 10);
        assert_eq!(plan("r1", None, Some(&r)).unwrap(), SyncAction::Fetch);

        let mut l = local(SyncStatus::LocalOnly, &r, 0);
        l.remote_id = None;
        assert_eq!(plan("r1", Some(&l), None).unwrap(), SyncAction::Upload);

        let synced = local(SyncStatus::Synced, &r, 0);
        assert_eq!(plan("r1", Some(&synced), None).unwrap(), SyncAction::RemoteDeleted);
    }

    #[test]
    fn test_remote_states() {
        let deleted = remote(RemoteState::Deleted, 10);
        let l = local(SyncStatus::Synced, &deleted, 0);
        assert_eq!(plan("r1", Some(&l), Some(&deleted)).unwrap(), SyncAction::RemoteDeleted);

        let pending = remote(RemoteState::Pending, 10);
        let l = local(SyncStatus::LocalOnly, &pending, 0);
        assert_eq!(plan("r1", Some(&l), Some(&pending)).unwrap(), SyncAction::Upload);
        assert_eq!(plan("r1", None, Some(&pending)).unwrap(), SyncAction::Noop);
        let l = local(SyncStatus::ModifiedLocally, &pending, 5);
        assert_eq!(plan("r1", Some(&l), Some(&pending)).unwrap(), SyncAction::Upload);
        let l = local(SyncStatus::Synced, &pending, 5);
        assert_eq!(plan("r1", Some(&l), Some(&pending)).unwrap(), SyncAction::Noop);

        let archived = remote(RemoteState::Archived, 10);
        let l = local(SyncStatus::Synced, &archived, 5);
        assert_eq!(plan("r1", Some(&l), Some(&archived)).unwrap(), SyncAction::Noop);
    }

    #[test]
    fn test_modified_locally_with_newer_remote_is_conflict() {
        let r = remote(RemoteState::Active, 10);
        let l = local(SyncStatus::ModifiedLocally, &r, -5);
        assert_eq!(plan("r1", Some(&l), Some(&r)).unwrap(), SyncAction::Conflict);
    }

    #[test]
    fn test_cloud_only_with_newer_remote_refreshes_metadata() {
        let r = remote(RemoteState::Active, 10);
        let l = local(SyncStatus::CloudOnly, &r, -5);
        assert_eq!(plan("r1", Some(&l), Some(&r)).unwrap(), SyncAction::RefreshMetadata);
    }

    proptest! {
        #[test]
        fn synced_direction_follows_timestamps(offset in -100_000i64..100_000) {
            let r = remote(RemoteState::Active, 200_000);
            let l = local(SyncStatus::Synced, &r, offset);
            let expected = match offset.cmp(&0) {
                Ordering::Greater => SyncAction::Upload,
                Ordering::Less => SyncAction::Download,
                Ordering::Equal => SyncAction::Noop,
            };
            prop_assert_eq!(plan("r1", Some(&l), Some(&r)).unwrap(), expected);
        }
    }
}
