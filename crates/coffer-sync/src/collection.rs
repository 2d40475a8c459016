//! Collection sync: diff local and remote file sets and sync every file,
//! isolating failures per file.

use std::collections::HashMap;

use coffer_core::{CofferError, CofferResult, File, RemoteFile};
use futures::stream::{self, StreamExt};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::VaultContext;
use crate::engine::{execute, SyncOutcome};
use crate::unlock::CollectionKeyScope;

/// One file that could not be synced
#[derive(Debug)]
pub struct SyncFailure {
    pub file_id: String,
    pub error: CofferError,
}

#[derive(Debug, Default)]
pub struct CollectionSyncReport {
    pub total: usize,
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Conflicts and remote deletions that kept local edits
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<SyncFailure>,
}

impl CollectionSyncReport {
    fn record(&mut self, file_id: String, result: CofferResult<SyncOutcome>) {
        match result {
            Ok(SyncOutcome::Uploaded(_)) => self.uploaded += 1,
            Ok(SyncOutcome::Downloaded(_)) => self.downloaded += 1,
            Ok(SyncOutcome::Removed) => self.deleted += 1,
            Ok(SyncOutcome::Unchanged | SyncOutcome::MetadataRefreshed(_)) => self.unchanged += 1,
            Ok(SyncOutcome::Conflict | SyncOutcome::Preserved(_)) => self.skipped += 1,
            Err(error) => {
                warn!(%file_id, "sync failed: {error}");
                self.failed += 1;
                self.failures.push(SyncFailure { file_id, error });
            }
        }
    }

    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

/// One unit of work: a file id and the remote copy listed for it, if any.
/// The local record is read under the file lock.
struct Pair {
    id: String,
    remote: Option<RemoteFile>,
}

fn pair_up(
    ctx: &VaultContext,
    locals: Vec<File>,
    remotes: Vec<RemoteFile>,
) -> CofferResult<Vec<Pair>> {
    let mut pairs = Vec::with_capacity(locals.len() + remotes.len());
    let mut remotes_by_id: HashMap<String, RemoteFile> =
        remotes.into_iter().map(|r| (r.id.clone(), r)).collect();

    for local in locals {
        let remote = local
            .remote_id
            .as_deref()
            .and_then(|rid| remotes_by_id.remove(rid));
        pairs.push(Pair {
            id: local.id,
            remote,
        });
    }

    let mut unmatched: Vec<RemoteFile> = remotes_by_id.into_values().collect();
    unmatched.sort_by(|a, b| a.id.cmp(&b.id));
    for remote in unmatched {
        // A record in another collection may already point at this remote id.
        if let Some(existing) = ctx.repo.file_by_remote_id(&remote.id)? {
            warn!(
                file_id = %existing.id,
                remote_id = %remote.id,
                "remote file is tracked under another collection locally, skipping"
            );
            continue;
        }
        pairs.push(Pair {
            id: remote.id.clone(),
            remote: Some(remote),
        });
    }
    Ok(pairs)
}

async fn sync_pair(
    ctx: &VaultContext,
    pair: Pair,
    keys: &CollectionKeyScope<'_>,
    cancel: &CancellationToken,
) -> CofferResult<SyncOutcome> {
    if cancel.is_cancelled() {
        return Err(CofferError::Cancelled);
    }
    let _guard = ctx.locks.lock(&pair.id).await;
    // Re-read under the lock: another caller may have moved the file on, or
    // already fetched a remote-only one.
    let local = ctx.repo.find_file(&pair.id)?;
    execute(ctx, &pair.id, local, pair.remote, keys, cancel).await
}

/// Sync every file of a collection, up to `settings.concurrency` at a time.
///
/// Only failures that prevent diffing (unknown collection, listing error)
/// fail the call; per-file errors land in the report.
pub async fn sync_collection(
    ctx: &VaultContext,
    collection_id: &str,
    password: &SecretString,
    cancel: &CancellationToken,
) -> CofferResult<CollectionSyncReport> {
    let collection = ctx.repo.get_collection(collection_id)?;
    let remotes = ctx.gateway.list_files(&collection.id).await?;
    let locals = ctx.repo.files_in_collection(&collection.id)?;
    let pairs = pair_up(ctx, locals, remotes)?;

    let keys = CollectionKeyScope::new(ctx, collection.id.clone(), password);
    let mut report = CollectionSyncReport {
        total: pairs.len(),
        ..Default::default()
    };

    let results: Vec<(String, CofferResult<SyncOutcome>)> = stream::iter(pairs)
        .map(|pair| {
            let keys = &keys;
            async move {
                let id = pair.id.clone();
                (id, sync_pair(ctx, pair, keys, cancel).await)
            }
        })
        .buffer_unordered(ctx.settings.concurrency.max(1))
        .collect()
        .await;

    for (file_id, result) in results {
        report.record(file_id, result);
    }

    info!(
        collection_id,
        total = report.total,
        uploaded = report.uploaded,
        downloaded = report.downloaded,
        deleted = report.deleted,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failed,
        "collection sync finished"
    );
    Ok(report)
}
