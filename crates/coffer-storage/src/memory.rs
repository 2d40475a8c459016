//! In-process backend used by tests and offline runs
//!
//! Mirrors the server contract closely enough to drive every orchestrator:
//! pending files become active on a verified complete, completes are
//! idempotent, updates are version-checked and send the file back to
//! pending until the new bytes are completed, deletes are soft. Faults can be
//! injected per content hash or for all thumbnail uploads.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use coffer_core::api::{
    CompleteUploadRequest, CompleteUploadResponse, CreatePendingRequest, CreatePendingResponse,
    DownloadUrlResponse, PresignedUrlRequest, UpdateFileRequest, UploadUrlResponse,
};
use coffer_core::{CofferError, CofferResult, RemoteFile, RemoteState};
use tracing::debug;

use crate::gateway::RemoteGateway;

const URL_SCHEME: &str = "memory://objects/";
const OWNER_ID: &str = "memory-owner";

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<String, RemoteFile>,
    objects: HashMap<String, Vec<u8>>,
    failing_hashes: HashSet<String>,
    fail_thumbnails: bool,
    create_pending_calls: usize,
    complete_calls: usize,
}

/// Cheap to clone; clones share the same backend state.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
}

fn content_key(file_id: &str) -> String {
    format!("{file_id}/content")
}

fn thumbnail_key(file_id: &str) -> String {
    format!("{file_id}/thumbnail")
}

fn url_for(key: &str) -> String {
    format!("{URL_SCHEME}{key}")
}

fn injected(what: &str) -> CofferError {
    CofferError::Transport {
        status: 500,
        body: format!("injected {what} failure"),
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail every content upload whose remote record carries this hash.
    pub fn fail_content_uploads_with_hash(&self, encrypted_hash: &str) {
        self.lock().failing_hashes.insert(encrypted_hash.to_string());
    }

    pub fn fail_thumbnail_uploads(&self, fail: bool) {
        self.lock().fail_thumbnails = fail;
    }

    pub fn clear_faults(&self) {
        let mut inner = self.lock();
        inner.failing_hashes.clear();
        inner.fail_thumbnails = false;
    }

    /// Insert an already complete remote file with its encrypted content.
    pub fn seed_file(&self, file: RemoteFile, content: Vec<u8>, thumbnail: Option<Vec<u8>>) {
        let mut inner = self.lock();
        inner.objects.insert(content_key(&file.id), content);
        if let Some(thumbnail) = thumbnail {
            inner.objects.insert(thumbnail_key(&file.id), thumbnail);
        }
        inner.files.insert(file.id.clone(), file);
    }

    /// Soft-delete as if another device had removed the file.
    pub fn mark_deleted(&self, file_id: &str) {
        if let Some(file) = self.lock().files.get_mut(file_id) {
            file.state = RemoteState::Deleted;
            file.version += 1;
            file.modified_at = Utc::now();
        }
    }

    pub fn remote_file(&self, file_id: &str) -> Option<RemoteFile> {
        self.lock().files.get(file_id).cloned()
    }

    pub fn object(&self, file_id: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(&content_key(file_id)).cloned()
    }

    pub fn thumbnail(&self, file_id: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(&thumbnail_key(file_id)).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.lock().files.len()
    }

    pub fn create_pending_calls(&self) -> usize {
        self.lock().create_pending_calls
    }

    pub fn complete_calls(&self) -> usize {
        self.lock().complete_calls
    }

    fn parse_url(url: &str) -> CofferResult<&str> {
        url.strip_prefix(URL_SCHEME)
            .ok_or_else(|| CofferError::Connection(format!("unsupported object URL: {url}")))
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn create_pending(
        &self,
        req: &CreatePendingRequest,
    ) -> CofferResult<CreatePendingResponse> {
        let mut inner = self.lock();
        inner.create_pending_calls += 1;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let thumbnail = req.expected_thumbnail_size_in_bytes.map(|_| thumbnail_key(&id));
        let file = RemoteFile {
            id: id.clone(),
            collection_id: req.collection_id.clone(),
            owner_id: OWNER_ID.to_string(),
            encrypted_metadata: req.encrypted_metadata.clone(),
            encrypted_file_key: req.encrypted_file_key.clone(),
            encryption_version: req.encryption_version.clone(),
            encrypted_hash: req.encrypted_hash.clone(),
            encrypted_file_object_key: content_key(&id),
            encrypted_file_size_in_bytes: req.expected_file_size_in_bytes,
            encrypted_thumbnail_object_key: thumbnail.clone(),
            encrypted_thumbnail_size_in_bytes: req.expected_thumbnail_size_in_bytes,
            state: RemoteState::Pending,
            created_at: now,
            modified_at: now,
            version: 1,
        };
        inner.files.insert(id.clone(), file);
        debug!(file_id = %id, "memory backend: pending file created");

        Ok(CreatePendingResponse {
            presigned_upload_url: url_for(&content_key(&id)),
            presigned_thumbnail_url: thumbnail.as_deref().map(url_for),
            expires_at: now + ChronoDuration::hours(1),
            file_id: id,
        })
    }

    async fn put_object(&self, url: &str, bytes: &[u8]) -> CofferResult<()> {
        let key = Self::parse_url(url)?;
        let mut inner = self.lock();
        let (file_id, kind) = key
            .split_once('/')
            .ok_or_else(|| CofferError::NotFoundInCloud(key.to_string()))?;
        let file = inner
            .files
            .get(file_id)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))?;

        if kind == "thumbnail" && inner.fail_thumbnails {
            return Err(injected("thumbnail upload"));
        }
        if kind == "content" && inner.failing_hashes.contains(&file.encrypted_hash) {
            return Err(injected("content upload"));
        }
        inner.objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        req: &CompleteUploadRequest,
    ) -> CofferResult<CompleteUploadResponse> {
        let mut inner = self.lock();
        inner.complete_calls += 1;

        let stored = inner.objects.get(&content_key(file_id)).map(Vec::len);
        let file = inner
            .files
            .get_mut(file_id)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))?;

        let verified = req.upload_confirmed
            && stored == Some(file.encrypted_file_size_in_bytes as usize)
            && req.actual_file_size_in_bytes == file.encrypted_file_size_in_bytes;

        if verified && file.state == RemoteState::Pending {
            file.state = RemoteState::Active;
            file.modified_at = Utc::now();
        }
        if !req.thumbnail_upload_confirmed {
            file.encrypted_thumbnail_object_key = None;
            file.encrypted_thumbnail_size_in_bytes = None;
        }

        Ok(CompleteUploadResponse {
            actual_file_size_in_bytes: stored.unwrap_or(0) as u64,
            upload_verified: verified,
        })
    }

    async fn upload_url(
        &self,
        file_id: &str,
        _req: PresignedUrlRequest,
    ) -> CofferResult<UploadUrlResponse> {
        let inner = self.lock();
        let file = inner
            .files
            .get(file_id)
            .filter(|f| f.state != RemoteState::Deleted)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))?;
        Ok(UploadUrlResponse {
            presigned_upload_url: url_for(&content_key(&file.id)),
            presigned_thumbnail_url: Some(url_for(&thumbnail_key(&file.id))),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }

    async fn download_url(
        &self,
        file_id: &str,
        _req: PresignedUrlRequest,
    ) -> CofferResult<DownloadUrlResponse> {
        let inner = self.lock();
        let file = inner
            .files
            .get(file_id)
            .filter(|f| f.state == RemoteState::Active)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))?;
        Ok(DownloadUrlResponse {
            presigned_download_url: url_for(&file.encrypted_file_object_key),
            presigned_thumbnail_url: file.encrypted_thumbnail_object_key.as_deref().map(url_for),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }

    async fn get_file(&self, file_id: &str) -> CofferResult<RemoteFile> {
        self.remote_file(file_id)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))
    }

    async fn update_file(
        &self,
        file_id: &str,
        req: &UpdateFileRequest,
    ) -> CofferResult<RemoteFile> {
        let mut inner = self.lock();
        let file = inner
            .files
            .get_mut(file_id)
            .filter(|f| f.state != RemoteState::Deleted)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))?;
        if req.version != file.version {
            return Err(CofferError::Conflict(file_id.to_string()));
        }

        file.encrypted_metadata = req.encrypted_metadata.clone();
        file.encrypted_file_key = req.encrypted_file_key.clone();
        file.encryption_version = req.encryption_version.clone();
        file.encrypted_hash = req.encrypted_hash.clone();
        file.encrypted_file_size_in_bytes = req.expected_file_size_in_bytes;
        file.encrypted_thumbnail_size_in_bytes = req.expected_thumbnail_size_in_bytes;
        file.encrypted_thumbnail_object_key =
            req.expected_thumbnail_size_in_bytes.map(|_| thumbnail_key(file_id));
        file.state = RemoteState::Pending;
        file.version += 1;
        file.modified_at = Utc::now();
        Ok(file.clone())
    }

    async fn list_files(&self, collection_id: &str) -> CofferResult<Vec<RemoteFile>> {
        let inner = self.lock();
        let mut files: Vec<RemoteFile> = inner
            .files
            .values()
            .filter(|f| f.collection_id == collection_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn delete_file(&self, file_id: &str) -> CofferResult<()> {
        let mut inner = self.lock();
        let file = inner
            .files
            .get_mut(file_id)
            .ok_or_else(|| CofferError::NotFoundInCloud(file_id.to_string()))?;
        if file.state != RemoteState::Deleted {
            file.state = RemoteState::Deleted;
            file.version += 1;
            file.modified_at = Utc::now();
        }
        inner.objects.remove(&content_key(file_id));
        inner.objects.remove(&thumbnail_key(file_id));
        Ok(())
    }

    async fn get_object(&self, url: &str) -> CofferResult<Vec<u8>> {
        let key = Self::parse_url(url)?;
        self.lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| CofferError::NotFoundInCloud(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer_crypto::{generate_key, wrap_file_key, CollectionKey, FileKey};

    fn pending_request(size: u64, hash: &str) -> CreatePendingRequest {
        let collection_key: CollectionKey = generate_key();
        let file_key: FileKey = generate_key();
        CreatePendingRequest {
            collection_id: "col".into(),
            encrypted_metadata: "meta".into(),
            encrypted_file_key: wrap_file_key(&file_key, &collection_key).unwrap(),
            encryption_version: coffer_crypto::ENCRYPTION_VERSION.into(),
            encrypted_hash: hash.into(),
            expected_file_size_in_bytes: size,
            expected_thumbnail_size_in_bytes: None,
        }
    }

    fn complete(size: u64) -> CompleteUploadRequest {
        CompleteUploadRequest {
            actual_file_size_in_bytes: size,
            actual_thumbnail_size_in_bytes: None,
            upload_confirmed: true,
            thumbnail_upload_confirmed: false,
        }
    }

    #[tokio::test]
    async fn test_three_step_create() {
        let gw = MemoryGateway::new();
        let pending = gw.create_pending(&pending_request(4, "h")).await.unwrap();
        assert_eq!(
            gw.remote_file(&pending.file_id).unwrap().state,
            RemoteState::Pending
        );

        gw.put_object(&pending.presigned_upload_url, b"abcd")
            .await
            .unwrap();
        let done = gw
            .complete_upload(&pending.file_id, &complete(4))
            .await
            .unwrap();
        assert!(done.upload_verified);
        assert_eq!(done.actual_file_size_in_bytes, 4);
        assert_eq!(
            gw.remote_file(&pending.file_id).unwrap().state,
            RemoteState::Active
        );
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let gw = MemoryGateway::new();
        let pending = gw.create_pending(&pending_request(3, "h")).await.unwrap();
        gw.put_object(&pending.presigned_upload_url, b"xyz")
            .await
            .unwrap();

        let first = gw
            .complete_upload(&pending.file_id, &complete(3))
            .await
            .unwrap();
        let before = gw.remote_file(&pending.file_id).unwrap();
        let second = gw
            .complete_upload(&pending.file_id, &complete(3))
            .await
            .unwrap();
        let after = gw.remote_file(&pending.file_id).unwrap();

        assert_eq!(first, second);
        assert_eq!(before, after);
        assert_eq!(gw.file_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_without_content_is_unverified() {
        let gw = MemoryGateway::new();
        let pending = gw.create_pending(&pending_request(3, "h")).await.unwrap();
        let done = gw
            .complete_upload(&pending.file_id, &complete(3))
            .await
            .unwrap();
        assert!(!done.upload_verified);
        assert_eq!(
            gw.remote_file(&pending.file_id).unwrap().state,
            RemoteState::Pending
        );
    }

    #[tokio::test]
    async fn test_injected_content_failure() {
        let gw = MemoryGateway::new();
        gw.fail_content_uploads_with_hash("bad");
        let pending = gw.create_pending(&pending_request(1, "bad")).await.unwrap();
        let err = gw
            .put_object(&pending.presigned_upload_url, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, CofferError::Transport { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let gw = MemoryGateway::new();
        let pending = gw.create_pending(&pending_request(1, "h")).await.unwrap();
        let remote = gw.remote_file(&pending.file_id).unwrap();
        let mut req = UpdateFileRequest {
            encrypted_metadata: "new".into(),
            encrypted_file_key: remote.encrypted_file_key.clone(),
            encryption_version: remote.encryption_version.clone(),
            encrypted_hash: "h2".into(),
            expected_file_size_in_bytes: 1,
            expected_thumbnail_size_in_bytes: None,
            version: remote.version,
        };
        let updated = gw.update_file(&pending.file_id, &req).await.unwrap();
        assert_eq!(updated.version, remote.version + 1);
        assert_eq!(updated.state, RemoteState::Pending);

        req.version = remote.version;
        let err = gw.update_file(&pending.file_id, &req).await.unwrap_err();
        assert!(matches!(err, CofferError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_stays_pending_until_new_bytes_complete() {
        let gw = MemoryGateway::new();
        let pending = gw.create_pending(&pending_request(3, "h1")).await.unwrap();
        gw.put_object(&pending.presigned_upload_url, b"one")
            .await
            .unwrap();
        gw.complete_upload(&pending.file_id, &complete(3))
            .await
            .unwrap();

        let remote = gw.remote_file(&pending.file_id).unwrap();
        let req = UpdateFileRequest {
            encrypted_metadata: "new".into(),
            encrypted_file_key: remote.encrypted_file_key.clone(),
            encryption_version: remote.encryption_version.clone(),
            encrypted_hash: "h2".into(),
            expected_file_size_in_bytes: 5,
            expected_thumbnail_size_in_bytes: None,
            version: remote.version,
        };
        gw.update_file(&pending.file_id, &req).await.unwrap();

        // The old 3-byte object does not satisfy the new expected size.
        let done = gw
            .complete_upload(&pending.file_id, &complete(5))
            .await
            .unwrap();
        assert!(!done.upload_verified);
        assert_eq!(
            gw.remote_file(&pending.file_id).unwrap().state,
            RemoteState::Pending
        );
        let err = gw
            .download_url(&pending.file_id, PresignedUrlRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CofferError::NotFoundInCloud(_)));

        let urls = gw
            .upload_url(&pending.file_id, PresignedUrlRequest::default())
            .await
            .unwrap();
        gw.put_object(&urls.presigned_upload_url, b"three")
            .await
            .unwrap();
        let done = gw
            .complete_upload(&pending.file_id, &complete(5))
            .await
            .unwrap();
        assert!(done.upload_verified);
        assert_eq!(
            gw.remote_file(&pending.file_id).unwrap().state,
            RemoteState::Active
        );
    }

    #[tokio::test]
    async fn test_delete_is_soft_and_unknown_is_not_found() {
        let gw = MemoryGateway::new();
        let pending = gw.create_pending(&pending_request(1, "h")).await.unwrap();
        gw.delete_file(&pending.file_id).await.unwrap();
        gw.delete_file(&pending.file_id).await.unwrap();
        assert_eq!(
            gw.remote_file(&pending.file_id).unwrap().state,
            RemoteState::Deleted
        );

        let err = gw.delete_file("nope").await.unwrap_err();
        assert!(matches!(err, CofferError::NotFoundInCloud(_)));
    }
}
