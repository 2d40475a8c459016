//! Request/response bodies of the vault backend's JSON API

use std::time::Duration;

use chrono::{DateTime, Utc};
use coffer_crypto::EncryptedBlob;
use serde::{Deserialize, Serialize};

use crate::error::{CofferError, CofferResult};
use crate::types::{File, RemoteFile};

/// Default presigned URL lifetime (1 hour)
pub const DEFAULT_URL_LIFETIME: Duration = Duration::from_secs(3600);

/// Longest presigned URL lifetime the backend grants (24 hours)
pub const MAX_URL_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Step 1 of the three-step create: `POST /files/pending`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePendingRequest {
    pub collection_id: String,
    pub encrypted_metadata: String,
    pub encrypted_file_key: EncryptedBlob,
    pub encryption_version: String,
    pub encrypted_hash: String,
    pub expected_file_size_in_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_thumbnail_size_in_bytes: Option<u64>,
}

impl CreatePendingRequest {
    pub fn for_file(file: &File) -> CofferResult<Self> {
        Ok(Self {
            collection_id: file.collection_id.clone(),
            encrypted_metadata: file.encrypted_metadata.clone(),
            encrypted_file_key: wrapped_key(file)?,
            encryption_version: file.encryption_version.clone(),
            encrypted_hash: file.encrypted_hash.clone(),
            expected_file_size_in_bytes: file.encrypted_size,
            expected_thumbnail_size_in_bytes: file.encrypted_thumbnail_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePendingResponse {
    pub file_id: String,
    pub presigned_upload_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_thumbnail_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Step 3: `POST /files/{id}/complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteUploadRequest {
    pub actual_file_size_in_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_thumbnail_size_in_bytes: Option<u64>,
    pub upload_confirmed: bool,
    pub thumbnail_upload_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteUploadResponse {
    pub actual_file_size_in_bytes: u64,
    pub upload_verified: bool,
}

/// Body of `POST /files/{id}/upload-url` and `/download-url`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrlRequest {
    pub url_duration_secs: u64,
}

impl PresignedUrlRequest {
    /// Clamp `lifetime` to the backend's maximum.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            url_duration_secs: lifetime.min(MAX_URL_LIFETIME).as_secs(),
        }
    }
}

impl Default for PresignedUrlRequest {
    fn default() -> Self {
        Self::new(DEFAULT_URL_LIFETIME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    pub presigned_upload_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_thumbnail_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadUrlResponse {
    pub presigned_download_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_thumbnail_url: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// `PUT /files/{id}`: new key material and metadata for an existing remote
/// file. `version` is the version the client last saw; a stale value is
/// answered with `409 Conflict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFileRequest {
    pub encrypted_metadata: String,
    pub encrypted_file_key: EncryptedBlob,
    pub encryption_version: String,
    pub encrypted_hash: String,
    pub expected_file_size_in_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_thumbnail_size_in_bytes: Option<u64>,
    pub version: u64,
}

impl UpdateFileRequest {
    pub fn for_file(file: &File) -> CofferResult<Self> {
        Ok(Self {
            encrypted_metadata: file.encrypted_metadata.clone(),
            encrypted_file_key: wrapped_key(file)?,
            encryption_version: file.encryption_version.clone(),
            encrypted_hash: file.encrypted_hash.clone(),
            expected_file_size_in_bytes: file.encrypted_size,
            expected_thumbnail_size_in_bytes: file.encrypted_thumbnail_size,
            version: file.version,
        })
    }
}

fn wrapped_key(file: &File) -> CofferResult<EncryptedBlob> {
    file.encrypted_file_key
        .clone()
        .ok_or_else(|| CofferError::validation("encrypted_file_key", "missing"))
}

/// `GET /files/{id}` answers either `{"file": {...}}` or the bare object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileEnvelope {
    Wrapped { file: RemoteFile },
    Bare(RemoteFile),
}

impl FileEnvelope {
    pub fn into_inner(self) -> RemoteFile {
        match self {
            FileEnvelope::Wrapped { file } | FileEnvelope::Bare(file) => file,
        }
    }
}

/// `GET /collections/{id}/files` answers `{"files": [...]}` or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileListEnvelope {
    Wrapped { files: Vec<RemoteFile> },
    Bare(Vec<RemoteFile>),
}

impl FileListEnvelope {
    pub fn into_inner(self) -> Vec<RemoteFile> {
        match self {
            FileListEnvelope::Wrapped { files } | FileListEnvelope::Bare(files) => files,
        }
    }
}
