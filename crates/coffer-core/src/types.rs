use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use coffer_crypto::{EncryptedBlob, KeyBundle};
use serde::{Deserialize, Serialize};

/// Relationship of a file between local and remote storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Imported from disk, never uploaded (or removed from the cloud)
    LocalOnly,
    /// Content lives only in the cloud; local copies were offloaded
    CloudOnly,
    /// Local and remote copies agree
    Synced,
    /// Local content changed after the last successful sync
    ModifiedLocally,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::LocalOnly,
        SyncStatus::CloudOnly,
        SyncStatus::Synced,
        SyncStatus::ModifiedLocally,
    ];
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStatus::LocalOnly => "local-only",
            SyncStatus::CloudOnly => "cloud-only",
            SyncStatus::Synced => "synced",
            SyncStatus::ModifiedLocally => "modified-locally",
        })
    }
}

/// Which physical copies are retained on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    EncryptedOnly,
    DecryptedOnly,
    #[default]
    Hybrid,
}

impl StorageMode {
    pub fn keeps_encrypted(self) -> bool {
        matches!(self, StorageMode::EncryptedOnly | StorageMode::Hybrid)
    }

    pub fn keeps_decrypted(self) -> bool {
        matches!(self, StorageMode::DecryptedOnly | StorageMode::Hybrid)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageMode::EncryptedOnly => "encrypted_only",
            StorageMode::DecryptedOnly => "decrypted_only",
            StorageMode::Hybrid => "hybrid",
        })
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "encrypted_only" | "encrypted" => Ok(StorageMode::EncryptedOnly),
            "decrypted_only" | "decrypted" => Ok(StorageMode::DecryptedOnly),
            "hybrid" => Ok(StorageMode::Hybrid),
            other => Err(format!("unknown storage mode: {other}")),
        }
    }
}

/// Lifecycle state the backend reports for a remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Pending,
    Active,
    Deleted,
    Archived,
}

/// Operations the sync state machine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOp {
    Upload,
    Download,
    LocalEdit,
    CloudDelete,
    Offload,
    Onload,
    RemoteDeleted,
}

impl SyncOp {
    pub const ALL: [SyncOp; 7] = [
        SyncOp::Upload,
        SyncOp::Download,
        SyncOp::LocalEdit,
        SyncOp::CloudDelete,
        SyncOp::Offload,
        SyncOp::Onload,
        SyncOp::RemoteDeleted,
    ];
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOp::Upload => "upload",
            SyncOp::Download => "download",
            SyncOp::LocalEdit => "local-edit",
            SyncOp::CloudDelete => "cloud-delete",
            SyncOp::Offload => "offload",
            SyncOp::Onload => "onload",
            SyncOp::RemoteDeleted => "remote-deleted",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub key_bundle: KeyBundle,
    pub created_at: DateTime<Utc>,
}

/// A member's copy of the collection key, sealed to their public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMember {
    pub user_id: String,
    /// base64 sealed box
    pub sealed_collection_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub owner_id: String,
    /// Collection name through the metadata codec, under the collection key
    pub encrypted_name: String,
    /// Collection key wrapped by the owner's master key
    pub encrypted_collection_key: EncryptedBlob,
    #[serde(default)]
    pub members: Vec<CollectionMember>,
    pub created_at: DateTime<Utc>,
}

/// Plaintext metadata record. Only ever persisted encrypted under the file key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Local domain record of a vault file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub collection_id: String,
    pub owner_id: String,
    /// ID of the matching remote file once one exists
    pub remote_id: Option<String>,
    /// File key wrapped by the collection key
    pub encrypted_file_key: Option<EncryptedBlob>,
    pub encrypted_metadata: String,
    pub encryption_version: String,
    /// BLAKE3 hex of the encrypted content
    pub encrypted_hash: String,
    pub encrypted_size: u64,
    pub encrypted_thumbnail_size: Option<u64>,
    pub version: u64,
    pub sync_status: SyncStatus,
    pub storage_mode: StorageMode,
    pub remote_state: Option<RemoteState>,
    pub encrypted_path: Option<PathBuf>,
    pub decrypted_path: Option<PathBuf>,
    pub encrypted_thumbnail_path: Option<PathBuf>,
    pub decrypted_thumbnail_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl File {
    /// Build a local record for a remote file seen for the first time.
    ///
    /// The local ID reuses the remote ID; no local copies exist yet.
    pub fn from_remote(remote: &RemoteFile, storage_mode: StorageMode) -> Self {
        let mut file = File {
            id: remote.id.clone(),
            collection_id: remote.collection_id.clone(),
            owner_id: remote.owner_id.clone(),
            remote_id: None,
            encrypted_file_key: None,
            encrypted_metadata: String::new(),
            encryption_version: String::new(),
            encrypted_hash: String::new(),
            encrypted_size: 0,
            encrypted_thumbnail_size: None,
            version: 0,
            sync_status: SyncStatus::CloudOnly,
            storage_mode,
            remote_state: None,
            encrypted_path: None,
            decrypted_path: None,
            encrypted_thumbnail_path: None,
            decrypted_thumbnail_path: None,
            created_at: remote.created_at,
            modified_at: remote.modified_at,
        };
        file.absorb_remote(remote);
        file
    }

    /// Copy every backend-owned field from `remote` onto this record.
    /// Sync status and local paths are left alone.
    pub fn absorb_remote(&mut self, remote: &RemoteFile) {
        self.remote_id = Some(remote.id.clone());
        self.encrypted_file_key = Some(remote.encrypted_file_key.clone());
        self.encrypted_metadata = remote.encrypted_metadata.clone();
        self.encryption_version = remote.encryption_version.clone();
        self.encrypted_hash = remote.encrypted_hash.clone();
        self.encrypted_size = remote.encrypted_file_size_in_bytes;
        self.encrypted_thumbnail_size = remote.encrypted_thumbnail_size_in_bytes;
        self.version = remote.version;
        self.remote_state = Some(remote.state);
        self.modified_at = remote.modified_at;
    }

    pub fn has_local_copy(&self) -> bool {
        self.encrypted_path.is_some() || self.decrypted_path.is_some()
    }

    /// Every local path this record points at.
    pub fn local_paths(&self) -> impl Iterator<Item = &PathBuf> {
        [
            &self.encrypted_path,
            &self.decrypted_path,
            &self.encrypted_thumbnail_path,
            &self.decrypted_thumbnail_path,
        ]
        .into_iter()
        .flatten()
    }

    pub fn clear_local_paths(&mut self) {
        self.encrypted_path = None;
        self.decrypted_path = None;
        self.encrypted_thumbnail_path = None;
        self.decrypted_thumbnail_path = None;
    }
}

/// Backend projection of a file, as sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub collection_id: String,
    pub owner_id: String,
    pub encrypted_metadata: String,
    pub encrypted_file_key: EncryptedBlob,
    pub encryption_version: String,
    pub encrypted_hash: String,
    #[serde(default)]
    pub encrypted_file_object_key: String,
    pub encrypted_file_size_in_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_thumbnail_object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_thumbnail_size_in_bytes: Option<u64>,
    pub state: RemoteState,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub version: u64,
}
