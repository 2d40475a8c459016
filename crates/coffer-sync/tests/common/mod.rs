//! Shared fixtures: a vault context over the in-memory backend with one
//! registered user and one collection.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use coffer_core::{Collection, File, FileMetadata, RemoteFile, RemoteState, User};
use coffer_crypto::{
    ciphertext_hash, encrypt_content, encrypt_metadata, generate_key, wrap_file_key, FileKey,
    KdfParams, ENCRYPTION_VERSION,
};
use coffer_storage::MemoryGateway;
use coffer_sync::{
    create_collection, import_file, open_shared_collection_key, register_user, ImportRequest,
    MemoryStore, SyncSettings, VaultContext,
};
use secrecy::SecretString;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery staple";

/// Cheap Argon2id parameters so tests stay fast.
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        kdf: KdfParams {
            mem_cost_kib: 256,
            time_cost: 1,
            parallelism: 1,
        },
        ..Default::default()
    }
}

pub fn password() -> SecretString {
    SecretString::from(PASSWORD)
}

pub struct Vault {
    pub dir: TempDir,
    pub ctx: VaultContext,
    pub gateway: MemoryGateway,
    pub user: User,
    pub collection: Collection,
}

impl Vault {
    pub async fn new() -> Self {
        Self::with_gateway(MemoryGateway::new()).await
    }

    pub async fn with_gateway(gateway: MemoryGateway) -> Self {
        let dir = TempDir::new().unwrap();
        let ctx = VaultContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(gateway.clone()),
            dir.path().join("data"),
            test_settings(),
        );
        let user = register_user(&ctx, "owner@example.com", &password())
            .await
            .unwrap()
            .user;
        let collection = create_collection(&ctx, &user.id, "Photos", &password())
            .await
            .unwrap();
        Self {
            dir,
            ctx,
            gateway,
            user,
            collection,
        }
    }

    /// A second device of the same user: own store and data dir, same
    /// backend, same account and collection records.
    pub fn second_device(&self) -> (TempDir, VaultContext) {
        let dir = TempDir::new().unwrap();
        let ctx = VaultContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(self.gateway.clone()),
            dir.path().join("data"),
            test_settings(),
        );
        ctx.repo.put_user(&self.user).unwrap();
        ctx.repo.put_collection(&self.collection).unwrap();
        (dir, ctx)
    }

    pub fn source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join("src").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub async fn import(&self, name: &str, content: &[u8]) -> File {
        let req = ImportRequest::new(&self.collection.id, self.source(name, content));
        import_file(&self.ctx, &req, &password()).await.unwrap()
    }

    /// Put a finished file on the backend as if another device uploaded it.
    pub async fn seed_remote(&self, name: &str, content: &[u8]) -> RemoteFile {
        let collection_key =
            open_shared_collection_key(&self.ctx, &self.collection.id, &self.user.id, &password())
                .await
                .unwrap();
        let file_key: FileKey = generate_key();
        let encrypted = encrypt_content(&file_key, content).unwrap();
        let now = Utc::now();
        let metadata = FileMetadata {
            name: name.into(),
            mime_type: coffer_core::paths::mime_from_name(name).into(),
            extension: None,
            size: content.len() as u64,
            thumbnail_size: None,
            source_path: None,
            created_at: now,
            modified_at: now,
        };
        let id = uuid::Uuid::new_v4().to_string();
        let remote = RemoteFile {
            id: id.clone(),
            collection_id: self.collection.id.clone(),
            owner_id: self.user.id.clone(),
            encrypted_metadata: encrypt_metadata(&metadata, &file_key).unwrap(),
            encrypted_file_key: wrap_file_key(&file_key, &collection_key).unwrap(),
            encryption_version: ENCRYPTION_VERSION.into(),
            encrypted_hash: ciphertext_hash(&encrypted),
            encrypted_file_object_key: format!("{id}/content"),
            encrypted_file_size_in_bytes: encrypted.len() as u64,
            encrypted_thumbnail_object_key: None,
            encrypted_thumbnail_size_in_bytes: None,
            state: RemoteState::Active,
            created_at: now,
            modified_at: now,
            version: 1,
        };
        self.gateway.seed_file(remote.clone(), encrypted, None);
        remote
    }
}
