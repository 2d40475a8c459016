//! Bringing plaintext into the vault: import from disk and local edits.

use std::path::{Path, PathBuf};

use chrono::Utc;
use coffer_core::paths::{mime_from_name, resolve_extension};
use coffer_core::{CofferError, CofferResult, File, FileMetadata, StorageMode, SyncOp};
use coffer_crypto::{
    ciphertext_hash, decrypt_metadata, encrypt_content, encrypt_metadata, generate_key,
    wrap_file_key, FileKey, ENCRYPTION_VERSION,
};
use secrecy::SecretString;
use tracing::info;

use crate::context::VaultContext;
use crate::state::next_status;
use crate::unlock::{unlock_collection_key, unlock_file_key};

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub collection_id: String,
    pub source: PathBuf,
    pub thumbnail: Option<PathBuf>,
    /// Falls back to the configured default
    pub storage_mode: Option<StorageMode>,
}

impl ImportRequest {
    pub fn new(collection_id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            collection_id: collection_id.into(),
            source: source.into(),
            thumbnail: None,
            storage_mode: None,
        }
    }
}

/// Integrity fields of content just written to disk.
struct Written {
    encrypted_hash: String,
    encrypted_size: u64,
    encrypted_thumbnail_size: Option<u64>,
}

/// Encrypt `content` (and `thumbnail`) under `file_key` and lay down the
/// copies `file.storage_mode` asks for. Updates the path fields of `file`.
async fn write_local_copies(
    ctx: &VaultContext,
    file: &mut File,
    metadata: &FileMetadata,
    file_key: &FileKey,
    content: &[u8],
    thumbnail: Option<&[u8]>,
) -> CofferResult<Written> {
    let layout = ctx.layout();
    let mode = file.storage_mode;

    let encrypted = encrypt_content(file_key, content)?;
    let mut written = Written {
        encrypted_hash: ciphertext_hash(&encrypted),
        encrypted_size: encrypted.len() as u64,
        encrypted_thumbnail_size: None,
    };

    if mode.keeps_encrypted() {
        let path = layout.encrypted_path(&file.collection_id, &file.id);
        ctx.local.write_atomic(&path, &encrypted).await?;
        file.encrypted_path = Some(path);
    }
    if mode.keeps_decrypted() {
        let path = layout.decrypted_path(&file.collection_id, &file.id, &resolve_extension(metadata));
        ctx.local.write_atomic(&path, content).await?;
        if let Some(old) = file.decrypted_path.replace(path.clone()) {
            if old != path {
                ctx.local.remove(&old).await?;
            }
        }
    }

    if let Some(thumbnail) = thumbnail {
        let encrypted_thumb = encrypt_content(file_key, thumbnail)?;
        written.encrypted_thumbnail_size = Some(encrypted_thumb.len() as u64);
        if mode.keeps_encrypted() {
            let path = layout.encrypted_thumbnail_path(&file.collection_id, &file.id);
            ctx.local.write_atomic(&path, &encrypted_thumb).await?;
            file.encrypted_thumbnail_path = Some(path);
        }
        if mode.keeps_decrypted() {
            let path = layout.decrypted_thumbnail_path(&file.collection_id, &file.id);
            ctx.local.write_atomic(&path, thumbnail).await?;
            file.decrypted_thumbnail_path = Some(path);
        }
    }

    Ok(written)
}

async fn read_source(path: &Path, field: &'static str) -> CofferResult<Vec<u8>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(tokio::fs::read(path).await?),
        Ok(_) => Err(CofferError::validation(
            field,
            format!("{} is not a regular file", path.display()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CofferError::validation(
            field,
            format!("{} does not exist", path.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Create a `LocalOnly` file from a file on disk.
pub async fn import_file(
    ctx: &VaultContext,
    req: &ImportRequest,
    password: &SecretString,
) -> CofferResult<File> {
    let name = req
        .source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CofferError::validation("source", "path has no file name"))?
        .to_string();
    let content = read_source(&req.source, "source").await?;
    let thumbnail = match &req.thumbnail {
        Some(path) => Some(read_source(path, "thumbnail").await?),
        None => None,
    };

    let collection = ctx.repo.get_collection(&req.collection_id)?;
    let collection_key = unlock_collection_key(ctx, &collection.id, password).await?;
    let file_key: FileKey = generate_key();

    let now = Utc::now();
    let metadata = FileMetadata {
        mime_type: mime_from_name(&name).to_string(),
        extension: Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string),
        name,
        size: content.len() as u64,
        thumbnail_size: thumbnail.as_ref().map(|t| t.len() as u64),
        source_path: Some(req.source.clone()),
        created_at: now,
        modified_at: now,
    };

    let mut file = File {
        id: uuid::Uuid::new_v4().to_string(),
        collection_id: collection.id.clone(),
        owner_id: collection.owner_id.clone(),
        remote_id: None,
        encrypted_file_key: Some(wrap_file_key(&file_key, &collection_key)?),
        encrypted_metadata: encrypt_metadata(&metadata, &file_key)?,
        encryption_version: ENCRYPTION_VERSION.to_string(),
        encrypted_hash: String::new(),
        encrypted_size: 0,
        encrypted_thumbnail_size: None,
        version: 0,
        sync_status: coffer_core::SyncStatus::LocalOnly,
        storage_mode: req.storage_mode.unwrap_or(ctx.settings.default_storage_mode),
        remote_state: None,
        encrypted_path: None,
        decrypted_path: None,
        encrypted_thumbnail_path: None,
        decrypted_thumbnail_path: None,
        created_at: now,
        modified_at: now,
    };

    let _guard = ctx.locks.lock(&file.id).await;
    let written = write_local_copies(
        ctx,
        &mut file,
        &metadata,
        &file_key,
        &content,
        thumbnail.as_deref(),
    )
    .await?;
    file.encrypted_hash = written.encrypted_hash;
    file.encrypted_size = written.encrypted_size;
    file.encrypted_thumbnail_size = written.encrypted_thumbnail_size;
    ctx.repo.put_file(&file)?;

    info!(
        file_id = %file.id,
        collection_id = %file.collection_id,
        bytes = metadata.size,
        storage_mode = %file.storage_mode,
        "imported file"
    );
    Ok(file)
}

/// Replace the content of a file that has local copies and apply the
/// LocalEdit transition. The file key is reused; the nonce is fresh.
pub async fn replace_content(
    ctx: &VaultContext,
    file_id: &str,
    content: &[u8],
    password: &SecretString,
) -> CofferResult<File> {
    let _guard = ctx.locks.lock(file_id).await;
    let mut file = ctx.repo.get_file(file_id)?;
    let next = next_status(file.sync_status, SyncOp::LocalEdit)?;

    let collection_key = unlock_collection_key(ctx, &file.collection_id, password).await?;
    let file_key = unlock_file_key(&file, &collection_key)?;
    let mut metadata: FileMetadata = decrypt_metadata(&file.encrypted_metadata, &file_key)?;

    let thumbnail = match &file.decrypted_thumbnail_path {
        Some(path) => Some(ctx.local.read(path).await?),
        None => None,
    };
    let now = Utc::now();
    metadata.size = content.len() as u64;
    metadata.modified_at = now;

    let written = write_local_copies(
        ctx,
        &mut file,
        &metadata,
        &file_key,
        content,
        thumbnail.as_deref(),
    )
    .await?;
    file.encrypted_hash = written.encrypted_hash;
    file.encrypted_size = written.encrypted_size;
    if thumbnail.is_some() {
        file.encrypted_thumbnail_size = written.encrypted_thumbnail_size;
    }
    file.encrypted_metadata = encrypt_metadata(&metadata, &file_key)?;
    file.sync_status = next;
    file.modified_at = now;
    ctx.repo.put_file(&file)?;

    info!(file_id, status = %file.sync_status, bytes = content.len(), "local content replaced");
    Ok(file)
}
