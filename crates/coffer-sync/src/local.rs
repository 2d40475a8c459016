//! Local file store: atomic writes under the vault layout

use std::path::{Path, PathBuf};

use coffer_core::paths::LocalLayout;
use coffer_core::{CofferError, CofferResult, File};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LocalFiles {
    layout: LocalLayout,
}

impl LocalFiles {
    pub fn new(layout: LocalLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LocalLayout {
        &self.layout
    }

    /// Write `bytes` to `path` via a sibling temp file and rename.
    /// Parent directories are created as needed.
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> CofferResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = %path.display(), bytes = bytes.len(), "wrote local copy");
        Ok(())
    }

    pub async fn read(&self, path: &Path) -> CofferResult<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    /// Encrypted content of `file` as it would be sent to the backend.
    pub async fn load_file_data(&self, file: &File) -> CofferResult<Vec<u8>> {
        let path = file.encrypted_path.as_deref().ok_or_else(|| {
            CofferError::validation("encrypted_path", format!("file {} has no encrypted copy", file.id))
        })?;
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CofferError::validation(
                "encrypted_path",
                format!("{} is missing", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `path`; a file that is already gone is fine.
    pub async fn remove(&self, path: &Path) -> CofferResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every local copy `file` points at. Failures are logged, not
    /// returned, so a half-deleted file never blocks a state change.
    pub async fn remove_all(&self, file: &File) {
        for path in file.local_paths() {
            if let Err(e) = self.remove(path).await {
                warn!(
                    file_id = %file.id,
                    path = %path.display(),
                    "failed to remove local copy: {e}"
                );
            }
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFiles::new(LocalLayout::new(dir.path()));
        let path = dir.path().join("a/b/c/file.enc");

        local.write_atomic(&path, b"payload").await.unwrap();
        assert_eq!(local.read(&path).await.unwrap(), b"payload");
        assert!(!dir.path().join("a/b/c/file.enc.tmp").exists());

        local.write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFiles::new(LocalLayout::new(dir.path()));
        local.remove(&dir.path().join("never-existed")).await.unwrap();
    }
}
