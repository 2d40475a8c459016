use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use coffer_core::api::{PresignedUrlRequest, DEFAULT_URL_LIFETIME};
use coffer_core::config::{expand_tilde, CofferConfig};
use coffer_core::paths::LocalLayout;
use coffer_core::StorageMode;
use coffer_crypto::KdfParams;
use coffer_storage::RemoteGateway;

use crate::local::LocalFiles;
use crate::locks::FileLocks;
use crate::repo::Repository;
use crate::store::KvStore;

/// Tunables the orchestrators read; built from `CofferConfig` in the binary.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Argon2id parameters for new or re-wrapped key bundles
    pub kdf: KdfParams,
    pub url_lifetime: Duration,
    /// Files processed in parallel by collection sync
    pub concurrency: usize,
    pub default_storage_mode: StorageMode,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            url_lifetime: DEFAULT_URL_LIFETIME,
            concurrency: 4,
            default_storage_mode: StorageMode::Hybrid,
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &CofferConfig) -> Self {
        Self {
            kdf: config.crypto.kdf_params(),
            url_lifetime: config.cloud.presigned_url_lifetime(),
            concurrency: config.sync.concurrency.max(1),
            default_storage_mode: config.sync.default_storage_mode,
        }
    }

    pub(crate) fn url_request(&self) -> PresignedUrlRequest {
        PresignedUrlRequest::new(self.url_lifetime)
    }
}

/// Everything an operation needs, wired explicitly at startup.
pub struct VaultContext {
    pub repo: Repository,
    pub gateway: Arc<dyn RemoteGateway>,
    pub local: LocalFiles,
    pub locks: FileLocks,
    pub settings: SyncSettings,
}

impl VaultContext {
    pub fn new(
        store: Arc<dyn KvStore>,
        gateway: Arc<dyn RemoteGateway>,
        data_dir: impl Into<PathBuf>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            repo: Repository::new(store),
            gateway,
            local: LocalFiles::new(LocalLayout::new(data_dir)),
            locks: FileLocks::new(),
            settings,
        }
    }

    /// Wire a context from loaded configuration; the data directory has `~`
    /// expanded.
    pub fn from_config(
        config: &CofferConfig,
        store: Arc<dyn KvStore>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        Self::new(
            store,
            gateway,
            expand_tilde(&config.app.data_dir),
            SyncSettings::from_config(config),
        )
    }

    pub fn layout(&self) -> &LocalLayout {
        self.local.layout()
    }
}
