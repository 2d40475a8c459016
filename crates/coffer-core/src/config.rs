use std::path::{Path, PathBuf};
use std::time::Duration;

use coffer_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::MAX_URL_LIFETIME;
use crate::error::{CofferError, CofferResult};
use crate::types::StorageMode;

/// Top-level client configuration (loaded from coffer.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CofferConfig {
    pub app: AppConfig,
    pub cloud: CloudConfig,
    pub crypto: CryptoConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the local vault layout (default: ~/.local/share/coffer)
    pub data_dir: PathBuf,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Backend API base URL
    pub base_url: String,
    /// Refuse plain http:// base URLs
    pub enforce_tls: bool,
    /// Timeout for JSON API calls in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// Timeout for presigned byte transfers in seconds (default: 3600)
    pub transfer_timeout_secs: u64,
    /// Retries for presigned byte transfers (default: 3)
    pub transfer_retries: u32,
    /// Requested presigned URL lifetime in seconds (default: 3600, max 86400)
    pub presigned_url_lifetime_secs: u64,
}

/// Argon2id parameters for newly created or re-wrapped key bundles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local state store. A `.json` extension selects the JSON backend,
    /// anything else RocksDB.
    pub state_db: PathBuf,
    /// Files processed in parallel by collection sync (default: 4)
    pub concurrency: usize,
    /// Storage mode for newly imported or discovered files
    pub default_storage_mode: StorageMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/coffer"),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coffer.local".into(),
            enforce_tls: true,
            request_timeout_secs: 30,
            transfer_timeout_secs: 3600,
            transfer_retries: 3,
            presigned_url_lifetime_secs: 3600,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            argon2_mem_cost_kib: params.mem_cost_kib,
            argon2_time_cost: params.time_cost,
            argon2_parallelism: params.parallelism,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            state_db: PathBuf::from("~/.local/share/coffer/state.json"),
            concurrency: 4,
            default_storage_mode: StorageMode::Hybrid,
        }
    }
}

impl CloudConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn presigned_url_lifetime(&self) -> Duration {
        Duration::from_secs(self.presigned_url_lifetime_secs).min(MAX_URL_LIFETIME)
    }
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.argon2_mem_cost_kib,
            time_cost: self.argon2_time_cost,
            parallelism: self.argon2_parallelism,
        }
    }
}

impl CofferConfig {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> CofferResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| CofferError::Config(format!("{}: {e}", path.display())))
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[app]
data_dir = "/var/lib/coffer"
log_level = "debug"
log_format = "json"

[cloud]
base_url = "https://vault.example.com/api/v1"
enforce_tls = true
request_timeout_secs = 10
transfer_timeout_secs = 600
transfer_retries = 5
presigned_url_lifetime_secs = 7200

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[sync]
state_db = "/var/lib/coffer/state.db"
concurrency = 8
default_storage_mode = "encrypted_only"
"#;
        let config: CofferConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.app.data_dir, PathBuf::from("/var/lib/coffer"));
        assert_eq!(config.app.log_format, "json");
        assert_eq!(config.cloud.base_url, "https://vault.example.com/api/v1");
        assert_eq!(config.cloud.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.cloud.transfer_retries, 5);
        assert_eq!(config.crypto.kdf_params().mem_cost_kib, 131072);
        assert_eq!(config.sync.concurrency, 8);
        assert_eq!(config.sync.default_storage_mode, StorageMode::EncryptedOnly);
    }

    #[test]
    fn test_parse_defaults() {
        let config: CofferConfig = toml::from_str("").unwrap();

        assert_eq!(config.app.log_level, "info");
        assert!(config.cloud.enforce_tls);
        assert_eq!(config.cloud.request_timeout_secs, 30);
        assert_eq!(config.cloud.transfer_timeout_secs, 3600);
        assert_eq!(config.crypto.kdf_params(), KdfParams::default());
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.default_storage_mode, StorageMode::Hybrid);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[cloud]
base_url = "http://127.0.0.1:8080"
enforce_tls = false
"#;
        let config: CofferConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.cloud.base_url, "http://127.0.0.1:8080");
        assert!(!config.cloud.enforce_tls);
        // Defaults
        assert_eq!(config.cloud.transfer_retries, 3);
        assert_eq!(config.app.log_format, "text");
    }

    #[test]
    fn test_url_lifetime_is_clamped() {
        let cloud = CloudConfig {
            presigned_url_lifetime_secs: 10 * 86_400,
            ..CloudConfig::default()
        };
        assert_eq!(cloud.presigned_url_lifetime(), MAX_URL_LIFETIME);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CofferConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.sync.concurrency, 4);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffer.toml");
        std::fs::write(&path, "[sync\nconcurrency = ").unwrap();
        assert!(matches!(
            CofferConfig::load(&path),
            Err(CofferError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CofferConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CofferConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.app.data_dir, parsed.app.data_dir);
        assert_eq!(config.cloud.base_url, parsed.cloud.base_url);
        assert_eq!(config.sync.state_db, parsed.sync.state_db);
    }

    #[test]
    fn test_expand_tilde_leaves_absolute_paths() {
        assert_eq!(
            expand_tilde(Path::new("/etc/coffer.toml")),
            PathBuf::from("/etc/coffer.toml")
        );
    }
}
