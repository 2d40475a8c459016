//! Local key-value persistence.
//!
//! Three backends are available:
//!   - **Memory**: a map behind a lock, for tests and throwaway contexts.
//!   - **JSON** (default): loads entirely into memory, flushed atomically via
//!     temp+rename after every committed write.
//!   - **RocksDB** (behind the `rocksdb` feature): write batches for
//!     transactions, prefix iteration for scans.
//!
//! All implement [`KvStore`]; callers hold an `Arc<dyn KvStore>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};

/// One write inside an all-or-nothing batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set(String, Vec<u8>),
    Delete(String),
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Apply every op or none of them.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()>;
}

/// Start a write batch against `store`.
pub fn open_transaction(store: &dyn KvStore) -> Transaction<'_> {
    Transaction::open(store)
}

/// Buffered writes against a store, applied on [`commit`](Transaction::commit).
///
/// Dropping without committing discards the writes.
pub struct Transaction<'a> {
    store: &'a dyn KvStore,
    ops: Vec<BatchOp>,
}

impl<'a> Transaction<'a> {
    pub fn open(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(BatchOp::Set(key.into(), value));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn commit(self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.store.apply_batch(self.ops)
    }

    pub fn discard(self) {}
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("store lock poisoned"))
}

fn apply_ops(map: &mut BTreeMap<String, Vec<u8>>, ops: Vec<BatchOp>) {
    for op in ops {
        match op {
            BatchOp::Set(key, value) => {
                map.insert(key, value);
            }
            BatchOp::Delete(key) => {
                map.remove(&key);
            }
        }
    }
}

fn scan(map: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<(String, Vec<u8>)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        lock(&self.entries)?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = lock(&self.entries)?;
        Ok(scan(&entries, prefix))
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut entries = lock(&self.entries)?;
        apply_ops(&mut entries, ops);
        Ok(())
    }
}

/// In-memory map persisted to a JSON file.
///
/// Values must be UTF-8 (the repository only stores JSON documents). Every
/// write is flushed before returning; a failed flush rolls the map back.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl JsonFileStore {
    /// Load or create a store at the given path.
    /// If the file doesn't exist, starts empty.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading state store: {}", path.display()))?;
            let raw: BTreeMap<String, String> = serde_json::from_str(&content)
                .with_context(|| format!("parsing state store: {}", path.display()))?;
            raw.into_iter().map(|(k, v)| (k, v.into_bytes())).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir: {}", parent.display()))?;
        }

        let mut raw = BTreeMap::new();
        for (key, value) in entries {
            let text = std::str::from_utf8(value)
                .with_context(|| format!("value for {key} is not UTF-8"))?;
            raw.insert(key.as_str(), text);
        }
        let json = serde_json::to_string_pretty(&raw).context("serializing state store")?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing state store temp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming state store: {}", self.path.display()))?;
        Ok(())
    }

    fn write(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut entries = lock(&self.entries)?;
        let mut next = entries.clone();
        apply_ops(&mut next, ops);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write(vec![BatchOp::Set(key.to_string(), value.to_vec())])
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.write(vec![BatchOp::Delete(key.to_string())])
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = lock(&self.entries)?;
        Ok(scan(&entries, prefix))
    }

    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.write(ops)
    }
}

// ── RocksDB backend ──────────────────────────────────────────────────────────

#[cfg(feature = "rocksdb")]
mod rocksdb_backend {
    use super::*;

    pub struct RocksStore {
        db: rocksdb::DB,
    }

    impl RocksStore {
        /// Open or create a RocksDB store at the given path.
        pub fn open(path: &Path) -> Result<Self> {
            let mut opts = rocksdb::Options::default();
            opts.create_if_missing(true);

            let db = rocksdb::DB::open(&opts, path)
                .with_context(|| format!("opening RocksDB: {}", path.display()))?;
            Ok(Self { db })
        }
    }

    impl KvStore for RocksStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.db
                .get(key.as_bytes())
                .with_context(|| format!("RocksDB get {key}"))
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            self.db
                .put(key.as_bytes(), value)
                .with_context(|| format!("RocksDB put {key}"))
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.db
                .delete(key.as_bytes())
                .with_context(|| format!("RocksDB delete {key}"))
        }

        fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
            let mode = rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward);
            let mut out = Vec::new();
            for item in self.db.iterator(mode) {
                let (key, value) = item.context("iterating RocksDB entries")?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                out.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
            }
            Ok(out)
        }

        fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
            let mut batch = rocksdb::WriteBatch::default();
            for op in ops {
                match op {
                    BatchOp::Set(key, value) => batch.put(key.as_bytes(), value),
                    BatchOp::Delete(key) => batch.delete(key.as_bytes()),
                }
            }
            self.db.write(batch).context("RocksDB write batch")
        }
    }
}

#[cfg(feature = "rocksdb")]
pub use rocksdb_backend::RocksStore;

/// Open the appropriate backend based on path extension.
///
/// Paths ending in `.json` use the JSON backend; otherwise RocksDB (if
/// compiled with the `rocksdb` feature).
pub fn open_store(path: &Path) -> Result<Arc<dyn KvStore>> {
    let is_json = path
        .extension()
        .map(|ext| ext == "json")
        .unwrap_or(false);

    #[cfg(feature = "rocksdb")]
    if !is_json {
        return Ok(Arc::new(RocksStore::open(path)?));
    }

    #[cfg(not(feature = "rocksdb"))]
    if !is_json {
        tracing::warn!(
            path = %path.display(),
            "RocksDB not compiled in (missing 'rocksdb' feature), falling back to JSON backend"
        );
    }

    Ok(Arc::new(JsonFileStore::open(path)?))
}
