//! Per-file mutual exclusion
//!
//! Every mutating operation holds its file's lock for the whole call, so two
//! callers can never race a sync-status transition. Different files never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub type FileGuard = OwnedMutexGuard<()>;

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, file_id: &str) -> FileGuard {
        let entry = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|id, lock| id == file_id || Arc::strong_count(lock) > 1);
            locks
                .entry(file_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_file_is_serialized() {
        let locks = Arc::new(FileLocks::new());
        let guard = locks.lock("f1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock("f1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_files_do_not_contend() {
        let locks = FileLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = FileLocks::new();
        drop(locks.lock("a").await);
        drop(locks.lock("b").await);
        let _c = locks.lock("c").await;
        assert_eq!(locks.len(), 1);
    }
}
