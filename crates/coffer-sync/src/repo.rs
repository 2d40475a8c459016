//! Typed records on top of the key-value store
//!
//! ```text
//! user/{id}                  User
//! collection/{id}            Collection
//! file/{id}                  File
//! remote-index/{remote_id}   local file id
//! ```

use std::sync::Arc;

use coffer_core::{Collection, CofferError, CofferResult, File, User};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::store::{open_transaction, KvStore};

const USER_PREFIX: &str = "user/";
const COLLECTION_PREFIX: &str = "collection/";
const FILE_PREFIX: &str = "file/";
const REMOTE_INDEX_PREFIX: &str = "remote-index/";

#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

fn user_key(id: &str) -> String {
    format!("{USER_PREFIX}{id}")
}

fn collection_key(id: &str) -> String {
    format!("{COLLECTION_PREFIX}{id}")
}

fn file_key(id: &str) -> String {
    format!("{FILE_PREFIX}{id}")
}

fn remote_index_key(remote_id: &str) -> String {
    format!("{REMOTE_INDEX_PREFIX}{remote_id}")
}

impl Repository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> CofferResult<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> CofferResult<()> {
        self.store.set(key, &serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn load_all<T: DeserializeOwned>(&self, prefix: &str) -> CofferResult<Vec<T>> {
        self.store
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(CofferError::from))
            .collect()
    }

    // ── users ────────────────────────────────────────────────────────────

    pub fn get_user(&self, id: &str) -> CofferResult<User> {
        self.load(&user_key(id))?
            .ok_or_else(|| CofferError::not_found("user", id))
    }

    pub fn put_user(&self, user: &User) -> CofferResult<()> {
        self.save(&user_key(&user.id), user)
    }

    pub fn list_users(&self) -> CofferResult<Vec<User>> {
        self.load_all(USER_PREFIX)
    }

    // ── collections ──────────────────────────────────────────────────────

    pub fn get_collection(&self, id: &str) -> CofferResult<Collection> {
        self.load(&collection_key(id))?
            .ok_or_else(|| CofferError::not_found("collection", id))
    }

    pub fn put_collection(&self, collection: &Collection) -> CofferResult<()> {
        self.save(&collection_key(&collection.id), collection)
    }

    pub fn list_collections(&self) -> CofferResult<Vec<Collection>> {
        self.load_all(COLLECTION_PREFIX)
    }

    // ── files ────────────────────────────────────────────────────────────

    pub fn find_file(&self, id: &str) -> CofferResult<Option<File>> {
        self.load(&file_key(id))
    }

    pub fn get_file(&self, id: &str) -> CofferResult<File> {
        self.find_file(id)?
            .ok_or_else(|| CofferError::not_found("file", id))
    }

    /// Write the file record and keep the remote index in step with its
    /// `remote_id`, in one batch.
    pub fn put_file(&self, file: &File) -> CofferResult<()> {
        let previous: Option<File> = self.find_file(&file.id)?;

        let mut txn = open_transaction(self.store.as_ref());
        if let Some(old_remote) = previous.as_ref().and_then(|f| f.remote_id.as_deref()) {
            if file.remote_id.as_deref() != Some(old_remote) {
                txn.delete(remote_index_key(old_remote));
            }
        }
        if let Some(remote_id) = &file.remote_id {
            txn.set(remote_index_key(remote_id), file.id.clone().into_bytes());
        }
        txn.set(file_key(&file.id), serde_json::to_vec(file)?);
        txn.commit()?;
        Ok(())
    }

    pub fn delete_file(&self, id: &str) -> CofferResult<()> {
        let Some(file) = self.find_file(id)? else {
            return Ok(());
        };

        let mut txn = open_transaction(self.store.as_ref());
        if let Some(remote_id) = &file.remote_id {
            txn.delete(remote_index_key(remote_id));
        }
        txn.delete(file_key(id));
        txn.commit()?;
        Ok(())
    }

    pub fn file_by_remote_id(&self, remote_id: &str) -> CofferResult<Option<File>> {
        let Some(local_id) = self.store.get(&remote_index_key(remote_id))? else {
            return Ok(None);
        };
        let local_id = String::from_utf8(local_id)
            .map_err(|e| CofferError::Store(anyhow::anyhow!("corrupt remote index: {e}")))?;
        self.find_file(&local_id)
    }

    pub fn files_in_collection(&self, collection_id: &str) -> CofferResult<Vec<File>> {
        let files: Vec<File> = self.load_all(FILE_PREFIX)?;
        Ok(files
            .into_iter()
            .filter(|f| f.collection_id == collection_id)
            .collect())
    }
}
