//! coffer-sync: local state, sync state machine and transfer orchestration
//!
//! Every operation takes a [`VaultContext`] holding the local store, the
//! remote gateway and the per-file lock registry. Mutating operations hold
//! the file's lock for their whole duration.

pub mod account;
pub mod collection;
pub mod context;
pub mod download;
pub mod engine;
pub mod import;
pub mod lifecycle;
pub mod local;
pub mod locks;
pub mod repo;
pub mod state;
pub mod store;
pub mod upload;

mod unlock;

pub use account::{
    change_password, collection_name, create_collection, open_shared_collection_key,
    recover_account, register_user, share_collection, Registration,
};
pub use collection::{sync_collection, CollectionSyncReport, SyncFailure};
pub use context::{SyncSettings, VaultContext};
pub use download::{download_file, onload_file};
pub use engine::{plan, sync_file, SyncAction, SyncOutcome};
pub use import::{import_file, replace_content, ImportRequest};
pub use lifecycle::{apply_remote_deletion, cloud_delete_file, offload_file, RemoteDeletion};
pub use repo::Repository;
pub use state::{transition, Transition};
pub use store::{open_store, KvStore, MemoryStore};
pub use upload::upload_file;
