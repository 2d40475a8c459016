pub mod api;
pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use error::{CofferError, CofferResult};
pub use types::{
    Collection, CollectionMember, File, FileMetadata, RemoteFile, RemoteState, StorageMode,
    SyncOp, SyncStatus, User,
};
