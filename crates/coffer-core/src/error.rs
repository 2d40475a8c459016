use std::time::Duration;

use coffer_crypto::CryptoError;
use thiserror::Error;

use crate::types::{SyncOp, SyncStatus};

pub type CofferResult<T> = Result<T, CofferError>;

/// Closed error taxonomy for every vault operation.
///
/// Callers branch on variants, never on message text.
#[derive(Debug, Error)]
pub enum CofferError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("decryption failed: incorrect password or corrupted data")]
    AuthenticationFailed,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("file {0} not found in cloud")]
    NotFoundInCloud(String),

    #[error("cannot {operation} file in state {status}: {reason}")]
    InvalidState {
        operation: SyncOp,
        status: SyncStatus,
        reason: &'static str,
    },

    #[error("server returned {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote file {0} was modified concurrently")]
    Conflict(String),

    #[error("upload of remote file {remote_id} incomplete: {reason}")]
    UploadIncomplete { remote_id: String, reason: String },

    #[error("integrity check failed for file {0}: ciphertext hash mismatch")]
    IntegrityMismatch(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("local store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CryptoError> for CofferError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed => CofferError::AuthenticationFailed,
            other => CofferError::Crypto(other),
        }
    }
}

impl CofferError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        CofferError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CofferError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// The only signal for a wrong password. Worth re-prompting for, never
    /// worth retrying with the same credentials.
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, CofferError::AuthenticationFailed)
    }

    /// Errors a caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            CofferError::Transport { status, .. } => *status >= 500 || *status == 429,
            CofferError::Connection(_)
            | CofferError::Timeout(_)
            | CofferError::UploadIncomplete { .. } => true,
            _ => false,
        }
    }
}
