//! Sync state machine: the single authority on which operation is legal in
//! which status, and where it leads.
//!
//! ```text
//!              Upload                 LocalEdit
//!  LocalOnly ─────────► Synced ──────────────────► ModifiedLocally
//!      ▲                 │  ▲ ▲                        │    │
//!      │   CloudDelete   │  │ └──────── Upload ────────┘    │
//!      ├─────────────────┘  │                               │
//!      │                    │ Onload         Offload        │
//!      │                 CloudOnly ◄────────────────────────┤
//!      │   CloudDelete       ▲            (upload first)    │
//!      └─────────────────────┴──────────────────────────────┘
//! ```
//!
//! Any pair not in the table is rejected with `CofferError::InvalidState`.

use coffer_core::{CofferError, CofferResult, SyncOp, SyncStatus};

/// Where a legal operation leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(SyncStatus),
    /// The local record and its copies are removed
    Remove,
}

/// Look up `(status, op)` in the transition table.
pub fn transition(status: SyncStatus, op: SyncOp) -> CofferResult<Transition> {
    use SyncOp::*;
    use SyncStatus::*;

    let next = match (status, op) {
        (LocalOnly, Upload) => Transition::To(Synced),
        (LocalOnly, LocalEdit) => Transition::To(LocalOnly),

        (CloudOnly, CloudDelete) => Transition::To(LocalOnly),
        (CloudOnly, Onload) => Transition::To(Synced),
        (CloudOnly, RemoteDeleted) => Transition::Remove,

        (Synced, Download) => Transition::To(Synced),
        (Synced, LocalEdit) => Transition::To(ModifiedLocally),
        (Synced, CloudDelete) => Transition::To(LocalOnly),
        (Synced, Offload) => Transition::To(CloudOnly),
        (Synced, RemoteDeleted) => Transition::Remove,

        (ModifiedLocally, Upload) => Transition::To(Synced),
        (ModifiedLocally, LocalEdit) => Transition::To(ModifiedLocally),
        (ModifiedLocally, CloudDelete) => Transition::To(LocalOnly),
        (ModifiedLocally, Offload) => Transition::To(CloudOnly),
        (ModifiedLocally, RemoteDeleted) => Transition::To(LocalOnly),

        (status, operation) => {
            return Err(CofferError::InvalidState {
                operation,
                status,
                reason: rejection_reason(status, operation),
            })
        }
    };
    Ok(next)
}

fn rejection_reason(status: SyncStatus, op: SyncOp) -> &'static str {
    use SyncOp::*;
    use SyncStatus::*;

    match (status, op) {
        (LocalOnly, CloudDelete) => "file is local-only and does not exist in cloud",
        (LocalOnly, Offload) => "file has never been uploaded; offloading would lose it",
        (LocalOnly, RemoteDeleted) | (LocalOnly, Download) => "file has no remote copy",
        (CloudOnly, Offload) => "file is already offloaded",
        (CloudOnly, Upload) | (CloudOnly, LocalEdit) => "file has no local content",
        (CloudOnly, Download) => "cloud-only files are restored with onload",
        (Synced, Upload) => "file is already in sync",
        (ModifiedLocally, Download) => "local edits would be overwritten",
        (_, Onload) => "onload requires a cloud-only file",
        _ => "operation not permitted in this state",
    }
}

/// Shorthand for callers that only accept a status change.
pub(crate) fn next_status(status: SyncStatus, op: SyncOp) -> CofferResult<SyncStatus> {
    match transition(status, op)? {
        Transition::To(next) => Ok(next),
        Transition::Remove => Err(CofferError::InvalidState {
            operation: op,
            status,
            reason: "operation removes the file",
        }),
    }
}
