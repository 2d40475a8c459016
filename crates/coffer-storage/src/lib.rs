//! Remote file gateway for the coffer vault backend
//!
//! [`RemoteGateway`] is the seam between the sync orchestrators and the
//! backend: [`HttpGateway`] talks to the real JSON API and presigned object
//! URLs, [`MemoryGateway`] keeps everything in process.

pub mod gateway;
pub mod http;
pub mod memory;

pub use gateway::RemoteGateway;
pub use http::{HttpGateway, HttpOptions};
pub use memory::MemoryGateway;
