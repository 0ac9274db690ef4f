//! Content-Addressed Artifact Cache
//!
//! Fetch-or-reuse of model and input blobs, and content-addressed
//! publication of result blobs, over an IPFS gateway/API. Concurrent
//! fetches of the same address are deduplicated to a single remote
//! retrieval; remote-sourced cache entries are verified before reuse.

pub mod cache;
pub mod error;
pub mod memory;
pub mod remote;

pub use cache::{strip_scheme, ArtifactCache};
pub use error::{ArtifactError, Result};
pub use memory::MemoryRemote;
pub use remote::{IpfsRemote, RemoteStore};
