use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a cached artifact's bytes came to be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactOrigin {
    /// Address was computed locally at write time; trusted without re-check
    SelfPublished,
    /// Retrieved from the network; re-verified against the recorded digest
    /// before every reuse
    RemoteFetched,
}

/// A retrieved or produced content-addressed blob
///
/// Once the content address is known the bytes behind it never change;
/// handles are cheap to clone and only reference the on-disk cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Scheme-prefixed content address (`ipfs://<cid>` or `0x<sha256hex>`)
    pub content_address: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub origin: ArtifactOrigin,
}

/// Result of publishing bytes to the artifact store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Network-assigned `ipfs://` address, or the `0x<sha256hex>` fallback
    /// when the remote store was unreachable
    pub address: String,
    /// False when the address is the locally-computed fallback. A degraded
    /// publication is not equivalent to a real CID and callers must record
    /// it as unverified.
    pub canonical: bool,
    /// Local SHA-256 digest of the published bytes, lowercase hex
    pub local_digest: String,
}
