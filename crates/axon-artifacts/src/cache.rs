//! Content-addressed artifact cache
//!
//! Fetch-or-reuse of model/input blobs and publication of result blobs.
//! Cache entries carry a metadata sidecar recording the SHA-256 digest
//! observed at write time and how the entry originated. Self-published
//! entries are trusted as-is (their address was computed locally);
//! remote-fetched entries are re-hashed against the recorded digest before
//! every reuse, and a mismatch is treated as a miss. `0x`-scheme addresses
//! are additionally verified against the full recomputed digest of the
//! bytes themselves.

use crate::error::{ArtifactError, Result};
use crate::remote::RemoteStore;
use axon_types::{ArtifactHandle, ArtifactOrigin, PublishedArtifact};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const IPFS_SCHEME: &str = "ipfs://";
const LOCAL_SCHEME: &str = "0x";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    digest: String,
    origin: ArtifactOrigin,
}

pub struct ArtifactCache {
    cache_dir: PathBuf,
    remote: Arc<dyn RemoteStore>,
    // One gate per bare address: at most one remote retrieval in flight,
    // later callers wait on the first and then hit the cache.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    pub async fn new(cache_dir: impl Into<PathBuf>, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        tokio::fs::create_dir_all(&cache_dir).await?;
        Ok(Self {
            cache_dir,
            remote,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a content address to bytes on disk
    pub async fn fetch(&self, address: &str) -> Result<ArtifactHandle> {
        let bare = strip_scheme(address);
        let gate = self.flight_gate(&bare).await;
        let _guard = gate.lock().await;

        if let Some(handle) = self.cached(address, &bare).await? {
            debug!(address = %address, "artifact cache hit");
            return Ok(handle);
        }

        self.download(address, &bare).await
    }

    /// Publish bytes, returning the network address or a degraded local one
    pub async fn publish(&self, bytes: &[u8]) -> Result<PublishedArtifact> {
        let local_digest = hex::encode(Sha256::digest(bytes));

        match self.remote.store(bytes).await {
            Ok(cid) => {
                self.write_entry(&cid, bytes, &local_digest, ArtifactOrigin::SelfPublished)
                    .await?;
                info!(cid = %cid, size = bytes.len(), "artifact published");
                Ok(PublishedArtifact {
                    address: format!("{}{}", IPFS_SCHEME, cid),
                    canonical: true,
                    local_digest,
                })
            }
            Err(e) => {
                // Degraded: the digest-based address marks the publication
                // as unverified, never equivalent to a real CID.
                let bare = format!("{}{}", LOCAL_SCHEME, local_digest);
                warn!(
                    error = %e,
                    fallback = %bare,
                    "remote store unreachable, falling back to local digest address"
                );
                self.write_entry(&bare, bytes, &local_digest, ArtifactOrigin::SelfPublished)
                    .await?;
                Ok(PublishedArtifact {
                    address: bare,
                    canonical: false,
                    local_digest,
                })
            }
        }
    }

    /// Pin a published address on the remote node; best-effort
    pub async fn pin(&self, address: &str) -> Result<()> {
        if address.starts_with(LOCAL_SCHEME) {
            debug!(address = %address, "skipping pin for local-digest address");
            return Ok(());
        }
        self.remote.pin(&strip_scheme(address)).await
    }

    async fn flight_gate(&self, bare: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;
        inflight
            .entry(bare.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Check the on-disk cache, enforcing the integrity policy
    async fn cached(&self, address: &str, bare: &str) -> Result<Option<ArtifactHandle>> {
        let path = self.entry_path(bare);
        if tokio::fs::metadata(&path).await.is_err() {
            return Ok(None);
        }

        let meta = match self.read_meta(bare).await {
            Some(meta) => meta,
            None => {
                // A file with no recorded digest cannot be trusted by name
                // alone; discard and re-fetch.
                warn!(address = %address, "cache entry without metadata, discarding");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if meta.origin == ArtifactOrigin::RemoteFetched {
            let actual = hash_file(&path).await?;
            if actual != meta.digest || !digest_matches_address(bare, &actual) {
                warn!(address = %address, "cache entry digest mismatch, discarding");
                let _ = tokio::fs::remove_file(&path).await;
                let _ = tokio::fs::remove_file(self.meta_path(bare)).await;
                return Ok(None);
            }
        }

        let size_bytes = tokio::fs::metadata(&path).await?.len();
        Ok(Some(ArtifactHandle {
            content_address: address.to_string(),
            local_path: path,
            size_bytes,
            origin: meta.origin,
        }))
    }

    async fn download(&self, address: &str, bare: &str) -> Result<ArtifactHandle> {
        info!(address = %address, "retrieving artifact");

        let part_path = self.entry_path(&format!("{}.part", bare));
        let size_bytes = match self.remote.retrieve(bare, &part_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(ArtifactError::Unavailable {
                    address: address.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let digest = hash_file(&part_path).await?;
        if !digest_matches_address(bare, &digest) {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(ArtifactError::Integrity {
                address: address.to_string(),
            });
        }

        let meta = EntryMeta {
            digest,
            origin: ArtifactOrigin::RemoteFetched,
        };
        let encoded = serde_json::to_vec(&meta)
            .map_err(|e| ArtifactError::Remote(format!("cannot encode entry metadata: {}", e)))?;
        tokio::fs::write(self.meta_path(bare), encoded).await?;

        let path = self.entry_path(bare);
        tokio::fs::rename(&part_path, &path).await?;

        info!(address = %address, bytes = size_bytes, "artifact cached");
        Ok(ArtifactHandle {
            content_address: address.to_string(),
            local_path: path,
            size_bytes,
            origin: ArtifactOrigin::RemoteFetched,
        })
    }

    async fn write_entry(
        &self,
        bare: &str,
        bytes: &[u8],
        digest: &str,
        origin: ArtifactOrigin,
    ) -> Result<()> {
        tokio::fs::write(self.entry_path(bare), bytes).await?;
        let meta = EntryMeta {
            digest: digest.to_string(),
            origin,
        };
        let encoded = serde_json::to_vec(&meta)
            .map_err(|e| ArtifactError::Remote(format!("cannot encode entry metadata: {}", e)))?;
        tokio::fs::write(self.meta_path(bare), encoded).await?;
        Ok(())
    }

    async fn read_meta(&self, bare: &str) -> Option<EntryMeta> {
        let raw = tokio::fs::read(self.meta_path(bare)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn entry_path(&self, bare: &str) -> PathBuf {
        self.cache_dir.join(bare)
    }

    fn meta_path(&self, bare: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.meta", bare))
    }
}

/// Strip the URI scheme, leaving the bare address used as cache key
pub fn strip_scheme(address: &str) -> String {
    address
        .strip_prefix(IPFS_SCHEME)
        .unwrap_or(address)
        .to_string()
}

/// For digest-based addresses the bytes themselves are checkable; bare CIDs
/// are anchored by the write-time digest instead.
fn digest_matches_address(bare: &str, digest: &str) -> bool {
    match bare.strip_prefix(LOCAL_SCHEME) {
        Some(expected) => expected.eq_ignore_ascii_case(digest),
        None => true,
    }
}

async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use std::time::Duration;

    async fn cache_with(remote: Arc<MemoryRemote>) -> (ArtifactCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path(), remote).await.unwrap();
        (cache, dir)
    }

    #[tokio::test]
    async fn test_fetch_miss_then_hit() {
        let remote = Arc::new(MemoryRemote::new().with_blob("QmInput", b"input bytes"));
        let (cache, _dir) = cache_with(remote.clone()).await;

        let first = cache.fetch("ipfs://QmInput").await.unwrap();
        assert_eq!(first.size_bytes, 11);
        assert_eq!(first.origin, ArtifactOrigin::RemoteFetched);
        assert_eq!(remote.retrieval_count(), 1);

        let second = cache.fetch("ipfs://QmInput").await.unwrap();
        assert_eq!(remote.retrieval_count(), 1);
        assert_eq!(
            tokio::fs::read(&second.local_path).await.unwrap(),
            b"input bytes"
        );
    }

    #[tokio::test]
    async fn test_concurrent_fetch_single_retrieval() {
        let remote = Arc::new(
            MemoryRemote::new()
                .with_blob("QmBig", b"large model")
                .with_delay(Duration::from_millis(50)),
        );
        let (cache, _dir) = cache_with(remote.clone()).await;

        let (a, b) = tokio::join!(cache.fetch("ipfs://QmBig"), cache.fetch("ipfs://QmBig"));
        let (a, b) = (a.unwrap(), b.unwrap());

        // Exactly one remote retrieval; both callers see identical bytes
        assert_eq!(remote.retrieval_count(), 1);
        let bytes_a = tokio::fs::read(&a.local_path).await.unwrap();
        let bytes_b = tokio::fs::read(&b.local_path).await.unwrap();
        assert_eq!(bytes_a, bytes_b);
    }

    #[tokio::test]
    async fn test_publish_canonical() {
        let remote = Arc::new(MemoryRemote::new());
        let (cache, _dir) = cache_with(remote.clone()).await;

        let published = cache.publish(b"result payload").await.unwrap();
        assert!(published.canonical);
        assert!(published.address.starts_with("ipfs://"));
        assert_eq!(published.local_digest.len(), 64);

        // Self-published entries are served from cache without retrieval
        let handle = cache.fetch(&published.address).await.unwrap();
        assert_eq!(handle.origin, ArtifactOrigin::SelfPublished);
        assert_eq!(remote.retrieval_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_degraded_fallback() {
        let remote = Arc::new(MemoryRemote::new().failing_store());
        let (cache, _dir) = cache_with(remote.clone()).await;

        let published = cache.publish(b"stranded payload").await.unwrap();
        assert!(!published.canonical);
        assert!(published.address.starts_with("0x"));
        assert_eq!(published.address.len(), 66);

        let handle = cache.fetch(&published.address).await.unwrap();
        assert_eq!(
            tokio::fs::read(&handle.local_path).await.unwrap(),
            b"stranded payload"
        );
    }

    #[tokio::test]
    async fn test_corrupted_entry_refetched() {
        let remote = Arc::new(MemoryRemote::new().with_blob("QmData", b"good bytes"));
        let (cache, dir) = cache_with(remote.clone()).await;

        cache.fetch("ipfs://QmData").await.unwrap();
        assert_eq!(remote.retrieval_count(), 1);

        // Corrupt the cached file behind the cache's back
        tokio::fs::write(dir.path().join("QmData"), b"tampered")
            .await
            .unwrap();

        let handle = cache.fetch("ipfs://QmData").await.unwrap();
        assert_eq!(remote.retrieval_count(), 2);
        assert_eq!(
            tokio::fs::read(&handle.local_path).await.unwrap(),
            b"good bytes"
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_unavailable() {
        let remote = Arc::new(MemoryRemote::new());
        let (cache, _dir) = cache_with(remote).await;

        let result = cache.fetch("ipfs://QmNowhere").await;
        match result {
            Err(ArtifactError::Unavailable { address, .. }) => {
                assert_eq!(address, "ipfs://QmNowhere");
            }
            other => panic!("expected Unavailable, got {:?}", other.map(|h| h.content_address)),
        }
    }

    #[tokio::test]
    async fn test_local_digest_address_verified() {
        let bytes = b"verifiable";
        let digest = hex::encode(Sha256::digest(bytes));
        let address = format!("0x{}", digest);

        let remote = Arc::new(MemoryRemote::new().with_blob(&address, bytes));
        let (cache, _dir) = cache_with(remote.clone()).await;

        let handle = cache.fetch(&address).await.unwrap();
        assert_eq!(handle.size_bytes, bytes.len() as u64);

        // A digest address whose bytes do not hash to it is rejected
        let bogus = format!("0x{}", "ab".repeat(32));
        let remote2 = Arc::new(MemoryRemote::new().with_blob(&bogus, b"wrong content"));
        let (cache2, _dir2) = cache_with(remote2).await;
        assert!(matches!(
            cache2.fetch(&bogus).await,
            Err(ArtifactError::Integrity { .. })
        ));
    }

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("ipfs://QmAbc"), "QmAbc");
        assert_eq!(strip_scheme("QmAbc"), "QmAbc");
        assert_eq!(strip_scheme("0xdeadbeef"), "0xdeadbeef");
    }
}
