//! In-memory remote store
//!
//! Backs the cache without any network: blobs live in a map, retrievals are
//! counted, latency and write failures can be injected. Used by tests and
//! by local development setups that have no IPFS node.

use crate::error::{ArtifactError, Result};
use crate::remote::RemoteStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryRemote {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    retrievals: AtomicUsize,
    delay: Option<Duration>,
    fail_store: bool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(self, address: &str, bytes: &[u8]) -> Self {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .insert(address.to_string(), bytes.to_vec());
        self
    }

    /// Inject latency into every retrieval
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `store` fail, exercising the degraded publish path
    pub fn failing_store(mut self) -> Self {
        self.fail_store = true;
        self
    }

    /// Number of retrievals served so far
    pub fn retrieval_count(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn retrieve(&self, address: &str, dest: &Path) -> Result<u64> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let bytes = self
            .blobs
            .lock()
            .expect("blob map poisoned")
            .get(address)
            .cloned()
            .ok_or_else(|| ArtifactError::Remote(format!("no blob for {}", address)))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn store(&self, bytes: &[u8]) -> Result<String> {
        if self.fail_store {
            return Err(ArtifactError::Remote("store offline".to_string()));
        }
        let cid = format!("Qm{}", &hex::encode(Sha256::digest(bytes))[..16]);
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .insert(cid.clone(), bytes.to_vec());
        Ok(cid)
    }

    async fn pin(&self, _address: &str) -> Result<()> {
        Ok(())
    }
}
