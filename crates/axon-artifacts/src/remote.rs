//! Remote content-addressed store boundary
//!
//! The cache talks to the network through this trait only: gateway reads,
//! API writes and pins. Tests swap in in-memory doubles.

use crate::error::{ArtifactError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Stream the blob behind a bare address into `dest`, returning the
    /// number of bytes written. Must never buffer the whole payload.
    async fn retrieve(&self, address: &str, dest: &Path) -> Result<u64>;

    /// Add bytes to the remote store, returning the network-assigned bare
    /// content identifier.
    async fn store(&self, bytes: &[u8]) -> Result<String>;

    /// Pin a bare content identifier on the remote node
    async fn pin(&self, address: &str) -> Result<()>;
}

/// IPFS-backed remote store: gateway for reads, `/api/v0` for writes
pub struct IpfsRemote {
    gateway_url: String,
    api_url: String,
    client: reqwest::Client,
}

impl IpfsRemote {
    pub fn new(
        gateway_url: impl Into<String>,
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArtifactError::Remote(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            gateway_url: normalize(gateway_url.into()),
            api_url: normalize(api_url.into()),
            client,
        })
    }
}

fn normalize(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[async_trait]
impl RemoteStore for IpfsRemote {
    async fn retrieve(&self, address: &str, dest: &Path) -> Result<u64> {
        let url = format!("{}/{}", self.gateway_url, address);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArtifactError::Remote(format!("gateway request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ArtifactError::Remote(format!(
                "gateway returned HTTP {} for {}",
                response.status(),
                address
            )));
        }

        // Stream chunk by chunk; large artifacts never sit in memory whole
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| ArtifactError::Remote(format!("stream error: {}", e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(address = %address, bytes = written, "retrieved from gateway");
        Ok(written)
    }

    async fn store(&self, bytes: &[u8]) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("data");
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = format!("{}/add", self.api_url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ArtifactError::Remote(format!("add request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ArtifactError::Remote(format!(
                "add returned HTTP {}",
                response.status()
            )));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| ArtifactError::Remote(format!("malformed add response: {}", e)))?;

        tracing::debug!(cid = %added.hash, "stored on remote");
        Ok(added.hash)
    }

    async fn pin(&self, address: &str) -> Result<()> {
        let url = format!("{}/pin/add?arg={}", self.api_url, address);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ArtifactError::Remote(format!("pin request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ArtifactError::Remote(format!(
                "pin returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
