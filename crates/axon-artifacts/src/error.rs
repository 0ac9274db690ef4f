use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Neither the cache nor the remote store produced the data. Retryable
    /// with backoff up to a bounded number of attempts, then fatal for the
    /// job.
    #[error("Artifact unavailable: {address}: {reason}")]
    Unavailable { address: String, reason: String },

    /// Cached or retrieved bytes do not match the expected digest
    #[error("Artifact integrity check failed: {address}")]
    Integrity { address: String },

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArtifactError::Unavailable { .. } | ArtifactError::Remote(_)
        )
    }
}
