use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Model reference invalid or unreadable. Fatal for the job.
    #[error("Engine load error: {0}")]
    Load(String),

    /// Missing or malformed named input. Fatal, never retried.
    #[error("Engine input error: {0}")]
    Input(String),

    /// Runtime failure during compute. Transient resource exhaustion is
    /// plausible, so bounded retries are permitted.
    #[error("Engine execution error: {0}")]
    Execution(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Execution(_))
    }
}
