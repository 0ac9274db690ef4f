use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Endpoint unreachable or RPC transport failure. Retryable with
    /// backoff.
    #[error("Chain connection error: {0}")]
    Connection(String),

    /// Contract logic rejected the call. Not retryable without changed
    /// arguments; indicates a logic mismatch with the on-chain registry.
    #[error("Contract reverted: {0}")]
    Revert(String),

    /// No receipt within the bounded wait. Ambiguous: the transaction may
    /// still confirm later, so callers must re-check chain state before
    /// resubmitting.
    #[error("Chain timeout: {0}")]
    Timeout(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("ABI error: {0}")]
    Abi(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Connection(_) | ChainError::Timeout(_))
    }
}

/// Classify a transport-level error message into the taxonomy
pub fn classify_rpc_message(message: &str) -> ChainError {
    let lower = message.to_lowercase();
    if lower.contains("revert") {
        ChainError::Revert(message.to_string())
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ChainError::Timeout(message.to_string())
    } else {
        ChainError::Connection(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(matches!(
            classify_rpc_message("execution reverted: job already closed"),
            ChainError::Revert(_)
        ));
        assert!(matches!(
            classify_rpc_message("request timed out"),
            ChainError::Timeout(_)
        ));
        assert!(matches!(
            classify_rpc_message("connection refused"),
            ChainError::Connection(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(ChainError::Connection("x".into()).is_retryable());
        assert!(ChainError::Timeout("x".into()).is_retryable());
        assert!(!ChainError::Revert("x".into()).is_retryable());
        assert!(!ChainError::Signing("x".into()).is_retryable());
        assert!(!ChainError::Abi("x".into()).is_retryable());
    }
}
