use serde::{Deserialize, Serialize};

/// Engine variants that can execute a job
///
/// New engine kinds are added by implementing the engine capability in
/// `axon-engine`; code downstream of the pipeline dispatches through the
/// capability and never branches on the kind itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Named-tensor inference over a local ONNX graph
    Tensor,
    /// Prompt-to-text generation against a serving runtime
    Generative,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Tensor => write!(f, "tensor"),
            EngineKind::Generative => write!(f, "generative"),
        }
    }
}

/// Engine-specific execution parameters
///
/// Every field is a fixed value chosen at job creation. Determinism of the
/// result hash depends on it: no wall-clock inputs, no unpinned randomness.
/// The generative engine records `max_tokens`, `temperature` and `seed` in
/// the hashed result document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// -1 disables top-k filtering
    pub top_k: i32,
    pub seed: u64,
    pub batch_size: usize,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.0,
            top_p: 1.0,
            top_k: -1,
            seed: 0,
            batch_size: 8,
        }
    }
}

/// An accepted compute job, immutable for its whole pipeline run
///
/// `model_ref` is either a content address (`ipfs://…`) resolved through the
/// artifact cache, or a bare model identifier understood by the serving
/// runtime. `input_ref` is always a content address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: u64,
    pub model_ref: String,
    pub input_ref: String,
    pub engine_kind: EngineKind,
    pub params: EngineParams,
}

/// Pipeline stage for a single job
///
/// Transitions are strictly forward; `Confirmed` and `Failed` are terminal.
/// A failed job is never restarted from `Accepted` by the pipeline itself;
/// re-acceptance is the worker loop's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStage {
    Accepted,
    Fetching,
    Executing,
    Hashing,
    Publishing,
    Submitting,
    Confirmed,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: &Self) -> bool {
        use JobStage::*;
        match (self, next) {
            (Accepted, Fetching) => true,
            (Fetching, Executing) => true,
            (Executing, Hashing) => true,
            (Hashing, Publishing) => true,
            (Publishing, Submitting) => true,
            (Submitting, Confirmed) => true,

            // Every non-terminal stage can fail
            (Accepted, Failed)
            | (Fetching, Failed)
            | (Executing, Failed)
            | (Hashing, Failed)
            | (Publishing, Failed)
            | (Submitting, Failed) => true,

            // Terminal stages cannot transition
            (Confirmed, _) | (Failed, _) => false,

            _ => false,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStage::Accepted => "accepted",
            JobStage::Fetching => "fetching",
            JobStage::Executing => "executing",
            JobStage::Hashing => "hashing",
            JobStage::Publishing => "publishing",
            JobStage::Submitting => "submitting",
            JobStage::Confirmed => "confirmed",
            JobStage::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Failure taxonomy, attached to every terminal `Failed` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Invalid configuration, fatal at startup
    Config,
    /// Neither cache nor remote produced the artifact within the retry budget
    ArtifactUnavailable,
    /// Model reference invalid or unreadable
    EngineLoad,
    /// Missing or malformed named input
    EngineInput,
    /// Runtime failure during compute
    EngineExecution,
    /// Output could not be canonicalized (e.g. non-finite numbers)
    Serialization,
    /// Endpoint unreachable
    Connection,
    /// Bounded wait expired
    Timeout,
    /// Contract logic rejected the call
    Revert,
    /// Shutdown requested before the job could reach Confirmed
    Cancelled,
}

impl FailureKind {
    /// Whether a stage-local retry (bounded, with backoff) is permitted
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::ArtifactUnavailable
                | FailureKind::EngineExecution
                | FailureKind::Connection
                | FailureKind::Timeout
        )
    }
}

/// Terminal failure report for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub job_id: u64,
    pub stage: JobStage,
    pub kind: FailureKind,
    pub detail: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {} failed at {}: {:?}: {}",
            self.job_id, self.stage, self.kind, self.detail
        )
    }
}

#[cfg(test)]
mod job_lifecycle_tests {
    use super::*;

    #[test]
    fn test_terminal_stages() {
        assert!(JobStage::Confirmed.is_terminal());
        assert!(JobStage::Failed.is_terminal());

        assert!(!JobStage::Accepted.is_terminal());
        assert!(!JobStage::Fetching.is_terminal());
        assert!(!JobStage::Executing.is_terminal());
        assert!(!JobStage::Submitting.is_terminal());
    }

    #[test]
    fn test_happy_path() {
        assert!(JobStage::Accepted.can_transition_to(&JobStage::Fetching));
        assert!(JobStage::Fetching.can_transition_to(&JobStage::Executing));
        assert!(JobStage::Executing.can_transition_to(&JobStage::Hashing));
        assert!(JobStage::Hashing.can_transition_to(&JobStage::Publishing));
        assert!(JobStage::Publishing.can_transition_to(&JobStage::Submitting));
        assert!(JobStage::Submitting.can_transition_to(&JobStage::Confirmed));
        assert!(JobStage::Confirmed.is_terminal());
    }

    #[test]
    fn test_failure_from_every_stage() {
        assert!(JobStage::Accepted.can_transition_to(&JobStage::Failed));
        assert!(JobStage::Fetching.can_transition_to(&JobStage::Failed));
        assert!(JobStage::Executing.can_transition_to(&JobStage::Failed));
        assert!(JobStage::Hashing.can_transition_to(&JobStage::Failed));
        assert!(JobStage::Publishing.can_transition_to(&JobStage::Failed));
        assert!(JobStage::Submitting.can_transition_to(&JobStage::Failed));
    }

    #[test]
    fn test_invalid_transitions() {
        // Cannot skip stages
        assert!(!JobStage::Accepted.can_transition_to(&JobStage::Executing));
        assert!(!JobStage::Fetching.can_transition_to(&JobStage::Submitting));

        // Cannot move backwards
        assert!(!JobStage::Executing.can_transition_to(&JobStage::Fetching));

        // Cannot leave terminal stages
        assert!(!JobStage::Confirmed.can_transition_to(&JobStage::Failed));
        assert!(!JobStage::Failed.can_transition_to(&JobStage::Accepted));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(FailureKind::ArtifactUnavailable.is_retryable());
        assert!(FailureKind::EngineExecution.is_retryable());
        assert!(FailureKind::Connection.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());

        assert!(!FailureKind::EngineLoad.is_retryable());
        assert!(!FailureKind::EngineInput.is_retryable());
        assert!(!FailureKind::Serialization.is_retryable());
        assert!(!FailureKind::Revert.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }
}
