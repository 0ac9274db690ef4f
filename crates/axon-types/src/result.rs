use crate::job::{EngineKind, EngineParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named multi-dimensional numeric array, materialized as plain data
///
/// `values` is the row-major flattening of an array with the given shape.
/// Engines convert their native tensors into this form before anything is
/// hashed, so numeric formatting never depends on the backing runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl NamedTensor {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Shape/value-count consistency; empty shape means a scalar
    pub fn is_well_formed(&self) -> bool {
        self.element_count() == self.values.len()
    }
}

/// Structured engine output, ordered
///
/// Order is semantically significant: tensor outputs follow the model's
/// declared output order, text outputs align positionally with the input
/// prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuredOutput {
    Tensors(Vec<NamedTensor>),
    Texts(Vec<String>),
}

impl StructuredOutput {
    pub fn len(&self) -> usize {
        match self {
            StructuredOutput::Tensors(t) => t.len(),
            StructuredOutput::Texts(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Engine configuration that produced a result
///
/// For the generative engine this is part of the hashed document, so two
/// differently-configured runs of the same model and input never collide on
/// the same result hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub model: String,
    pub kind: EngineKind,
    pub params: EngineParams,
}

/// Outcome of deterministic execution, ready for submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub job_id: u64,
    pub output: StructuredOutput,
    /// `0x`-prefixed lowercase-hex SHA-256 of the canonical result document,
    /// exactly 66 characters
    pub result_hash: String,
    pub metadata: EngineMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }
}

/// One on-chain submission attempt for a job's result commitment
///
/// Created when the transaction is constructed, mutated only by the
/// confirmation wait; terminal once `status` leaves Pending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub job_id: u64,
    pub result_hash: String,
    pub artifact_ref: String,
    /// Hex transaction hash, absent when broadcast itself failed
    pub tx_hash: Option<String>,
    pub status: SubmissionStatus,
    pub attempt: u32,
    pub submitted_at: DateTime<Utc>,
}
