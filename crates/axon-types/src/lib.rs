pub mod artifact;
pub mod job;
pub mod result;

pub use artifact::{ArtifactHandle, ArtifactOrigin, PublishedArtifact};
pub use job::{EngineKind, EngineParams, FailureKind, JobDescriptor, JobFailure, JobStage};
pub use result::{
    EngineMetadata, InferenceResult, NamedTensor, StructuredOutput, SubmissionRecord,
    SubmissionStatus,
};
