//! Job Pipeline and Worker Loop
//!
//! The orchestration layer of the worker node. `JobPipeline` drives one
//! accepted job through fetch, deterministic execution, canonical hashing,
//! result publication and authenticated on-chain submission, with per-stage
//! failure classification and bounded retries. `WorkerLoop` runs pipelines
//! across many jobs with bounded concurrency and graceful shutdown.
//!
//! No component above the pipeline holds job-specific state after a job
//! reaches a terminal stage.

pub mod pipeline;
pub mod retry;
pub mod worker;

pub use pipeline::{is_content_address, JobPipeline, JobReport, PipelineConfig};
pub use retry::RetryPolicy;
pub use worker::{job_channel, shutdown_channel, WorkerConfig, WorkerLoop, WorkerStats};
