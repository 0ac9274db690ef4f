//! Job execution pipeline
//!
//! Drives one job end-to-end: fetch → execute → hash → publish → submit.
//! Each stage classifies its own failures against the taxonomy and either
//! retries in place (bounded, with backoff) or escalates to a terminal
//! `Failed` state. A job is never restarted from `Accepted` here.
//!
//! Cancellation is checked at stage boundaries only: a stage that has
//! started, in particular a transaction broadcast, always runs to its own
//! completion or timeout.

use crate::retry::RetryPolicy;
use axon_artifacts::ArtifactCache;
use axon_canon::{document, hash_canonical_text, to_canonical_json, Digest};
use axon_chain::{ChainError, JobChain};
use axon_engine::{
    parse_input, validate_params, EngineError, EngineRegistry, ModelSource,
};
use axon_types::{
    ArtifactHandle, EngineMetadata, FailureKind, InferenceResult, JobDescriptor, JobFailure,
    JobStage, StructuredOutput, SubmissionRecord, SubmissionStatus,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on a single engine execution attempt
    pub execution_timeout: Duration,
    pub artifact_retry: RetryPolicy,
    pub engine_retry: RetryPolicy,
    pub submit_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(300),
            artifact_retry: RetryPolicy::default(),
            engine_retry: RetryPolicy::default(),
            submit_retry: RetryPolicy::default(),
            publish_retry: RetryPolicy {
                max_attempts: 5,
                backoff_base: Duration::from_secs(2),
                backoff_max: Duration::from_secs(120),
            },
        }
    }
}

/// Terminal outcome of one pipeline run
#[derive(Debug)]
pub struct JobReport {
    pub job_id: u64,
    pub stage: JobStage,
    pub result_hash: Option<String>,
    pub submission: Option<SubmissionRecord>,
    pub failure: Option<JobFailure>,
}

impl JobReport {
    pub fn is_confirmed(&self) -> bool {
        self.stage == JobStage::Confirmed
    }
}

pub struct JobPipeline {
    engines: EngineRegistry,
    artifacts: Arc<ArtifactCache>,
    chain: Arc<dyn JobChain>,
    config: PipelineConfig,
    shutdown: watch::Receiver<bool>,
}

impl JobPipeline {
    pub fn new(
        engines: EngineRegistry,
        artifacts: Arc<ArtifactCache>,
        chain: Arc<dyn JobChain>,
        config: PipelineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engines,
            artifacts,
            chain,
            config,
            shutdown,
        }
    }

    /// Run one job to a terminal state
    pub async fn run(&self, job: JobDescriptor) -> JobReport {
        let job_id = job.job_id;
        info!(job_id, engine = %job.engine_kind, "job accepted");

        let mut stage = JobStage::Accepted;
        match self.drive(&job, &mut stage).await {
            Ok((result_hash, submission)) => {
                info!(job_id, result_hash = %result_hash, "job confirmed");
                JobReport {
                    job_id,
                    stage: JobStage::Confirmed,
                    result_hash: Some(result_hash),
                    submission: Some(submission),
                    failure: None,
                }
            }
            Err(failure) => {
                warn!(
                    job_id,
                    stage = %failure.stage,
                    kind = ?failure.kind,
                    detail = %failure.detail,
                    "job failed"
                );
                JobReport {
                    job_id,
                    stage: JobStage::Failed,
                    result_hash: None,
                    submission: None,
                    failure: Some(failure),
                }
            }
        }
    }

    async fn drive(
        &self,
        job: &JobDescriptor,
        stage: &mut JobStage,
    ) -> Result<(String, SubmissionRecord), JobFailure> {
        self.ensure_active(job, *stage)?;
        self.advance(job.job_id, stage, JobStage::Fetching);
        let (model_source, input_bytes) = self.fetch_stage(job, *stage).await?;

        self.ensure_active(job, *stage)?;
        self.advance(job.job_id, stage, JobStage::Executing);
        let (output, model_id, prompts) = self
            .execute_stage(job, *stage, model_source, &input_bytes)
            .await?;

        self.advance(job.job_id, stage, JobStage::Hashing);
        let (result, canonical_payload) =
            self.hash_stage(job, *stage, output, model_id, &prompts)?;

        self.ensure_active(job, *stage)?;
        self.advance(job.job_id, stage, JobStage::Publishing);
        let artifact_ref = self.publish_stage(job, canonical_payload).await;

        self.ensure_active(job, *stage)?;
        self.advance(job.job_id, stage, JobStage::Submitting);
        let record = self.submit_stage(job, *stage, &result, &artifact_ref).await?;

        self.advance(job.job_id, stage, JobStage::Confirmed);
        Ok((result.result_hash, record))
    }

    /// Resolve model and input references; both must succeed
    async fn fetch_stage(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
    ) -> Result<(ModelSource, Vec<u8>), JobFailure> {
        let model_source = if is_content_address(&job.model_ref) {
            let handle = self.fetch_with_retry(job, stage, &job.model_ref).await?;
            ModelSource::Artifact(handle)
        } else {
            // Bare identifier resolved by the engine's own runtime
            ModelSource::Identifier(job.model_ref.clone())
        };

        let input_handle = self.fetch_with_retry(job, stage, &job.input_ref).await?;
        let input_bytes = tokio::fs::read(&input_handle.local_path)
            .await
            .map_err(|e| {
                self.fail(
                    job,
                    stage,
                    FailureKind::ArtifactUnavailable,
                    format!("cached input unreadable: {}", e),
                )
            })?;

        Ok((model_source, input_bytes))
    }

    async fn fetch_with_retry(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
        address: &str,
    ) -> Result<ArtifactHandle, JobFailure> {
        let policy = &self.config.artifact_retry;
        let mut attempt: u32 = 0;
        loop {
            match self.artifacts.fetch(address).await {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    attempt += 1;
                    if e.is_retryable() && policy.attempts_remaining(attempt) {
                        let delay = policy.backoff_delay(attempt - 1);
                        warn!(
                            job_id = job.job_id,
                            address = %address,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "artifact fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        self.ensure_active(job, stage)?;
                        continue;
                    }
                    return Err(self.fail(
                        job,
                        stage,
                        FailureKind::ArtifactUnavailable,
                        e.to_string(),
                    ));
                }
            }
        }
    }

    /// Dispatch to the engine named by the descriptor
    async fn execute_stage(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
        model_source: ModelSource,
        input_bytes: &[u8],
    ) -> Result<(StructuredOutput, String, Vec<String>), JobFailure> {
        let input = parse_input(input_bytes, job.engine_kind)
            .map_err(|e| self.engine_failure(job, stage, &e))?;
        validate_params(&job.params).map_err(|e| self.engine_failure(job, stage, &e))?;

        let engine = self
            .engines
            .get(job.engine_kind)
            .map_err(|e| self.engine_failure(job, stage, &e))?;
        let session = engine
            .prepare(&model_source)
            .await
            .map_err(|e| self.engine_failure(job, stage, &e))?;

        let prompts = input.prompts().map(<[String]>::to_vec).unwrap_or_default();

        let policy = &self.config.engine_retry;
        let mut attempt: u32 = 0;
        let output = loop {
            self.ensure_active(job, stage)?;

            let run = tokio::time::timeout(
                self.config.execution_timeout,
                session.execute_batch(&input, &job.params),
            )
            .await;
            let outcome = match run {
                Ok(result) => result,
                Err(_) => Err(EngineError::Execution(format!(
                    "execution exceeded {:?}",
                    self.config.execution_timeout
                ))),
            };

            match outcome {
                Ok(output) => break output,
                Err(e) => {
                    attempt += 1;
                    if e.is_retryable() && policy.attempts_remaining(attempt) {
                        let delay = policy.backoff_delay(attempt - 1);
                        warn!(
                            job_id = job.job_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "engine execution failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(self.engine_failure(job, stage, &e));
                }
            }
        };

        Ok((output, session.model_id().to_string(), prompts))
    }

    /// Canonical-hash the output together with engine metadata
    fn hash_stage(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
        output: StructuredOutput,
        model_id: String,
        prompts: &[String],
    ) -> Result<(InferenceResult, String), JobFailure> {
        let metadata = EngineMetadata {
            model: model_id,
            kind: job.engine_kind,
            params: job.params.clone(),
        };

        let build = || -> axon_canon::Result<(String, Digest)> {
            let doc = document::result_document(&output, &metadata, prompts)?;
            let canonical = to_canonical_json(&doc)?;
            let digest = hash_canonical_text(&canonical);
            Ok((canonical, digest))
        };
        let (canonical, digest) = build().map_err(|e| {
            self.fail(job, stage, FailureKind::Serialization, e.to_string())
        })?;

        info!(job_id = job.job_id, result_hash = %digest, "result hashed");

        let result = InferenceResult {
            job_id: job.job_id,
            output,
            result_hash: digest.to_hex(),
            metadata,
        };
        Ok((result, canonical))
    }

    /// Publish the full payload for auditability; never fatal
    ///
    /// The hash alone is the binding commitment. A degraded or failed
    /// publication is recorded, retried in the background, and the locally
    /// computed digest address stands in as the reference.
    async fn publish_stage(&self, job: &JobDescriptor, payload: String) -> String {
        match self.artifacts.publish(payload.as_bytes()).await {
            Ok(published) if published.canonical => {
                if let Err(e) = self.artifacts.pin(&published.address).await {
                    warn!(job_id = job.job_id, error = %e, "pin failed");
                }
                info!(
                    job_id = job.job_id,
                    address = %published.address,
                    "result payload published"
                );
                published.address
            }
            Ok(published) => {
                warn!(
                    job_id = job.job_id,
                    address = %published.address,
                    "degraded publication, retrying in background"
                );
                self.spawn_publish_retry(job.job_id, payload);
                published.address
            }
            Err(e) => {
                let fallback = hash_canonical_text(&payload).to_hex();
                warn!(
                    job_id = job.job_id,
                    error = %e,
                    fallback = %fallback,
                    "publication failed, using local digest reference"
                );
                self.spawn_publish_retry(job.job_id, payload);
                fallback
            }
        }
    }

    fn spawn_publish_retry(&self, job_id: u64, payload: String) {
        let artifacts = Arc::clone(&self.artifacts);
        let policy = self.config.publish_retry.clone();
        tokio::spawn(async move {
            for attempt in 0..policy.max_attempts {
                tokio::time::sleep(policy.backoff_delay(attempt)).await;
                match artifacts.publish(payload.as_bytes()).await {
                    Ok(published) if published.canonical => {
                        if let Err(e) = artifacts.pin(&published.address).await {
                            warn!(job_id, error = %e, "pin failed");
                        }
                        info!(
                            job_id,
                            address = %published.address,
                            "background publication succeeded"
                        );
                        return;
                    }
                    Ok(_) => {
                        debug!(job_id, attempt, "background publication still degraded")
                    }
                    Err(e) => {
                        debug!(job_id, attempt, error = %e, "background publication failed")
                    }
                }
            }
            warn!(job_id, "background publication gave up");
        });
    }

    /// Commit the result hash on-chain, guarding against double submission
    async fn submit_stage(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
        result: &InferenceResult,
        artifact_ref: &str,
    ) -> Result<SubmissionRecord, JobFailure> {
        let digest = Digest::parse(&result.result_hash).map_err(|e| {
            self.fail(job, stage, FailureKind::Serialization, e.to_string())
        })?;
        let hash_bytes = *digest.as_bytes();

        let policy = &self.config.submit_retry;
        let mut attempt: u32 = 0;
        loop {
            // Refuse to start a new broadcast after shutdown was requested;
            // a broadcast already in flight is never interrupted.
            self.ensure_active(job, stage)?;
            attempt += 1;

            match self
                .chain
                .submit_result(job.job_id, hash_bytes, artifact_ref)
                .await
            {
                Ok(tx_hash) => {
                    return Ok(SubmissionRecord {
                        job_id: job.job_id,
                        result_hash: result.result_hash.clone(),
                        artifact_ref: artifact_ref.to_string(),
                        tx_hash: Some(tx_hash),
                        status: SubmissionStatus::Confirmed,
                        attempt,
                        submitted_at: Utc::now(),
                    });
                }
                Err(ChainError::Timeout(detail)) => {
                    // Ambiguous: the transaction may still confirm. Check
                    // the registry before any resubmission; two commitments
                    // for the same job must never race.
                    match self.chain.job_has_result(job.job_id).await {
                        Ok(true) => {
                            info!(
                                job_id = job.job_id,
                                "registry already holds a result, not resubmitting"
                            );
                            return Ok(SubmissionRecord {
                                job_id: job.job_id,
                                result_hash: result.result_hash.clone(),
                                artifact_ref: artifact_ref.to_string(),
                                tx_hash: None,
                                status: SubmissionStatus::Confirmed,
                                attempt,
                                submitted_at: Utc::now(),
                            });
                        }
                        Ok(false) => {
                            if policy.attempts_remaining(attempt) {
                                let delay = policy.backoff_delay(attempt - 1);
                                warn!(
                                    job_id = job.job_id,
                                    attempt,
                                    "submission timed out with no recorded result, resubmitting"
                                );
                                tokio::time::sleep(delay).await;
                                continue;
                            }
                            return Err(self.fail(job, stage, FailureKind::Timeout, detail));
                        }
                        Err(probe_err) => {
                            if policy.attempts_remaining(attempt) {
                                warn!(
                                    job_id = job.job_id,
                                    error = %probe_err,
                                    "status probe failed after timeout, retrying"
                                );
                                tokio::time::sleep(policy.backoff_delay(attempt - 1)).await;
                                continue;
                            }
                            return Err(self.fail(
                                job,
                                stage,
                                FailureKind::Timeout,
                                format!("{} (status probe failed: {})", detail, probe_err),
                            ));
                        }
                    }
                }
                Err(e @ ChainError::Connection(_)) => {
                    if policy.attempts_remaining(attempt) {
                        let delay = policy.backoff_delay(attempt - 1);
                        warn!(
                            job_id = job.job_id,
                            attempt,
                            error = %e,
                            "submission failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(self.fail(job, stage, FailureKind::Connection, e.to_string()));
                }
                Err(e @ ChainError::Revert(_)) => {
                    return Err(self.fail(job, stage, FailureKind::Revert, e.to_string()));
                }
                Err(e) => {
                    return Err(self.fail(job, stage, FailureKind::Config, e.to_string()));
                }
            }
        }
    }

    fn advance(&self, job_id: u64, stage: &mut JobStage, next: JobStage) {
        debug_assert!(stage.can_transition_to(&next));
        debug!(job_id, from = %stage, to = %next, "stage transition");
        *stage = next;
    }

    fn ensure_active(&self, job: &JobDescriptor, stage: JobStage) -> Result<(), JobFailure> {
        if *self.shutdown.borrow() {
            Err(self.fail(
                job,
                stage,
                FailureKind::Cancelled,
                "shutdown requested".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn fail(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
        kind: FailureKind,
        detail: String,
    ) -> JobFailure {
        JobFailure {
            job_id: job.job_id,
            stage,
            kind,
            detail,
        }
    }

    fn engine_failure(
        &self,
        job: &JobDescriptor,
        stage: JobStage,
        error: &EngineError,
    ) -> JobFailure {
        let kind = match error {
            EngineError::Load(_) => FailureKind::EngineLoad,
            EngineError::Input(_) => FailureKind::EngineInput,
            EngineError::Execution(_) => FailureKind::EngineExecution,
        };
        self.fail(job, stage, kind, error.to_string())
    }
}

/// Whether a reference names content in the artifact store, as opposed to a
/// model identifier resolved by an engine runtime
pub fn is_content_address(reference: &str) -> bool {
    reference.starts_with("ipfs://") || reference.starts_with("0x")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_content_address() {
        assert!(is_content_address("ipfs://QmFoo"));
        assert!(is_content_address("0xdeadbeef"));
        assert!(!is_content_address("meta-llama/Llama-3-8b"));
        assert!(!is_content_address("resnet50"));
    }
}
