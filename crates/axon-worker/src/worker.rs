//! Worker loop
//!
//! Owns pipeline lifecycle across many jobs: a bounded queue of accepted
//! descriptors in, a fixed-size pool of concurrent pipeline executions, one
//! isolated task per job. One failing or panicking job never takes down the
//! process or its siblings. Shutdown is graceful: stop pulling, let
//! in-flight pipelines finish their current stage, drain with a deadline.

use crate::pipeline::{JobPipeline, JobReport};
use axon_types::{FailureKind, JobDescriptor, JobStage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent pipeline executions; engines are resource-heavy, keep
    /// this small
    pub concurrency: usize,
    pub queue_depth: usize,
    /// How long in-flight jobs get to finish after shutdown is requested
    pub shutdown_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            queue_depth: 64,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub total_jobs: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: Result<JobReport, JoinError>) {
        match outcome {
            Ok(report) if report.stage == JobStage::Confirmed => {
                self.confirmed += 1;
            }
            Ok(report) => {
                self.failed += 1;
                if report
                    .failure
                    .as_ref()
                    .is_some_and(|f| f.kind == FailureKind::Cancelled)
                {
                    self.cancelled += 1;
                }
            }
            Err(join_error) => {
                // Isolation: a panicked or aborted job task is recorded and
                // never propagated to the process
                self.failed += 1;
                if join_error.is_cancelled() {
                    self.cancelled += 1;
                } else {
                    error!(error = %join_error, "job task panicked");
                }
            }
        }
    }
}

/// Bounded queue feeding the loop; the producer side belongs to the
/// job-discovery collaborator
pub fn job_channel(depth: usize) -> (mpsc::Sender<JobDescriptor>, mpsc::Receiver<JobDescriptor>) {
    mpsc::channel(depth)
}

pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

pub struct WorkerLoop {
    pipeline: Arc<JobPipeline>,
    jobs: mpsc::Receiver<JobDescriptor>,
    shutdown: watch::Receiver<bool>,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        pipeline: Arc<JobPipeline>,
        jobs: mpsc::Receiver<JobDescriptor>,
        shutdown: watch::Receiver<bool>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pipeline,
            jobs,
            shutdown,
            config,
        }
    }

    pub async fn run(self) -> WorkerStats {
        let WorkerLoop {
            pipeline,
            mut jobs,
            mut shutdown,
            config,
        } = self;

        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let mut tasks: JoinSet<JobReport> = JoinSet::new();
        let mut stats = WorkerStats::default();

        info!(
            concurrency = config.concurrency,
            queue_depth = config.queue_depth,
            "worker loop started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested, draining in-flight jobs");
                        break;
                    }
                }
                joined = tasks.join_next(), if !tasks.is_empty() => {
                    if let Some(outcome) = joined {
                        stats.record(outcome);
                    }
                }
                maybe_job = jobs.recv() => {
                    let job = match maybe_job {
                        Some(job) => job,
                        None => {
                            info!("job queue closed, draining in-flight jobs");
                            break;
                        }
                    };

                    // Backpressure: wait for a pool slot, but still react
                    // to shutdown while waiting
                    let permit = tokio::select! {
                        permit = Arc::clone(&semaphore).acquire_owned() => {
                            match permit {
                                Ok(permit) => permit,
                                Err(_) => break,
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                warn!(job_id = job.job_id, "job dropped at shutdown");
                                break;
                            }
                            continue;
                        }
                    };

                    stats.total_jobs += 1;
                    let pipeline = Arc::clone(&pipeline);
                    tasks.spawn(async move {
                        let report = pipeline.run(job).await;
                        drop(permit);
                        report
                    });
                }
            }
        }

        jobs.close();
        let deadline = tokio::time::sleep(config.shutdown_grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        remaining = tasks.len(),
                        "shutdown grace expired, aborting remaining jobs"
                    );
                    tasks.abort_all();
                    while let Some(outcome) = tasks.join_next().await {
                        stats.record(outcome);
                    }
                    break;
                }
                joined = tasks.join_next() => {
                    match joined {
                        Some(outcome) => stats.record(outcome),
                        None => break,
                    }
                }
            }
        }

        info!(
            total = stats.total_jobs,
            confirmed = stats.confirmed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "worker loop stopped"
        );
        stats
    }
}
