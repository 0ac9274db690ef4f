use crate::config::NodeConfig;
use anyhow::{Context, Result};
use axon_artifacts::{ArtifactCache, IpfsRemote, RemoteStore};
use axon_chain::{ChainClient, EthJobRegistry, JobChain};
use axon_engine::{EngineRegistry, GenerativeEngine, TensorEngine};
use axon_types::JobDescriptor;
use axon_worker::{job_channel, shutdown_channel, JobPipeline, WorkerLoop};
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Fully wired worker node, ready to run
///
/// `jobs` is the pipeline's entry point: the job-discovery collaborator
/// pushes accepted `JobDescriptor`s into it. The worker loop pulls from the
/// other end with bounded concurrency.
pub struct WorkerNode {
    pub worker: WorkerLoop,
    pub jobs: mpsc::Sender<JobDescriptor>,
    pub shutdown: watch::Sender<bool>,
    pub wallet_address: Address,
}

impl WorkerNode {
    pub async fn build(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let chain_client = Arc::new(
            ChainClient::new(config.chain_config(), &config.chain.private_key)
                .context("cannot initialize chain client")?,
        );
        let wallet_address = chain_client.address();
        let registry_address: Address = config
            .chain
            .registry_address
            .parse()
            .context("invalid registry address")?;
        let registry: Arc<dyn JobChain> = Arc::new(
            EthJobRegistry::new(Arc::clone(&chain_client), registry_address)
                .context("cannot bind job registry")?,
        );

        let remote: Arc<dyn RemoteStore> = Arc::new(
            IpfsRemote::new(
                &config.ipfs.gateway_url,
                &config.ipfs.api_url,
                Duration::from_secs(config.ipfs.fetch_timeout_secs),
            )
            .context("cannot initialize IPFS remote")?,
        );
        let artifacts = Arc::new(
            ArtifactCache::new(config.cache_dir(), remote)
                .await
                .context("cannot initialize artifact cache")?,
        );

        let mut engines = EngineRegistry::new();
        engines.register(Arc::new(TensorEngine::new()));
        engines.register(Arc::new(
            GenerativeEngine::new(
                &config.engine.generative_endpoint,
                Duration::from_secs(config.engine.generative_timeout_secs),
            )
            .map_err(|e| anyhow::anyhow!("cannot initialize generative engine: {}", e))?,
        ));

        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let (jobs_tx, jobs_rx) = job_channel(config.worker.queue_depth);

        let pipeline = Arc::new(JobPipeline::new(
            engines,
            artifacts,
            registry,
            config.pipeline_config(),
            shutdown_rx.clone(),
        ));
        let worker = WorkerLoop::new(pipeline, jobs_rx, shutdown_rx, config.worker_config());

        info!(
            name = %config.node.name,
            wallet = %wallet_address,
            registry = %registry_address,
            concurrency = config.worker.concurrency,
            "worker node wired"
        );

        Ok(Self {
            worker,
            jobs: jobs_tx,
            shutdown: shutdown_tx,
            wallet_address,
        })
    }
}
