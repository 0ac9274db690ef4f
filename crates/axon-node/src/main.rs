use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::signers::{LocalWallet, Signer};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod logging;
mod node;

use config::{NodeConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "axon")]
#[command(about = "Axon compute worker - verifiable AI inference node", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker node
    Start {
        /// Data directory for the artifact cache
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Concurrent pipeline executions
        #[arg(long, default_value = "2")]
        concurrency: usize,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for the configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Generate a new wallet key
    Keygen {
        /// Output file for the key; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; ignored otherwise
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load config early to get logging settings
    let temp_config = if let Some(ref config_path) = cli.config {
        NodeConfig::from_file(config_path).ok()
    } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
        NodeConfig::from_file(Path::new(DEFAULT_CONFIG_FILE)).ok()
    } else {
        None
    };
    let logging_config = temp_config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();

    if let Err(e) = logging::init_logging(&logging_config, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        let log_level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| format!("axon={}", log_level)),
            ))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match cli.command {
        Commands::Start {
            data_dir,
            concurrency,
        } => {
            // Priority order: CLI args > env vars > config file > defaults
            let mut config = if let Some(config_path) = cli.config {
                NodeConfig::from_file(&config_path)?
            } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
                NodeConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            } else {
                NodeConfig::default()
            };
            config.apply_env_overrides();

            // Only override when the flag differs from its clap default
            if data_dir != PathBuf::from("./data") {
                config.node.data_dir = data_dir;
            }
            if concurrency != 2 {
                config.worker.concurrency = concurrency;
            }

            info!(
                name = %config.node.name,
                data_dir = ?config.node.data_dir,
                rpc = %config.chain.rpc_url,
                concurrency = config.worker.concurrency,
                "starting axon worker node"
            );

            let node = node::WorkerNode::build(&config).await?;
            let shutdown = node.shutdown;

            // The producer side of the queue belongs to the job-discovery
            // collaborator; keep it alive for the process lifetime.
            let _job_source = node.jobs.clone();

            let worker_handle = tokio::spawn(node.worker.run());
            info!("worker ready, waiting for job descriptors");

            tokio::signal::ctrl_c()
                .await
                .context("cannot listen for shutdown signal")?;
            info!("shutting down gracefully");
            let _ = shutdown.send(true);

            let stats = worker_handle.await.context("worker loop panicked")?;
            info!(
                total = stats.total_jobs,
                confirmed = stats.confirmed,
                failed = stats.failed,
                "worker node stopped"
            );
            Ok(())
        }

        Commands::Init { output } => {
            std::fs::create_dir_all(&output)?;
            let config_path = output.join(DEFAULT_CONFIG_FILE);
            if config_path.exists() {
                warn!(path = ?config_path, "configuration already exists, not overwriting");
                return Ok(());
            }
            NodeConfig::default().save_to_file(&config_path)?;
            info!(path = ?config_path, "configuration written");
            Ok(())
        }

        Commands::Keygen { output } => {
            let wallet = LocalWallet::new(&mut rand::thread_rng());
            let key_hex = hex::encode(wallet.signer().to_bytes());

            info!(address = %wallet.address(), "wallet generated");
            match output {
                Some(path) => {
                    std::fs::write(&path, &key_hex)
                        .with_context(|| format!("cannot write key to {}", path.display()))?;
                    info!(path = ?path, "private key written; keep this file safe");
                }
                None => {
                    // Deliberately the only place a key ever reaches stdout
                    println!("address: {:?}", wallet.address());
                    println!("private_key: {}", key_hex);
                }
            }
            Ok(())
        }
    }
}
