use anyhow::{Context, Result};
use axon_chain::ChainConfig;
use axon_worker::{PipelineConfig, RetryPolicy, WorkerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "axon-config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSettings,
    pub chain: ChainSettings,
    pub ipfs: IpfsSettings,
    pub engine: EngineSettings,
    pub worker: WorkerSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    pub data_dir: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Hex private key; prefer the AXON_PRIVATE_KEY environment variable
    /// over committing it to a config file. Never logged.
    pub private_key: String,
    pub registry_address: String,
    pub chain_id: u64,
    pub gas_margin_percent: u64,
    pub fallback_gas_limit: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsSettings {
    pub gateway_url: String,
    pub api_url: String,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Base URL of the OpenAI-compatible serving runtime
    pub generative_endpoint: String,
    pub generative_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub queue_depth: usize,
    pub shutdown_grace_secs: u64,
    pub execution_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty", "compact" or "json"
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_output: Option<PathBuf>,
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
            module_filters: HashMap::new(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                data_dir: PathBuf::from("./data"),
                name: "axon-worker".to_string(),
            },
            chain: ChainSettings {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                private_key: String::new(),
                registry_address: "0x0000000000000000000000000000000000000000".to_string(),
                chain_id: 31337,
                gas_margin_percent: 20,
                fallback_gas_limit: 500_000,
                receipt_timeout_secs: 120,
                receipt_poll_interval_secs: 2,
            },
            ipfs: IpfsSettings {
                gateway_url: "https://ipfs.io/ipfs".to_string(),
                api_url: "http://127.0.0.1:5001/api/v0".to_string(),
                fetch_timeout_secs: 300,
            },
            engine: EngineSettings {
                generative_endpoint: "http://127.0.0.1:8000".to_string(),
                generative_timeout_secs: 300,
            },
            worker: WorkerSettings {
                concurrency: 2,
                queue_depth: 64,
                shutdown_grace_secs: 30,
                execution_timeout_secs: 300,
                retry_max_attempts: 3,
                retry_backoff_base_ms: 500,
                retry_backoff_max_ms: 30_000,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("cannot write config file {}", path.display()))?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = env::var("AXON_DATA_DIR") {
            self.node.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(name) = env::var("AXON_NODE_NAME") {
            if !name.is_empty() {
                self.node.name = name;
            }
        }

        if let Ok(rpc_url) = env::var("AXON_RPC_URL") {
            self.chain.rpc_url = rpc_url;
        }
        if let Ok(key) = env::var("AXON_PRIVATE_KEY") {
            self.chain.private_key = key;
        }
        if let Ok(registry) = env::var("AXON_REGISTRY_ADDRESS") {
            self.chain.registry_address = registry;
        }
        if let Ok(chain_id) = env::var("AXON_CHAIN_ID") {
            if let Ok(id) = chain_id.parse() {
                self.chain.chain_id = id;
            }
        }

        if let Ok(gateway) = env::var("AXON_IPFS_GATEWAY") {
            self.ipfs.gateway_url = gateway;
        }
        if let Ok(api) = env::var("AXON_IPFS_API") {
            self.ipfs.api_url = api;
        }

        if let Ok(endpoint) = env::var("AXON_GENERATIVE_ENDPOINT") {
            self.engine.generative_endpoint = endpoint;
        }

        if let Ok(concurrency) = env::var("AXON_CONCURRENCY") {
            if let Ok(n) = concurrency.parse() {
                self.worker.concurrency = n;
            }
        }
        if let Ok(depth) = env::var("AXON_QUEUE_DEPTH") {
            if let Ok(n) = depth.parse() {
                self.worker.queue_depth = n;
            }
        }
    }

    /// Fatal-at-startup checks, before any component is built
    pub fn validate(&self) -> Result<()> {
        if self.chain.private_key.trim().is_empty() {
            anyhow::bail!("private key not configured (set AXON_PRIVATE_KEY)");
        }
        self.chain
            .registry_address
            .parse::<ethers::types::Address>()
            .with_context(|| {
                format!(
                    "invalid registry address '{}'",
                    self.chain.registry_address
                )
            })?;
        if self.worker.concurrency == 0 {
            anyhow::bail!("worker concurrency must be at least 1");
        }
        if self.worker.queue_depth == 0 {
            anyhow::bail!("worker queue depth must be at least 1");
        }
        Ok(())
    }

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            rpc_url: self.chain.rpc_url.clone(),
            chain_id: self.chain.chain_id,
            gas_margin_percent: self.chain.gas_margin_percent,
            fallback_gas_limit: self.chain.fallback_gas_limit,
            receipt_timeout: Duration::from_secs(self.chain.receipt_timeout_secs),
            receipt_poll_interval: Duration::from_secs(self.chain.receipt_poll_interval_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.worker.retry_max_attempts,
            backoff_base: Duration::from_millis(self.worker.retry_backoff_base_ms),
            backoff_max: Duration::from_millis(self.worker.retry_backoff_max_ms),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let retry = self.retry_policy();
        PipelineConfig {
            execution_timeout: Duration::from_secs(self.worker.execution_timeout_secs),
            artifact_retry: retry.clone(),
            engine_retry: retry.clone(),
            submit_retry: retry.clone(),
            publish_retry: retry,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker.concurrency,
            queue_depth: self.worker.queue_depth,
            shutdown_grace: Duration::from_secs(self.worker.shutdown_grace_secs),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.node.data_dir.join("artifact-cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        env::set_var("AXON_DATA_DIR", "/test/data");
        env::set_var("AXON_RPC_URL", "http://10.0.0.1:8545");
        env::set_var("AXON_CHAIN_ID", "56");
        env::set_var("AXON_CONCURRENCY", "4");
        env::set_var("AXON_IPFS_GATEWAY", "http://gw.local");

        let mut config = NodeConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.node.data_dir, PathBuf::from("/test/data"));
        assert_eq!(config.chain.rpc_url, "http://10.0.0.1:8545");
        assert_eq!(config.chain.chain_id, 56);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.ipfs.gateway_url, "http://gw.local");

        env::remove_var("AXON_DATA_DIR");
        env::remove_var("AXON_RPC_URL");
        env::remove_var("AXON_CHAIN_ID");
        env::remove_var("AXON_CONCURRENCY");
        env::remove_var("AXON_IPFS_GATEWAY");
    }

    #[test]
    fn test_validate_requires_key() {
        let config = NodeConfig::default();
        assert!(config.validate().is_err());

        let mut with_key = NodeConfig::default();
        with_key.chain.private_key =
            "0000000000000000000000000000000000000000000000000000000000000001".to_string();
        assert!(with_key.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_registry() {
        let mut config = NodeConfig::default();
        config.chain.private_key = "01".repeat(32);
        config.chain.registry_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axon-config.toml");

        let mut config = NodeConfig::default();
        config.worker.concurrency = 3;
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.worker.concurrency, 3);
        assert_eq!(loaded.chain.rpc_url, config.chain.rpc_url);
    }
}
