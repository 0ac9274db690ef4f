//! Job registry bindings
//!
//! Minimal ABI surface of the on-chain job registry, behind the `JobChain`
//! trait so the pipeline can be exercised against in-memory doubles.

use crate::client::ChainClient;
use crate::error::{ChainError, Result};
use async_trait::async_trait;
use ethers::abi::parse_abi;
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tracing::info;

/// What the pipeline needs from the chain
#[async_trait]
pub trait JobChain: Send + Sync {
    async fn available_jobs(&self) -> Result<Vec<u64>>;

    /// Claim a posted job; confirms before returning the tx hash
    async fn accept_job(&self, job_id: u64) -> Result<String>;

    /// Commit a result hash and artifact reference for a job
    async fn submit_result(
        &self,
        job_id: u64,
        result_hash: [u8; 32],
        artifact_ref: &str,
    ) -> Result<String>;

    /// Idempotence probe: whether the registry already holds a result for
    /// the job. Checked after an ambiguous submission timeout so the same
    /// job is never committed twice.
    async fn job_has_result(&self, job_id: u64) -> Result<bool>;
}

pub struct EthJobRegistry {
    client: Arc<ChainClient>,
    contract: BaseContract,
    address: Address,
}

impl EthJobRegistry {
    pub fn new(client: Arc<ChainClient>, address: Address) -> Result<Self> {
        let abi = parse_abi(&[
            "function getAvailableJobs() view returns (uint256[])",
            "function acceptJob(uint256 jobId)",
            "function submitResult(uint256 jobId, bytes32 resultHash, bytes resultRef)",
            "function jobHasResult(uint256 jobId) view returns (bool)",
        ])
        .map_err(|e| ChainError::Abi(e.to_string()))?;

        Ok(Self {
            client,
            contract: BaseContract::from(abi),
            address,
        })
    }
}

#[async_trait]
impl JobChain for EthJobRegistry {
    async fn available_jobs(&self) -> Result<Vec<u64>> {
        let calldata = self
            .contract
            .encode("getAvailableJobs", ())
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let raw = self.client.call(self.address, calldata).await?;
        let jobs: Vec<U256> = self
            .contract
            .decode_output("getAvailableJobs", raw)
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        Ok(jobs.into_iter().map(|id| id.as_u64()).collect())
    }

    async fn accept_job(&self, job_id: u64) -> Result<String> {
        let calldata = self
            .contract
            .encode("acceptJob", U256::from(job_id))
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let tx_hash = self
            .client
            .submit_transaction(self.address, calldata, U256::zero())
            .await?;
        info!(job_id, tx_hash = %format!("{:#x}", tx_hash), "job accepted on-chain");
        Ok(format!("{:#x}", tx_hash))
    }

    async fn submit_result(
        &self,
        job_id: u64,
        result_hash: [u8; 32],
        artifact_ref: &str,
    ) -> Result<String> {
        let calldata = self
            .contract
            .encode(
                "submitResult",
                (
                    U256::from(job_id),
                    result_hash,
                    Bytes::from(artifact_ref.as_bytes().to_vec()),
                ),
            )
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let tx_hash = self
            .client
            .submit_transaction(self.address, calldata, U256::zero())
            .await?;
        info!(
            job_id,
            result_hash = %format!("0x{}", hex::encode(result_hash)),
            tx_hash = %format!("{:#x}", tx_hash),
            "result submitted on-chain"
        );
        Ok(format!("{:#x}", tx_hash))
    }

    async fn job_has_result(&self, job_id: u64) -> Result<bool> {
        let calldata = self
            .contract
            .encode("jobHasResult", U256::from(job_id))
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let raw = self.client.call(self.address, calldata).await?;
        self.contract
            .decode_output("jobHasResult", raw)
            .map_err(|e| ChainError::Abi(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::Token;

    fn registry() -> EthJobRegistry {
        let client = Arc::new(
            ChainClient::new(
                crate::client::ChainConfig::default(),
                "0000000000000000000000000000000000000000000000000000000000000001",
            )
            .unwrap(),
        );
        EthJobRegistry::new(client, Address::zero()).unwrap()
    }

    #[test]
    fn test_submit_result_encoding_round_trip() {
        let reg = registry();
        let hash = [7u8; 32];
        let calldata = reg
            .contract
            .encode(
                "submitResult",
                (
                    U256::from(42u64),
                    hash,
                    Bytes::from(b"ipfs://QmResult".to_vec()),
                ),
            )
            .unwrap();

        let (job_id, decoded_hash, decoded_ref): (U256, [u8; 32], Bytes) =
            reg.contract.decode("submitResult", calldata).unwrap();
        assert_eq!(job_id, U256::from(42u64));
        assert_eq!(decoded_hash, hash);
        assert_eq!(decoded_ref.as_ref(), b"ipfs://QmResult");
    }

    #[test]
    fn test_available_jobs_output_decoding() {
        let reg = registry();
        let raw = ethers::abi::encode(&[Token::Array(vec![
            Token::Uint(U256::from(3u64)),
            Token::Uint(U256::from(9u64)),
        ])]);
        let jobs: Vec<U256> = reg
            .contract
            .decode_output("getAvailableJobs", raw)
            .unwrap();
        assert_eq!(jobs, vec![U256::from(3u64), U256::from(9u64)]);
    }

    #[test]
    fn test_has_result_output_decoding() {
        let reg = registry();
        let raw = ethers::abi::encode(&[Token::Bool(true)]);
        let has: bool = reg.contract.decode_output("jobHasResult", raw).unwrap();
        assert!(has);
    }
}
