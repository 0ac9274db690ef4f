//! Signing chain client
//!
//! Owns the account key and the submission lock. Every state-changing
//! transaction from this process goes through one `ChainClient` instance:
//! nonce acquisition, gas pricing, signing and broadcast happen under a
//! single async mutex so concurrent job completions can never reuse or skip
//! a nonce (single-writer discipline). Receipt polling happens outside the
//! lock; only construction and broadcast need serializing.

use crate::error::{classify_rpc_message, ChainError, Result};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Signature, TransactionRequest, H256, U256, U64};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Safety margin applied on top of the gas estimate, in percent
    pub gas_margin_percent: u64,
    /// Used when estimation itself fails
    pub fallback_gas_limit: u64,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 31337,
            gas_margin_percent: 20,
            fallback_gas_limit: 500_000,
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
        }
    }
}

pub struct ChainClient {
    provider: Provider<Http>,
    wallet: LocalWallet,
    config: ChainConfig,
    submission_lock: Mutex<()>,
}

impl ChainClient {
    pub fn new(config: ChainConfig, private_key: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| ChainError::Connection(format!("invalid RPC endpoint: {}", e)))?;

        let wallet = private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ChainError::Signing(format!("invalid private key: {}", e)))?
            .with_chain_id(config.chain_id);

        info!(
            wallet = %wallet.address(),
            chain_id = config.chain_id,
            endpoint = %config.rpc_url,
            "chain client initialized"
        );

        Ok(Self {
            provider,
            wallet,
            config,
            submission_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Read-only contract call
    pub async fn call(&self, target: Address, calldata: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(target)
            .data(calldata)
            .into();
        self.provider
            .call(&tx, None)
            .await
            .map_err(|e| classify_rpc_message(&e.to_string()))
    }

    /// Sign, broadcast and confirm a state-changing transaction
    ///
    /// Returns the transaction hash once the receipt reports success.
    pub async fn submit_transaction(
        &self,
        target: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<H256> {
        let tx_hash = self.broadcast(target, calldata, value).await?;
        self.wait_for_receipt(tx_hash).await?;
        Ok(tx_hash)
    }

    /// Construct, sign and send; serialized under the submission lock
    async fn broadcast(&self, target: Address, calldata: Bytes, value: U256) -> Result<H256> {
        let _guard = self.submission_lock.lock().await;

        let from = self.wallet.address();
        let nonce = self
            .provider
            .get_transaction_count(from, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| classify_rpc_message(&e.to_string()))?;
        let gas_price = self
            .provider
            .get_gas_price()
            .await
            .map_err(|e| classify_rpc_message(&e.to_string()))?;

        let mut tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(target)
            .data(calldata)
            .value(value)
            .nonce(nonce)
            .gas_price(gas_price)
            .chain_id(self.config.chain_id)
            .into();

        let gas_limit = match self.provider.estimate_gas(&tx, None).await {
            Ok(estimate) => apply_gas_margin(estimate, self.config.gas_margin_percent),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = self.config.fallback_gas_limit,
                    "gas estimation failed, using fallback limit"
                );
                U256::from(self.config.fallback_gas_limit)
            }
        };
        tx.set_gas(gas_limit);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| classify_rpc_message(&e.to_string()))?;
        let tx_hash = pending.tx_hash();

        info!(tx_hash = %format!("{:#x}", tx_hash), nonce = %nonce, "transaction broadcast");
        Ok(tx_hash)
    }

    /// Poll for the receipt up to the configured deadline
    pub async fn wait_for_receipt(&self, tx_hash: H256) -> Result<()> {
        let deadline = Instant::now() + self.config.receipt_timeout;
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return if receipt.status == Some(U64::from(1)) {
                        info!(tx_hash = %format!("{:#x}", tx_hash), "transaction confirmed");
                        Ok(())
                    } else {
                        Err(ChainError::Revert(format!(
                            "transaction {:#x} reverted",
                            tx_hash
                        )))
                    };
                }
                Ok(None) => {
                    debug!(tx_hash = %format!("{:#x}", tx_hash), "no receipt yet");
                }
                Err(e) => {
                    // Transient transport failure; the deadline bounds us
                    warn!(error = %e, "receipt poll failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(ChainError::Timeout(format!(
                    "no receipt for {:#x} within {:?}",
                    tx_hash, self.config.receipt_timeout
                )));
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    /// EIP-191 message signature with the held key
    pub async fn sign(&self, message: &[u8]) -> Result<Signature> {
        self.wallet
            .sign_message(message)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))
    }
}

/// Estimate plus the configured safety margin
pub fn apply_gas_margin(estimate: U256, margin_percent: u64) -> U256 {
    estimate * U256::from(100 + margin_percent) / U256::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    fn test_client() -> ChainClient {
        ChainClient::new(ChainConfig::default(), TEST_KEY).unwrap()
    }

    #[test]
    fn test_gas_margin() {
        assert_eq!(
            apply_gas_margin(U256::from(100_000), 20),
            U256::from(120_000)
        );
        assert_eq!(apply_gas_margin(U256::from(0), 20), U256::from(0));
        assert_eq!(apply_gas_margin(U256::from(50), 0), U256::from(50));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let result = ChainClient::new(ChainConfig::default(), "not-a-key");
        assert!(matches!(result, Err(ChainError::Signing(_))));
    }

    #[test]
    fn test_key_prefix_accepted() {
        let with_prefix =
            ChainClient::new(ChainConfig::default(), &format!("0x{}", TEST_KEY)).unwrap();
        assert_eq!(with_prefix.address(), test_client().address());
    }

    #[tokio::test]
    async fn test_sign_message_recoverable() {
        let client = test_client();
        let message = b"axon worker attestation".to_vec();
        let signature = client.sign(&message).await.unwrap();
        let recovered = signature.recover(message).unwrap();
        assert_eq!(recovered, client.address());
    }
}
