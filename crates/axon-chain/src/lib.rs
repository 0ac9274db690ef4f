//! Chain Client
//!
//! Authenticated access to the on-chain job registry: read calls, signed
//! state-changing submissions with gas estimation and confirmation waiting,
//! and message signing. One instance per process holds the key and
//! serializes nonce acquisition across concurrently completing jobs.

pub mod client;
pub mod error;
pub mod registry;

pub use client::{apply_gas_margin, ChainClient, ChainConfig};
pub use error::{ChainError, Result};
pub use registry::{EthJobRegistry, JobChain};
