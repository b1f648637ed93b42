use std::path::Path;

use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

use crate::NodeError;

/// Darknode configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path to the hex-encoded secp256k1 keystore file.
    pub key_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Ledger endpoint. `memory` runs the in-process ledger; anything else
    /// is handed to the chain-binding layer.
    pub endpoint: String,
    /// Minimum pod size the registry enforces.
    #[serde(default = "default_pod_size")]
    pub pod_size: usize,
}

fn default_pod_size() -> usize {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How often the ledger is polled for epoch transitions.
    #[serde(default = "default_epoch_poll_ms")]
    pub epoch_poll_ms: u64,
    /// How often the ledger is polled for order state.
    #[serde(default = "default_sync_poll_ms")]
    pub sync_poll_ms: u64,
    /// How often the confirmer polls for confirmation finality.
    #[serde(default = "default_confirmer_poll_ms")]
    pub confirmer_poll_ms: u64,
    /// Blocks a confirmation must be buried under before acceptance.
    #[serde(default = "default_confirmer_depth")]
    pub confirmer_depth: u64,
    /// Window before an incomplete reconstruction is abandoned.
    #[serde(default = "default_join_ttl_secs")]
    pub join_ttl_secs: u64,
    /// Age at which stored fragments and computations are pruned.
    #[serde(default = "default_store_expiry_secs")]
    pub store_expiry_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            epoch_poll_ms: default_epoch_poll_ms(),
            sync_poll_ms: default_sync_poll_ms(),
            confirmer_poll_ms: default_confirmer_poll_ms(),
            confirmer_depth: default_confirmer_depth(),
            join_ttl_secs: default_join_ttl_secs(),
            store_expiry_secs: default_store_expiry_secs(),
        }
    }
}

fn default_epoch_poll_ms() -> u64 {
    5_000
}

fn default_sync_poll_ms() -> u64 {
    2_000
}

fn default_confirmer_poll_ms() -> u64 {
    4_000
}

fn default_confirmer_depth() -> u64 {
    nocturne_ledger::BLOCKS_FOR_CONFIRMATION
}

fn default_join_ttl_secs() -> u64 {
    60
}

fn default_store_expiry_secs() -> u64 {
    72 * 3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained unary requests per second per client.
    #[serde(default = "default_unary_rate")]
    pub unary_per_sec: f64,
    #[serde(default = "default_unary_burst")]
    pub unary_burst: f64,
    /// Sustained stream opens per second per client.
    #[serde(default = "default_stream_rate")]
    pub stream_per_sec: f64,
    #[serde(default = "default_stream_burst")]
    pub stream_burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            unary_per_sec: default_unary_rate(),
            unary_burst: default_unary_burst(),
            stream_per_sec: default_stream_rate(),
            stream_burst: default_stream_burst(),
        }
    }
}

fn default_unary_rate() -> f64 {
    50.0
}

fn default_unary_burst() -> f64 {
    100.0
}

fn default_stream_rate() -> f64 {
    10.0
}

fn default_stream_burst() -> f64 {
    20.0
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Loads the signing key named by the config: a hex-encoded 32-byte
    /// secret, with or without a 0x prefix.
    pub fn load_signer(&self) -> Result<PrivateKeySigner, NodeError> {
        let content = std::fs::read_to_string(&self.node.key_file)?;
        let hex = content.trim().trim_start_matches("0x");
        let secret: B256 = hex
            .parse()
            .map_err(|e| NodeError::Config(format!("invalid key file: {e}")))?;
        PrivateKeySigner::from_bytes(&secret)
            .map_err(|e| NodeError::Config(format!("invalid secret key: {e}")))
    }
}
