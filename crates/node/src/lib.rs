//! Darknode assembly.
//!
//! This crate wires the collaborators into a running darknode: it loads the
//! TOML configuration and keystore, polls the ledger for epoch transitions
//! and order state, stores inbound order fragments, rate-limits inbound
//! RPC, and drives the matching engine until shutdown.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod config;
mod darknode;
mod limiter;

pub use config::{Config, LedgerConfig, NodeConfig, RateLimitConfig, TimingConfig};
pub use darknode::Darknode;
pub use limiter::{RateLimitClass, RateLimiter};

use nocturne_ledger::LedgerError;
use nocturne_ome::OmeError;

/// Errors produced while assembling or running a darknode.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// An inbound request exceeded its client's rate budget.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Ome(#[from] OmeError),
}
