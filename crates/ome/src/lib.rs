//! The order matching engine.
//!
//! One engine runs per darknode. It turns orderbook changes into prioritized
//! computations (ranker), resolves each computation against its pod by
//! secure multi-party reconstruction (matcher), reaches ledger consensus on
//! matches (confirmer), and reveals and submits confirmed pairs
//! (settler). The [`Ome`] orchestrator wires the stages together with
//! bounded worker loops and a single cancellation signal.
//!
//! Stages communicate over channels and share no state beyond the orderbook
//! and the persistent stores, so a stalled stage never corrupts another.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod computation;
mod confirmer;
mod matcher;
mod ome;
mod ranker;
mod settler;
mod storer;

#[cfg(test)]
mod testutil;

pub use computation::{
    computation_id, Computation, ComputationId, ComputationState, Stage,
};
pub use confirmer::Confirmer;
pub use matcher::{is_match, Matcher, MatchCallback, SmpcMatcher, MATCH_NETWORK_SUFFIX};
pub use ome::{Ome, OmeConfig};
pub use ranker::{DelegateRanker, Ranker};
pub use settler::{SettlementRegistry, Settler, SmpcSettler};
pub use storer::{ComputationStorer, FragmentStorer};

use nocturne_ledger::LedgerError;
use nocturne_orderbook::OrderbookError;
use nocturne_registry::RegistryError;
use nocturne_smpc::SmpcError;

/// Errors produced by the matching engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OmeError {
    #[error("computation not found")]
    ComputationNotFound,

    #[error("order fragment not found")]
    OrderFragmentNotFound,

    /// The order's confirmation has not reached the required block depth.
    /// Transient: the confirmer keeps polling.
    #[error("order not confirmed")]
    OrderNotConfirmed,

    /// The reconstructed plaintext does not hash to the expected order id.
    #[error("reconstructed order does not match its id")]
    ReconstructionMismatch,

    #[error("unknown settlement layer")]
    UnknownSettlement,

    #[error(transparent)]
    Smpc(#[from] SmpcError),

    #[error(transparent)]
    Orderbook(#[from] OrderbookError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("storage error: {0}")]
    Storage(String),
}
