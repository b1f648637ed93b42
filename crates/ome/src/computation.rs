use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};

use nocturne_order::OrderId;
use nocturne_smpc::JoinId;

/// Identifies a (buy, sell) pairing: keccak256 of the two order ids,
/// buy first. Stable across epochs, which is what makes confirmation
/// at-most-once even when a match is re-discovered after a rollover.
pub type ComputationId = B256;

/// Derives the canonical computation id for a pairing.
pub fn computation_id(buy: OrderId, sell: OrderId) -> ComputationId {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(buy.as_slice());
    preimage[32..].copy_from_slice(sell.as_slice());
    keccak256(preimage)
}

/// The reconstruction stages a computation passes through. The stage byte
/// replaces the final byte of the computation id to key each stage's join
/// separately in the joiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Match = 1,
    SettleBuy = 2,
    SettleSell = 3,
}

impl Stage {
    /// The join id for this stage of the given computation.
    pub fn join_id(self, computation_id: ComputationId) -> JoinId {
        let mut id = computation_id;
        id.0[31] = self as u8;
        id
    }
}

/// Lifecycle of a computation at one darknode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputationState {
    Nil,
    Matched,
    Mismatched,
    Accepted,
    Settled,
}

/// A candidate pairing of one buy order and one sell order within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computation {
    pub id: ComputationId,
    pub buy: OrderId,
    pub sell: OrderId,
    pub epoch_hash: B256,
    /// Sum of the two orders' ledger priorities.
    pub priority: u64,
    pub state: ComputationState,
    /// Unix seconds at the last state change.
    pub timestamp: u64,
}

impl Computation {
    pub fn new(buy: OrderId, sell: OrderId, epoch_hash: B256, priority: u64) -> Self {
        Self {
            id: computation_id(buy, sell),
            buy,
            sell,
            epoch_hash,
            priority,
            state: ComputationState::Nil,
            timestamp: unix_now(),
        }
    }

    /// Transitions the state, refreshing the timestamp.
    pub fn with_state(mut self, state: ComputationState) -> Self {
        self.state = state;
        self.timestamp = unix_now();
        self
    }

    /// Whether the computation references the given order on either side.
    pub fn touches(&self, order_id: OrderId) -> bool {
        self.buy == order_id || self.sell == order_id
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
