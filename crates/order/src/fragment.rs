use serde::{Deserialize, Serialize};

use nocturne_shamir::Share;

use crate::order::{OrderId, OrderType, Parity, Settlement};

/// Shares of both halves of a CoExp value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoExpShare {
    pub co: Share,
    pub exp: Share,
}

impl CoExpShare {
    /// Pointwise subtraction of both halves.
    pub fn sub(&self, other: &CoExpShare) -> CoExpShare {
        CoExpShare {
            co: self.co.sub(&other.co),
            exp: self.exp.sub(&other.exp),
        }
    }
}

/// One share of one order, destined for one darknode.
///
/// Public fields are identical across all fragments of an order; the share
/// fields all carry this fragment's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub order_id: OrderId,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub parity: Parity,
    pub settlement: Settlement,
    pub expiry: u64,
    pub index: u64,

    pub tokens: Share,
    pub price: CoExpShare,
    pub volume: CoExpShare,
    pub minimum_volume: CoExpShare,
    pub nonce: Share,
}

impl Fragment {
    /// The eight scalar shares in settlement order: tokens, price, volume,
    /// minimum volume (co then exp each), nonce.
    pub fn scalar_shares(&self) -> [Share; 8] {
        [
            self.tokens,
            self.price.co,
            self.price.exp,
            self.volume.co,
            self.volume.exp,
            self.minimum_volume.co,
            self.minimum_volume.exp,
            self.nonce,
        ]
    }
}
