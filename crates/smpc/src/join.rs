use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use nocturne_shamir::Share;

/// Upper bound on the number of shares one join may carry. Bounds the memory
/// a peer can pin per join id.
pub const MAX_JOIN_LENGTH: usize = 16;

/// Identifies one reconstruction. All joins of the same id contribute to the
/// same secret tuple.
pub type JoinId = B256;

/// The share values one darknode contributes to one reconstruction.
///
/// The index is the darknode's fragment index; every share in the bundle
/// carries it. All joins of the same id must have the same length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub id: JoinId,
    pub index: u64,
    pub shares: Vec<Share>,
}

impl Join {
    pub fn new(id: JoinId, index: u64, shares: Vec<Share>) -> Self {
        Self { id, index, shares }
    }
}
