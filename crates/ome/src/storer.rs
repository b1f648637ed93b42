use alloy_primitives::B256;

use nocturne_order::{Fragment, OrderId, Parity};

use crate::computation::{Computation, ComputationId};
use crate::OmeError;

/// Persistence for computations. Implemented by the storage crate over the
/// key-value collaborator; the engine only sees this trait.
pub trait ComputationStorer: Send + Sync {
    fn put_computation(&self, computation: Computation) -> Result<(), OmeError>;

    fn computation(&self, id: ComputationId) -> Result<Computation, OmeError>;

    fn delete_computation(&self, id: ComputationId) -> Result<(), OmeError>;
}

/// Persistence for this darknode's order fragments, keyed by the epoch they
/// were received in.
pub trait FragmentStorer: Send + Sync {
    fn put_fragment(&self, epoch_hash: B256, fragment: Fragment) -> Result<(), OmeError>;

    fn fragment(
        &self,
        epoch_hash: B256,
        parity: Parity,
        order_id: OrderId,
    ) -> Result<Fragment, OmeError>;
}
