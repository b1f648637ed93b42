//! In-memory collaborators for unit tests.

use std::collections::HashMap;

use alloy_primitives::B256;
use parking_lot::Mutex;

use nocturne_order::{Fragment, OrderId, Parity};
use nocturne_smpc::{Join, JoinCallback, JoinId, NetworkId, SmpcError, Smpcer};

use crate::computation::{Computation, ComputationId};
use crate::storer::{ComputationStorer, FragmentStorer};
use crate::OmeError;

#[derive(Default)]
pub(crate) struct MemoryComputations {
    computations: Mutex<HashMap<ComputationId, Computation>>,
}

impl ComputationStorer for MemoryComputations {
    fn put_computation(&self, computation: Computation) -> Result<(), OmeError> {
        self.computations.lock().insert(computation.id, computation);
        Ok(())
    }

    fn computation(&self, id: ComputationId) -> Result<Computation, OmeError> {
        self.computations
            .lock()
            .get(&id)
            .copied()
            .ok_or(OmeError::ComputationNotFound)
    }

    fn delete_computation(&self, id: ComputationId) -> Result<(), OmeError> {
        self.computations.lock().remove(&id);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryFragments {
    fragments: Mutex<HashMap<(B256, Parity, OrderId), Fragment>>,
}

impl FragmentStorer for MemoryFragments {
    fn put_fragment(&self, epoch_hash: B256, fragment: Fragment) -> Result<(), OmeError> {
        self.fragments
            .lock()
            .insert((epoch_hash, fragment.parity, fragment.order_id), fragment);
        Ok(())
    }

    fn fragment(
        &self,
        epoch_hash: B256,
        parity: Parity,
        order_id: OrderId,
    ) -> Result<Fragment, OmeError> {
        self.fragments
            .lock()
            .get(&(epoch_hash, parity, order_id))
            .cloned()
            .ok_or(OmeError::OrderFragmentNotFound)
    }
}

/// A local-only smpcer: joins resolve immediately against preloaded values,
/// as if the whole pod had already contributed.
#[derive(Default)]
pub(crate) struct InstantSmpcer {
    values: Mutex<HashMap<JoinId, Vec<u64>>>,
}

impl InstantSmpcer {
    pub(crate) fn preload(&self, join_id: JoinId, values: Vec<u64>) {
        self.values.lock().insert(join_id, values);
    }
}

impl Smpcer for InstantSmpcer {
    fn connect(&self, _network_id: NetworkId, _peers: Vec<alloy_primitives::Address>, _k: usize) {}

    fn disconnect(&self, _network_id: NetworkId) {}

    fn join(
        &self,
        _network_id: NetworkId,
        join: Join,
        callback: JoinCallback,
    ) -> Result<(), SmpcError> {
        if let Some(values) = self.values.lock().get(&join.id).cloned() {
            callback(join.id, &values);
        }
        Ok(())
    }
}
