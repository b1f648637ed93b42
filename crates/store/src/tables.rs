use std::time::{Duration, SystemTime};

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

use nocturne_ome::{Computation, ComputationId, ComputationStorer, FragmentStorer, OmeError};
use nocturne_order::{Fragment, OrderId, Parity};

use crate::{prefix_end, KeyValueStore, StoreError};

const COMPUTATION_PREFIX: &[u8] = b"c:";
const BUY_FRAGMENT_PREFIX: &[u8] = b"fb:";
const SELL_FRAGMENT_PREFIX: &[u8] = b"fs:";

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn storage_error(error: StoreError) -> OmeError {
    OmeError::Storage(error.to_string())
}

/// Storage format for computations: the payload plus the write time so
/// pruning can expire abandoned entries.
#[derive(Debug, Serialize, Deserialize)]
struct ComputationValue {
    timestamp: u64,
    computation: Computation,
}

/// The computations table.
#[derive(Debug)]
pub struct ComputationTable<S> {
    store: S,
    expiry: Duration,
}

impl<S: KeyValueStore> ComputationTable<S> {
    pub fn new(store: S, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    fn key(id: ComputationId) -> Vec<u8> {
        let mut key = COMPUTATION_PREFIX.to_vec();
        key.extend_from_slice(id.as_slice());
        key
    }

    /// All stored computations, in key order.
    pub fn computations(&self) -> Result<Vec<Computation>, StoreError> {
        let iter = self
            .store
            .range(COMPUTATION_PREFIX, &prefix_end(COMPUTATION_PREFIX))?;
        iter.collect_values()
            .into_iter()
            .map(|value| {
                serde_json::from_slice::<ComputationValue>(&value)
                    .map(|value| value.computation)
                    .map_err(|e| StoreError::Codec(e.to_string()))
            })
            .collect()
    }

    /// Deletes entries older than the configured expiry. Returns how many
    /// were removed.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let now = unix_now();
        let mut pruned = 0;
        let mut iter = self
            .store
            .range(COMPUTATION_PREFIX, &prefix_end(COMPUTATION_PREFIX))?;
        while iter.next() {
            let (key, value) = iter.cursor()?;
            let Ok(value) = serde_json::from_slice::<ComputationValue>(value) else {
                continue;
            };
            if value.timestamp + self.expiry.as_secs() <= now {
                self.store.delete(&key.to_vec())?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

impl<S: KeyValueStore> ComputationStorer for ComputationTable<S> {
    fn put_computation(&self, computation: Computation) -> Result<(), OmeError> {
        let value = ComputationValue { timestamp: unix_now(), computation };
        let bytes =
            serde_json::to_vec(&value).map_err(|e| OmeError::Storage(e.to_string()))?;
        self.store
            .put(&Self::key(computation.id), bytes)
            .map_err(storage_error)
    }

    fn computation(&self, id: ComputationId) -> Result<Computation, OmeError> {
        let bytes = self
            .store
            .get(&Self::key(id))
            .map_err(storage_error)?
            .ok_or(OmeError::ComputationNotFound)?;
        serde_json::from_slice::<ComputationValue>(&bytes)
            .map(|value| value.computation)
            .map_err(|e| OmeError::Storage(e.to_string()))
    }

    fn delete_computation(&self, id: ComputationId) -> Result<(), OmeError> {
        self.store.delete(&Self::key(id)).map_err(storage_error)
    }
}

/// Storage format for this darknode's order fragments.
#[derive(Debug, Serialize, Deserialize)]
struct FragmentValue {
    timestamp: u64,
    fragment: Fragment,
}

/// The buy and sell fragment tables, keyed by (epoch hash, order id).
///
/// Fragments are the most sensitive state a darknode holds; the expiry
/// bounds how long a share outlives the epoch that produced it.
#[derive(Debug)]
pub struct FragmentTable<S> {
    store: S,
    expiry: Duration,
}

impl<S: KeyValueStore> FragmentTable<S> {
    pub fn new(store: S, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    fn key(epoch_hash: B256, parity: Parity, order_id: OrderId) -> Vec<u8> {
        let prefix = match parity {
            Parity::Buy => BUY_FRAGMENT_PREFIX,
            Parity::Sell => SELL_FRAGMENT_PREFIX,
        };
        let mut key = prefix.to_vec();
        key.extend_from_slice(epoch_hash.as_slice());
        key.extend_from_slice(order_id.as_slice());
        key
    }

    /// All fragments of one parity stored for one epoch.
    pub fn fragments(
        &self,
        epoch_hash: B256,
        parity: Parity,
    ) -> Result<Vec<Fragment>, StoreError> {
        let prefix = {
            let mut prefix = match parity {
                Parity::Buy => BUY_FRAGMENT_PREFIX.to_vec(),
                Parity::Sell => SELL_FRAGMENT_PREFIX.to_vec(),
            };
            prefix.extend_from_slice(epoch_hash.as_slice());
            prefix
        };
        let iter = self.store.range(&prefix, &prefix_end(&prefix))?;
        iter.collect_values()
            .into_iter()
            .map(|value| {
                serde_json::from_slice::<FragmentValue>(&value)
                    .map(|value| value.fragment)
                    .map_err(|e| StoreError::Codec(e.to_string()))
            })
            .collect()
    }

    /// Deletes fragments of both parities older than the expiry.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let now = unix_now();
        let mut pruned = 0;
        for prefix in [BUY_FRAGMENT_PREFIX, SELL_FRAGMENT_PREFIX] {
            let mut iter = self.store.range(prefix, &prefix_end(prefix))?;
            while iter.next() {
                let (key, value) = iter.cursor()?;
                let Ok(value) = serde_json::from_slice::<FragmentValue>(value) else {
                    continue;
                };
                if value.timestamp + self.expiry.as_secs() <= now {
                    self.store.delete(&key.to_vec())?;
                    pruned += 1;
                }
            }
        }
        Ok(pruned)
    }
}

impl<S: KeyValueStore> FragmentStorer for FragmentTable<S> {
    fn put_fragment(&self, epoch_hash: B256, fragment: Fragment) -> Result<(), OmeError> {
        let key = Self::key(epoch_hash, fragment.parity, fragment.order_id);
        let value = FragmentValue { timestamp: unix_now(), fragment };
        let bytes =
            serde_json::to_vec(&value).map_err(|e| OmeError::Storage(e.to_string()))?;
        self.store.put(&key, bytes).map_err(storage_error)
    }

    fn fragment(
        &self,
        epoch_hash: B256,
        parity: Parity,
        order_id: OrderId,
    ) -> Result<Fragment, OmeError> {
        let bytes = self
            .store
            .get(&Self::key(epoch_hash, parity, order_id))
            .map_err(storage_error)?
            .ok_or(OmeError::OrderFragmentNotFound)?;
        serde_json::from_slice::<FragmentValue>(&bytes)
            .map(|value| value.fragment)
            .map_err(|e| OmeError::Storage(e.to_string()))
    }
}
