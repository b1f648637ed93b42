use std::collections::HashMap;

use alloy_primitives::Address;
use parking_lot::Mutex;

use nocturne_order::{OrderId, Parity};
use nocturne_orderbook::{Change, Status};
use nocturne_registry::Epoch;

use crate::computation::Computation;
use crate::OmeError;

/// Consumes orderbook changes and produces prioritized computations.
pub trait Ranker: Send + Sync {
    /// Routes a change to the epoch it belongs to (by block number) and
    /// updates the output queue. Any non-open change purges every queued
    /// computation touching that order.
    fn insert_change(&self, change: Change);

    /// Drains up to `buffer.len()` computations in ascending priority order,
    /// removing them from the queue. Returns how many were written.
    fn computations(&self, buffer: &mut [Computation]) -> usize;

    /// Rotates epochs: previous ← current ← new, unless the hash is
    /// unchanged.
    fn on_change_epoch(&self, epoch: Epoch);
}

/// Pairing state for a single epoch.
struct EpochRanker {
    epoch: Epoch,
    number_of_rankers: usize,
    position: usize,
    buys: HashMap<OrderId, u64>,
    sells: HashMap<OrderId, u64>,
    traders: HashMap<OrderId, Address>,
}

impl EpochRanker {
    fn new(number_of_rankers: usize, position: usize, epoch: Epoch) -> Self {
        Self {
            epoch,
            number_of_rankers,
            position,
            buys: HashMap::new(),
            sells: HashMap::new(),
            traders: HashMap::new(),
        }
    }

    fn insert_change(&mut self, change: Change) -> Vec<Computation> {
        if change.status != Status::Open {
            self.buys.remove(&change.order_id);
            self.sells.remove(&change.order_id);
            self.traders.remove(&change.order_id);
            return Vec::new();
        }

        let (own, opposite): (&mut HashMap<OrderId, u64>, &HashMap<OrderId, u64>) =
            match change.parity {
                Parity::Buy => (&mut self.buys, &self.sells),
                Parity::Sell => (&mut self.sells, &self.buys),
            };
        own.insert(change.order_id, change.priority);
        self.traders.insert(change.order_id, change.trader);

        let rank_mod = rank_mod(self.number_of_rankers);
        let mut computations = Vec::with_capacity(opposite.len() / 2 + 1);
        for (other, other_priority) in opposite {
            // Orders from the same trader never match each other.
            if change.trader != Address::ZERO
                && self.traders.get(other) == Some(&change.trader)
            {
                continue;
            }

            // Work partitioning: each combined priority class is owned by
            // the pod positions congruent to it.
            let priority = change.priority + other_priority;
            if priority as usize % rank_mod != self.position % rank_mod {
                continue;
            }

            let (buy, sell) = match change.parity {
                Parity::Buy => (change.order_id, *other),
                Parity::Sell => (*other, change.order_id),
            };
            computations.push(Computation::new(buy, sell, self.epoch.hash, priority));
        }
        computations
    }
}

/// ⌊log₂(pods)⌋, floored at 1 so a single pod still owns every priority.
fn rank_mod(number_of_rankers: usize) -> usize {
    if number_of_rankers <= 1 {
        return 1;
    }
    let log2 = (usize::BITS - 1 - number_of_rankers.leading_zeros()) as usize;
    log2.max(1)
}

struct Inner {
    /// Ascending by (priority, buy, sell).
    computations: Vec<Computation>,
    current: Option<EpochRanker>,
    previous: Option<EpochRanker>,
}

/// Routes changes to the current or previous epoch's ranker by block number
/// and merges their output into one priority queue.
///
/// Keeping two epochs covers rollover: orders discovered just before a
/// transition still complete in the epoch that produced them.
pub struct DelegateRanker {
    address: Address,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for DelegateRanker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateRanker").field("address", &self.address).finish_non_exhaustive()
    }
}

impl DelegateRanker {
    /// Creates a ranker positioned by this darknode's pod in the epoch.
    pub fn new(address: Address, epoch: Epoch) -> Result<Self, OmeError> {
        let (number_of_rankers, position) = position_in_epoch(address, &epoch)?;
        Ok(Self {
            address,
            inner: Mutex::new(Inner {
                computations: Vec::new(),
                current: Some(EpochRanker::new(number_of_rankers, position, epoch)),
                previous: None,
            }),
        })
    }

    fn insert_sorted(queue: &mut Vec<Computation>, computation: Computation) {
        let key = |c: &Computation| (c.priority, c.buy, c.sell);
        let index = queue.partition_point(|c| key(c) <= key(&computation));
        queue.insert(index, computation);
    }
}

fn position_in_epoch(address: Address, epoch: &Epoch) -> Result<(usize, usize), OmeError> {
    let pod = epoch.pod(address)?;
    Ok((epoch.pods.len(), pod.position))
}

impl Ranker for DelegateRanker {
    fn insert_change(&self, change: Change) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut produced = Vec::new();
        if let Some(current) = inner.current.as_mut() {
            if change.block_number >= current.epoch.block_number {
                produced = current.insert_change(change);
            } else if let Some(previous) = inner.previous.as_mut() {
                if change.block_number >= previous.epoch.block_number {
                    produced = previous.insert_change(change);
                }
            }
        }

        if change.status != Status::Open {
            inner.computations.retain(|c| !c.touches(change.order_id));
        }
        for computation in produced {
            Self::insert_sorted(&mut inner.computations, computation);
        }
    }

    fn computations(&self, buffer: &mut [Computation]) -> usize {
        let mut inner = self.inner.lock();
        let count = buffer.len().min(inner.computations.len());
        for (slot, computation) in buffer.iter_mut().zip(inner.computations.drain(..count)) {
            *slot = computation;
        }
        count
    }

    fn on_change_epoch(&self, epoch: Epoch) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(current) = &inner.current {
            if current.epoch.hash == epoch.hash {
                return;
            }
        }
        let (number_of_rankers, position) = match position_in_epoch(self.address, &epoch) {
            Ok(found) => found,
            Err(error) => {
                tracing::error!(%error, "cannot get ranker position from epoch");
                return;
            }
        };
        inner.previous = inner.current.take();
        inner.current = Some(EpochRanker::new(number_of_rankers, position, epoch));
    }
}
