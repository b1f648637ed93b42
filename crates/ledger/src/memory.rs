use std::collections::HashMap;

use alloy_primitives::{keccak256, Address, Signature, B256};
use async_trait::async_trait;
use parking_lot::RwLock;

use nocturne_order::{Order, OrderId, Settlement};
use nocturne_registry::Epoch;

use crate::{Ledger, LedgerError, LedgerStatus, OrderRecord, RegistryAdmin};

#[derive(Debug, Clone)]
struct OrderEntry {
    status: LedgerStatus,
    priority: u64,
    trader: Address,
    /// Block at which the status last changed.
    status_block: u64,
}

#[derive(Debug, Clone)]
struct DarknodeEntry {
    registered: bool,
    bond: u64,
    approved: u64,
    public_key: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    block_number: u64,
    next_priority: u64,
    orders: HashMap<OrderId, OrderEntry>,
    /// Submission order, for paging.
    sequence: Vec<OrderId>,
    matches: HashMap<OrderId, OrderId>,
    settlements: Vec<(OrderId, OrderId)>,
    darknodes: HashMap<Address, DarknodeEntry>,
    epoch: Option<Epoch>,
    previous_epoch: Option<Epoch>,
    epoch_counter: u64,
}

/// An in-process ledger with explicit block control.
///
/// Blocks only advance when a test (or the demo runtime) calls
/// [`advance_blocks`](MemoryLedger::advance_blocks), which is how finality
/// polling is exercised deterministically.
#[derive(Debug)]
pub struct MemoryLedger {
    pod_size: usize,
    epoch_interval: u64,
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new(pod_size: usize) -> Self {
        Self {
            pod_size,
            epoch_interval: 50,
            inner: RwLock::new(Inner { next_priority: 1, ..Inner::default() }),
        }
    }

    /// Advances the chain head, deepening every prior confirmation.
    pub fn advance_blocks(&self, blocks: u64) {
        self.inner.write().block_number += blocks;
    }

    pub fn block_number(&self) -> u64 {
        self.inner.read().block_number
    }

    /// All settlements submitted so far, deduplicated pairs in submission
    /// order.
    pub fn settlements(&self) -> Vec<(OrderId, OrderId)> {
        self.inner.read().settlements.clone()
    }

    /// Opens an order on behalf of a known trader, bypassing signature
    /// recovery. Test entry point.
    pub fn open_order_as(&self, trader: Address, order_id: OrderId) {
        let mut inner = self.inner.write();
        open_entry(&mut inner, trader, order_id);
    }

    fn build_epoch(&self, inner: &Inner, hash: B256) -> Result<Epoch, LedgerError> {
        let darknodes: Vec<Address> = inner
            .darknodes
            .iter()
            .filter(|(_, entry)| entry.registered)
            .map(|(address, _)| *address)
            .collect();
        Ok(Epoch::new(
            inner.block_number,
            self.epoch_interval,
            hash,
            darknodes,
            self.pod_size,
        )?)
    }
}

fn open_entry(inner: &mut Inner, trader: Address, order_id: OrderId) {
    if inner.orders.contains_key(&order_id) {
        return;
    }
    let priority = inner.next_priority;
    inner.next_priority += 1;
    let block = inner.block_number;
    inner.orders.insert(
        order_id,
        OrderEntry { status: LedgerStatus::Open, priority, trader, status_block: block },
    );
    inner.sequence.push(order_id);
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn open_order(
        &self,
        _settlement: Settlement,
        signature: Vec<u8>,
        order_id: OrderId,
    ) -> Result<(), LedgerError> {
        // The trader is whoever signed the order id.
        let trader = Signature::try_from(signature.as_slice())
            .ok()
            .and_then(|signature| signature.recover_address_from_prehash(&order_id).ok())
            .unwrap_or(Address::ZERO);
        let mut inner = self.inner.write();
        open_entry(&mut inner, trader, order_id);
        Ok(())
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let block = inner.block_number;
        let entry = inner.orders.get_mut(&order_id).ok_or(LedgerError::OrderNotFound)?;
        entry.status = LedgerStatus::Canceled;
        entry.status_block = block;
        Ok(())
    }

    async fn confirm_order(&self, buy: OrderId, sell: OrderId) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        for order_id in [buy, sell] {
            match inner.orders.get(&order_id) {
                None => return Err(LedgerError::OrderNotFound),
                Some(entry) if entry.status == LedgerStatus::Confirmed => {
                    return Err(LedgerError::AlreadyConfirmed);
                }
                Some(_) => {}
            }
        }
        let block = inner.block_number;
        for order_id in [buy, sell] {
            let entry = inner.orders.get_mut(&order_id).expect("checked above");
            entry.status = LedgerStatus::Confirmed;
            entry.status_block = block;
        }
        inner.matches.insert(buy, sell);
        inner.matches.insert(sell, buy);
        Ok(())
    }

    async fn settle(&self, buy: Order, sell: Order) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let pair = (buy.id, sell.id);
        if !inner.settlements.contains(&pair) {
            inner.settlements.push(pair);
        }
        Ok(())
    }

    async fn status(&self, order_id: OrderId) -> Result<LedgerStatus, LedgerError> {
        Ok(self
            .inner
            .read()
            .orders
            .get(&order_id)
            .map(|entry| entry.status)
            .unwrap_or(LedgerStatus::Undefined))
    }

    async fn depth(&self, order_id: OrderId) -> Result<u64, LedgerError> {
        let inner = self.inner.read();
        let entry = inner.orders.get(&order_id).ok_or(LedgerError::OrderNotFound)?;
        Ok(inner.block_number.saturating_sub(entry.status_block))
    }

    async fn priority(&self, order_id: OrderId) -> Result<u64, LedgerError> {
        self.inner
            .read()
            .orders
            .get(&order_id)
            .map(|entry| entry.priority)
            .ok_or(LedgerError::OrderNotFound)
    }

    async fn trader(&self, order_id: OrderId) -> Result<Address, LedgerError> {
        self.inner
            .read()
            .orders
            .get(&order_id)
            .map(|entry| entry.trader)
            .ok_or(LedgerError::OrderNotFound)
    }

    async fn order_match(&self, order_id: OrderId) -> Result<OrderId, LedgerError> {
        self.inner
            .read()
            .matches
            .get(&order_id)
            .copied()
            .ok_or(LedgerError::MatchNotFound)
    }

    async fn orders(&self, offset: usize, limit: usize) -> Result<Vec<OrderRecord>, LedgerError> {
        let inner = self.inner.read();
        Ok(inner
            .sequence
            .iter()
            .skip(offset)
            .take(limit)
            .map(|order_id| {
                let entry = &inner.orders[order_id];
                OrderRecord {
                    order_id: *order_id,
                    status: entry.status,
                    priority: entry.priority,
                    trader: entry.trader,
                }
            })
            .collect())
    }

    async fn epoch(&self) -> Result<Epoch, LedgerError> {
        self.inner
            .read()
            .epoch
            .clone()
            .ok_or_else(|| LedgerError::Rpc("no epoch triggered yet".to_string()))
    }

    async fn previous_epoch(&self) -> Result<Epoch, LedgerError> {
        self.inner
            .read()
            .previous_epoch
            .clone()
            .ok_or_else(|| LedgerError::Rpc("no previous epoch".to_string()))
    }

    async fn darknodes(&self) -> Result<Vec<Address>, LedgerError> {
        let mut darknodes: Vec<Address> = self
            .inner
            .read()
            .darknodes
            .iter()
            .filter(|(_, entry)| entry.registered)
            .map(|(address, _)| *address)
            .collect();
        darknodes.sort();
        Ok(darknodes)
    }

    async fn is_registered(&self, darknode: Address) -> Result<bool, LedgerError> {
        Ok(self
            .inner
            .read()
            .darknodes
            .get(&darknode)
            .map(|entry| entry.registered)
            .unwrap_or(false))
    }

    async fn public_key(&self, darknode: Address) -> Result<Vec<u8>, LedgerError> {
        self.inner
            .read()
            .darknodes
            .get(&darknode)
            .map(|entry| entry.public_key.clone())
            .ok_or(LedgerError::OrderNotFound)
    }
}

#[async_trait]
impl RegistryAdmin for MemoryLedger {
    async fn register(
        &self,
        darknode: Address,
        bond: u64,
        public_key: Vec<u8>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let entry = inner.darknodes.entry(darknode).or_insert(DarknodeEntry {
            registered: false,
            bond: 0,
            approved: 0,
            public_key: Vec::new(),
        });
        if entry.approved < bond {
            return Err(LedgerError::Rpc(format!(
                "insufficient approval: {} < {bond}",
                entry.approved
            )));
        }
        entry.approved -= bond;
        entry.bond += bond;
        entry.registered = true;
        entry.public_key = public_key;
        Ok(())
    }

    async fn deregister(&self, darknode: Address) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let entry = inner
            .darknodes
            .get_mut(&darknode)
            .ok_or(LedgerError::OrderNotFound)?;
        entry.registered = false;
        Ok(())
    }

    async fn approve(&self, darknode: Address, amount: u64) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        inner
            .darknodes
            .entry(darknode)
            .or_insert(DarknodeEntry {
                registered: false,
                bond: 0,
                approved: 0,
                public_key: Vec::new(),
            })
            .approved += amount;
        Ok(())
    }

    async fn refund(&self, darknode: Address) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        let entry = inner
            .darknodes
            .get_mut(&darknode)
            .ok_or(LedgerError::OrderNotFound)?;
        if entry.registered {
            return Err(LedgerError::Rpc("cannot refund a registered darknode".to_string()));
        }
        entry.approved += entry.bond;
        entry.bond = 0;
        Ok(())
    }

    async fn trigger_epoch(&self) -> Result<Epoch, LedgerError> {
        let (hash, epoch) = {
            let mut inner = self.inner.write();
            inner.epoch_counter += 1;
            inner.block_number += 1;
            let mut preimage = [0u8; 8];
            preimage.copy_from_slice(&inner.epoch_counter.to_be_bytes());
            let hash = keccak256(preimage);
            let epoch = self.build_epoch(&inner, hash)?;
            let previous = inner.epoch.take();
            inner.previous_epoch = previous;
            inner.epoch = Some(epoch.clone());
            (hash, epoch)
        };
        tracing::debug!(%hash, darknodes = epoch.darknodes.len(), "memory ledger epoch");
        Ok(epoch)
    }
}
