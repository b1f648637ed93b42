//! The per-node orderbook.
//!
//! The orderbook tracks what this darknode currently believes about every
//! order it has seen: status, parity, ledger priority, the epoch it was
//! discovered in, and the submitting trader. Every successful transition
//! emits a [`Change`] to all subscribers; the ranker consumes that stream to
//! produce computations. Illegal transitions fail without emitting.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::collections::HashMap;

use alloy_primitives::{Address, B256};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use nocturne_order::{OrderId, Parity};

/// Errors produced by orderbook transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrderbookError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("order not found")]
    OrderNotFound,
}

/// The lifecycle status of an order as seen by this darknode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Nil,
    Open,
    Matched,
    Confirmed,
    Canceled,
    Settled,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Nil => "nil",
            Status::Open => "open",
            Status::Matched => "matched",
            Status::Confirmed => "confirmed",
            Status::Canceled => "canceled",
            Status::Settled => "settled",
        };
        write!(f, "{name}")
    }
}

/// One observed transition of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub order_id: OrderId,
    pub parity: Parity,
    pub status: Status,
    /// Ledger-assigned submission sequence number.
    pub priority: u64,
    /// Block at which this order was observed in its current epoch.
    pub block_number: u64,
    pub trader: Address,
}

#[derive(Debug, Clone)]
struct Entry {
    status: Status,
    parity: Parity,
    priority: u64,
    epoch_hash: B256,
    block_number: u64,
    trader: Address,
}

impl Entry {
    fn change(&self, order_id: OrderId) -> Change {
        Change {
            order_id,
            parity: self.parity,
            status: self.status,
            priority: self.priority,
            block_number: self.block_number,
            trader: self.trader,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<OrderId, Entry>,
    subscribers: Vec<mpsc::UnboundedSender<Change>>,
}

/// Order status view with a change stream.
#[derive(Debug, Default)]
pub struct Orderbook {
    inner: RwLock<Inner>,
}

impl Orderbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future changes. Subscribers that fall away are
    /// pruned on the next emission.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Change> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().subscribers.push(tx);
        rx
    }

    /// Marks an order open in the given epoch.
    ///
    /// Opening is idempotent per (order, epoch): a repeat open in the same
    /// epoch succeeds without emitting. An order that survives into a new
    /// epoch may be re-opened there, which re-announces it to subscribers so
    /// the ranker pairs it under the new epoch.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        order_id: OrderId,
        parity: Parity,
        priority: u64,
        epoch_hash: B256,
        block_number: u64,
        trader: Address,
    ) -> Result<(), OrderbookError> {
        let mut inner = self.inner.write();
        match inner.entries.get_mut(&order_id) {
            None => {}
            Some(entry) if entry.status == Status::Open => {
                if entry.epoch_hash == epoch_hash {
                    return Ok(());
                }
                entry.epoch_hash = epoch_hash;
                entry.block_number = block_number;
                let change = entry.change(order_id);
                Self::emit(&mut inner, change);
                return Ok(());
            }
            Some(entry) => {
                return Err(OrderbookError::InvalidTransition {
                    from: entry.status,
                    to: Status::Open,
                });
            }
        }
        let entry = Entry {
            status: Status::Open,
            parity,
            priority,
            epoch_hash,
            block_number,
            trader,
        };
        let change = entry.change(order_id);
        inner.entries.insert(order_id, entry);
        Self::emit(&mut inner, change);
        Ok(())
    }

    /// Marks an open order as locally matched.
    pub fn match_order(&self, order_id: OrderId) -> Result<(), OrderbookError> {
        self.transition(order_id, Status::Open, Status::Matched)
    }

    /// Marks a matched order as confirmed on the ledger.
    pub fn confirm(&self, order_id: OrderId) -> Result<(), OrderbookError> {
        self.transition(order_id, Status::Matched, Status::Confirmed)
    }

    /// Returns a matched order to the open set (it lost ledger consensus).
    pub fn release(&self, order_id: OrderId) -> Result<(), OrderbookError> {
        self.transition(order_id, Status::Matched, Status::Open)
    }

    /// Cancels an open order.
    pub fn cancel(&self, order_id: OrderId) -> Result<(), OrderbookError> {
        self.transition(order_id, Status::Open, Status::Canceled)
    }

    /// Marks a confirmed order as settled.
    pub fn settle(&self, order_id: OrderId) -> Result<(), OrderbookError> {
        self.transition(order_id, Status::Confirmed, Status::Settled)
    }

    /// Current status of an order.
    pub fn status(&self, order_id: OrderId) -> Result<Status, OrderbookError> {
        self.inner
            .read()
            .entries
            .get(&order_id)
            .map(|entry| entry.status)
            .ok_or(OrderbookError::OrderNotFound)
    }

    /// The epoch an order was last opened under.
    pub fn epoch_hash(&self, order_id: OrderId) -> Result<B256, OrderbookError> {
        self.inner
            .read()
            .entries
            .get(&order_id)
            .map(|entry| entry.epoch_hash)
            .ok_or(OrderbookError::OrderNotFound)
    }

    /// Snapshot of every open order, as changes. Only open orders are ever
    /// handed to the ranker.
    pub fn open_orders(&self) -> Vec<Change> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|(_, entry)| entry.status == Status::Open)
            .map(|(order_id, entry)| entry.change(*order_id))
            .collect()
    }

    fn transition(
        &self,
        order_id: OrderId,
        from: Status,
        to: Status,
    ) -> Result<(), OrderbookError> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(&order_id)
            .ok_or(OrderbookError::OrderNotFound)?;
        if entry.status != from {
            return Err(OrderbookError::InvalidTransition { from: entry.status, to });
        }
        entry.status = to;
        let change = entry.change(order_id);
        Self::emit(&mut inner, change);
        Ok(())
    }

    fn emit(inner: &mut Inner, change: Change) {
        inner.subscribers.retain(|tx| tx.send(change).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> OrderId {
        OrderId::repeat_byte(byte)
    }

    fn open(book: &Orderbook, order_id: OrderId, parity: Parity, priority: u64) {
        book.open(order_id, parity, priority, B256::repeat_byte(1), 100, Address::repeat_byte(9))
            .unwrap();
    }

    #[test]
    fn lifecycle_emits_a_change_per_transition() {
        let book = Orderbook::new();
        let mut changes = book.subscribe();

        open(&book, id(1), Parity::Buy, 7);
        book.match_order(id(1)).unwrap();
        book.confirm(id(1)).unwrap();
        book.settle(id(1)).unwrap();

        let statuses: Vec<Status> = std::iter::from_fn(|| changes.try_recv().ok())
            .map(|change| change.status)
            .collect();
        assert_eq!(
            statuses,
            vec![Status::Open, Status::Matched, Status::Confirmed, Status::Settled]
        );
    }

    #[test]
    fn release_returns_a_matched_order_to_open() {
        let book = Orderbook::new();
        open(&book, id(2), Parity::Sell, 3);
        book.match_order(id(2)).unwrap();
        book.release(id(2)).unwrap();
        assert_eq!(book.status(id(2)).unwrap(), Status::Open);

        // And the released order can be matched again.
        book.match_order(id(2)).unwrap();
    }

    #[test]
    fn illegal_transitions_fail_and_emit_nothing() {
        let book = Orderbook::new();
        let mut changes = book.subscribe();
        open(&book, id(3), Parity::Buy, 1);
        let _ = changes.try_recv();

        assert_eq!(
            book.confirm(id(3)),
            Err(OrderbookError::InvalidTransition { from: Status::Open, to: Status::Confirmed })
        );
        assert_eq!(book.match_order(id(4)), Err(OrderbookError::OrderNotFound));
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn open_is_idempotent_per_epoch() {
        let book = Orderbook::new();
        let mut changes = book.subscribe();
        open(&book, id(5), Parity::Buy, 1);
        let _ = changes.try_recv();

        open(&book, id(5), Parity::Buy, 1);
        assert!(changes.try_recv().is_err(), "repeat open in the same epoch must not emit");

        // A new epoch re-announces the order.
        book.open(id(5), Parity::Buy, 1, B256::repeat_byte(2), 200, Address::repeat_byte(9))
            .unwrap();
        let change = changes.try_recv().unwrap();
        assert_eq!(change.status, Status::Open);
        assert_eq!(change.block_number, 200);
        assert_eq!(book.epoch_hash(id(5)).unwrap(), B256::repeat_byte(2));
    }

    #[test]
    fn open_after_cancel_is_rejected() {
        let book = Orderbook::new();
        open(&book, id(6), Parity::Buy, 1);
        book.cancel(id(6)).unwrap();
        assert_eq!(
            book.open(id(6), Parity::Buy, 1, B256::repeat_byte(1), 100, Address::ZERO),
            Err(OrderbookError::InvalidTransition { from: Status::Canceled, to: Status::Open })
        );
    }

    #[test]
    fn only_open_orders_are_listed() {
        let book = Orderbook::new();
        open(&book, id(7), Parity::Buy, 1);
        open(&book, id(8), Parity::Sell, 2);
        book.match_order(id(8)).unwrap();

        let open_ids: Vec<OrderId> = book.open_orders().iter().map(|c| c.order_id).collect();
        assert_eq!(open_ids, vec![id(7)]);
    }
}
