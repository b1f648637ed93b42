//! The ledger collaborator.
//!
//! The engine never talks to a chain directly; it talks to the [`Ledger`]
//! trait. The write side submits orders, confirmations, and settlements and
//! returns only once the enclosing block is final; the read side exposes the
//! registry, epochs, and per-order state. [`MemoryLedger`] implements both
//! sides in process with adjustable block depth, which is how the confirmer
//! and the CLI are exercised without a chain.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod binder;
mod memory;

pub use binder::{SendTxError, TransactionSender, TxBinder};
pub use memory::MemoryLedger;

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nocturne_order::{Order, OrderId, Settlement};
use nocturne_registry::{Epoch, RegistryError};

/// Number of blocks a transaction must be buried under before the write
/// side treats it as final.
pub const BLOCKS_FOR_CONFIRMATION: u64 = 4;

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("order not found")]
    OrderNotFound,

    /// The order pair is already confirmed. Callers confirming the same
    /// pair treat this as success.
    #[error("order already confirmed")]
    AlreadyConfirmed,

    /// The queried order has no canonical match on the ledger.
    #[error("order match not found")]
    MatchNotFound,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("nonce anomaly was not resolved: {0}")]
    Nonce(String),

    #[error("ledger rpc error: {0}")]
    Rpc(String),
}

/// The on-ledger status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Undefined,
    Open,
    Confirmed,
    Canceled,
}

/// One row of the ledger's order listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub status: LedgerStatus,
    pub priority: u64,
    pub trader: Address,
}

/// The settlement ledger and darknode registry, as one collaborator.
///
/// Write operations return after the block containing the transaction
/// reaches finality ([`BLOCKS_FOR_CONFIRMATION`] confirmations).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Opens an order. Idempotent: re-opening an open order succeeds. The
    /// signature is the trader's signature over the order id.
    async fn open_order(
        &self,
        settlement: Settlement,
        signature: Vec<u8>,
        order_id: OrderId,
    ) -> Result<(), LedgerError>;

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), LedgerError>;

    /// Records a match between a buy and a sell order. The first
    /// confirmation of an order wins; later conflicting confirmations fail
    /// with [`LedgerError::AlreadyConfirmed`].
    async fn confirm_order(&self, buy: OrderId, sell: OrderId) -> Result<(), LedgerError>;

    /// Submits the revealed plaintext pair for settlement. Idempotent.
    async fn settle(&self, buy: Order, sell: Order) -> Result<(), LedgerError>;

    async fn status(&self, order_id: OrderId) -> Result<LedgerStatus, LedgerError>;

    /// Blocks elapsed since the transaction that last changed this order's
    /// status was mined.
    async fn depth(&self, order_id: OrderId) -> Result<u64, LedgerError>;

    /// The ledger-assigned submission sequence number.
    async fn priority(&self, order_id: OrderId) -> Result<u64, LedgerError>;

    /// The trader that opened the order.
    async fn trader(&self, order_id: OrderId) -> Result<Address, LedgerError>;

    /// The canonical counterparty of a confirmed order.
    async fn order_match(&self, order_id: OrderId) -> Result<OrderId, LedgerError>;

    /// Pages through all orders in submission order.
    async fn orders(&self, offset: usize, limit: usize) -> Result<Vec<OrderRecord>, LedgerError>;

    async fn epoch(&self) -> Result<Epoch, LedgerError>;

    async fn previous_epoch(&self) -> Result<Epoch, LedgerError>;

    async fn darknodes(&self) -> Result<Vec<Address>, LedgerError>;

    async fn is_registered(&self, darknode: Address) -> Result<bool, LedgerError>;

    /// The darknode's published encryption/transport key.
    async fn public_key(&self, darknode: Address) -> Result<Vec<u8>, LedgerError>;
}

/// Administrative registry operations used by the CLI.
#[async_trait]
pub trait RegistryAdmin: Send + Sync {
    /// Registers a darknode with its bond and published public key.
    async fn register(
        &self,
        darknode: Address,
        bond: u64,
        public_key: Vec<u8>,
    ) -> Result<(), LedgerError>;

    async fn deregister(&self, darknode: Address) -> Result<(), LedgerError>;

    /// Approves bond tokens for a darknode's registration.
    async fn approve(&self, darknode: Address, amount: u64) -> Result<(), LedgerError>;

    /// Refunds the bond of a deregistered darknode.
    async fn refund(&self, darknode: Address) -> Result<(), LedgerError>;

    /// Triggers an epoch transition.
    async fn trigger_epoch(&self) -> Result<Epoch, LedgerError>;
}
