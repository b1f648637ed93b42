use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nocturne_ledger::{Ledger, LedgerError, LedgerStatus};
use nocturne_order::{OrderId, Parity};

use crate::computation::{computation_id, Computation, ComputationState};
use crate::storer::ComputationStorer;
use crate::OmeError;

#[derive(Default)]
struct Confirming {
    buys: HashSet<OrderId>,
    sells: HashSet<OrderId>,
}

impl Confirming {
    fn set(&mut self, parity: Parity) -> &mut HashSet<OrderId> {
        match parity {
            Parity::Buy => &mut self.buys,
            Parity::Sell => &mut self.sells,
        }
    }
}

/// Reaches ledger consensus on locally matched computations.
///
/// A matched computation is submitted to the ledger, then both orders are
/// watched until their confirmation is buried under the required block
/// depth. Orders that lose a conflicting match on the ledger are purged; the
/// winner is promoted to `Accepted` and emitted exactly once, keyed by the
/// epoch-independent computation id.
pub struct Confirmer {
    storer: Arc<dyn ComputationStorer>,
    ledger: Arc<dyn Ledger>,
    poll_interval: Duration,
    required_depth: u64,
    confirming: Mutex<Confirming>,
}

impl std::fmt::Debug for Confirmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confirmer")
            .field("required_depth", &self.required_depth)
            .finish_non_exhaustive()
    }
}

impl Confirmer {
    pub fn new(
        storer: Arc<dyn ComputationStorer>,
        ledger: Arc<dyn Ledger>,
        poll_interval: Duration,
        required_depth: u64,
    ) -> Self {
        Self {
            storer,
            ledger,
            poll_interval,
            required_depth,
            confirming: Mutex::new(Confirming::default()),
        }
    }

    /// Number of (buy, sell) orders still awaiting finality.
    pub fn pending(&self) -> (usize, usize) {
        let confirming = self.confirming.lock();
        (confirming.buys.len(), confirming.sells.len())
    }

    /// Consumes matched computations and produces accepted ones. Two
    /// background tasks run until cancellation: one submits confirmations,
    /// one polls the ledger for finality.
    pub fn confirm(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut matched: mpsc::UnboundedReceiver<Computation>,
    ) -> mpsc::UnboundedReceiver<Computation> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        let intake = Arc::clone(&self);
        let intake_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = intake_cancel.cancelled() => return,
                    computation = matched.recv() => match computation {
                        Some(computation) => intake.begin_confirmation(computation).await,
                        None => return,
                    },
                }
            }
        });

        let poller = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => poller.poll_once(&accepted_tx).await,
                }
            }
        });

        accepted_rx
    }

    async fn begin_confirmation(&self, computation: Computation) {
        match self.ledger.confirm_order(computation.buy, computation.sell).await {
            // Already confirmed is success: some pod member got there first.
            Ok(()) | Err(LedgerError::AlreadyConfirmed) => {}
            Err(error) => {
                tracing::error!(id = %computation.id, %error, "failed to confirm order pair");
                return;
            }
        }
        if let Err(error) = self.storer.put_computation(computation) {
            tracing::error!(id = %computation.id, %error, "failed to store computation");
            return;
        }
        let mut confirming = self.confirming.lock();
        confirming.buys.insert(computation.buy);
        confirming.sells.insert(computation.sell);
    }

    async fn poll_once(&self, accepted: &mpsc::UnboundedSender<Computation>) {
        for parity in [Parity::Buy, Parity::Sell] {
            let orders: Vec<OrderId> =
                self.confirming.lock().set(parity).iter().copied().collect();
            for order_id in orders {
                match self.check_finality(order_id, parity).await {
                    Ok(Some(computation)) => {
                        if accepted.send(computation).is_ok() {
                            let mut confirming = self.confirming.lock();
                            confirming.buys.remove(&computation.buy);
                            confirming.sells.remove(&computation.sell);
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(order = %order_id, %error, "confirmation check failed");
                    }
                }
            }
        }
    }

    /// Checks one order for confirmation finality. `Ok(None)` means "not
    /// yet" — either the confirmation is too shallow or the order was
    /// purged.
    async fn check_finality(
        &self,
        order_id: OrderId,
        parity: Parity,
    ) -> Result<Option<Computation>, OmeError> {
        let depth = self.ledger.depth(order_id).await?;
        if depth < self.required_depth {
            return Ok(None);
        }

        let status = self.ledger.status(order_id).await?;
        if status != LedgerStatus::Confirmed {
            // The order lost its match on the ledger.
            self.confirming.lock().set(parity).remove(&order_id);
            tracing::debug!(order = %order_id, ?status, "purging unconfirmed order");
            return Ok(None);
        }

        let partner = self.ledger.order_match(order_id).await?;
        let id = match parity {
            Parity::Buy => computation_id(order_id, partner),
            Parity::Sell => computation_id(partner, order_id),
        };
        let computation = match self.storer.computation(id) {
            Ok(computation) => computation,
            Err(OmeError::ComputationNotFound) => {
                // Confirmed against a partner we never matched: another pod
                // won the race with a different pairing.
                self.confirming.lock().set(parity).remove(&order_id);
                tracing::debug!(order = %order_id, partner = %partner, "lost match race");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        if matches!(computation.state, ComputationState::Accepted | ComputationState::Settled) {
            // Re-discovered in a later epoch; already emitted once.
            let mut confirming = self.confirming.lock();
            confirming.buys.remove(&computation.buy);
            confirming.sells.remove(&computation.sell);
            return Ok(None);
        }

        let computation = computation.with_state(ComputationState::Accepted);
        self.storer.put_computation(computation)?;
        Ok(Some(computation))
    }
}
