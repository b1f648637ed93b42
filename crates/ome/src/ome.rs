use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nocturne_orderbook::Orderbook;
use nocturne_registry::Epoch;
use nocturne_smpc::{network_id, NetworkId, Smpcer};

use crate::computation::{Computation, ComputationState};
use crate::confirmer::Confirmer;
use crate::matcher::{MatchCallback, Matcher, MATCH_NETWORK_SUFFIX};
use crate::ranker::Ranker;
use crate::settler::Settler;

/// Tuning for the orchestrator's worker loop.
#[derive(Debug, Clone)]
pub struct OmeConfig {
    /// Maximum computations pulled from the ranker per tick.
    pub computation_buffer: usize,
    /// Worker pull cadence.
    pub match_interval: Duration,
}

impl Default for OmeConfig {
    fn default() -> Self {
        Self { computation_buffer: 128, match_interval: Duration::from_millis(50) }
    }
}

/// Wires ranker → matcher → confirmer → settler for one darknode.
///
/// A single coroutine owns the control flow: orderbook changes feed the
/// ranker, epoch transitions rotate the ranker and the pod's SMPC network,
/// a ticker drains ranked computations into the matcher, and the
/// confirmer's output drives the settler. Everything observes one
/// cancellation signal.
pub struct Ome {
    address: Address,
    config: OmeConfig,
    ranker: Arc<dyn Ranker>,
    matcher: Arc<dyn Matcher>,
    confirmer: Arc<Confirmer>,
    settler: Arc<dyn Settler>,
    orderbook: Arc<Orderbook>,
    smpcer: Arc<dyn Smpcer>,
}

impl std::fmt::Debug for Ome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ome").field("address", &self.address).finish_non_exhaustive()
    }
}

impl Ome {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: Address,
        config: OmeConfig,
        ranker: Arc<dyn Ranker>,
        matcher: Arc<dyn Matcher>,
        confirmer: Arc<Confirmer>,
        settler: Arc<dyn Settler>,
        orderbook: Arc<Orderbook>,
        smpcer: Arc<dyn Smpcer>,
    ) -> Self {
        Self { address, config, ranker, matcher, confirmer, settler, orderbook, smpcer }
    }

    /// Runs the engine until the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken, mut epochs: mpsc::UnboundedReceiver<Epoch>) {
        let mut changes = self.orderbook.subscribe();
        let (matched_tx, matched_rx) = mpsc::unbounded_channel();
        let mut accepted =
            Arc::clone(&self.confirmer).confirm(cancel.clone(), matched_rx);

        // The match network of the current and previous epoch stay
        // connected so in-flight reconstructions complete across rollover.
        let mut networks: VecDeque<NetworkId> = VecDeque::new();

        let mut ticker = tokio::time::interval(self.config.match_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(address = %self.address, "ome started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(address = %self.address, "ome stopped");
                    return;
                }

                change = changes.recv() => match change {
                    Some(change) => self.ranker.insert_change(change),
                    None => return,
                },

                epoch = epochs.recv() => match epoch {
                    Some(epoch) => self.on_change_epoch(epoch, &mut networks),
                    None => return,
                },

                _ = ticker.tick() => self.drain_ranker(&matched_tx),

                computation = accepted.recv() => match computation {
                    Some(computation) => self.on_accepted(computation),
                    None => return,
                },
            }
        }
    }

    fn on_change_epoch(&self, epoch: Epoch, networks: &mut VecDeque<NetworkId>) {
        self.ranker.on_change_epoch(epoch.clone());

        match epoch.pod(self.address) {
            Ok(pod) => {
                let network = network_id(epoch.hash, MATCH_NETWORK_SUFFIX);
                self.smpcer.connect(network, pod.darknodes.clone(), pod.quorum());
                networks.push_back(network);
                while networks.len() > 2 {
                    if let Some(stale) = networks.pop_front() {
                        self.smpcer.disconnect(stale);
                    }
                }
                tracing::info!(
                    epoch = %epoch.hash,
                    pod = pod.position,
                    quorum = pod.quorum(),
                    "epoch changed"
                );
            }
            Err(error) => {
                tracing::warn!(epoch = %epoch.hash, %error, "not in any pod this epoch");
            }
        }
    }

    fn drain_ranker(&self, matched: &mpsc::UnboundedSender<Computation>) {
        let mut buffer = vec![
            Computation::new(Default::default(), Default::default(), Default::default(), 0);
            self.config.computation_buffer
        ];
        let count = self.ranker.computations(&mut buffer);
        for computation in buffer.into_iter().take(count) {
            let orderbook = Arc::clone(&self.orderbook);
            let matched = matched.clone();
            let callback: MatchCallback = Box::new(move |computation| {
                if computation.state != ComputationState::Matched {
                    return;
                }
                for order_id in [computation.buy, computation.sell] {
                    // The other side may already be matched by a concurrent
                    // computation; the ledger arbitrates such races.
                    if let Err(error) = orderbook.match_order(order_id) {
                        tracing::debug!(order = %order_id, %error, "orderbook match skipped");
                    }
                }
                let _ = matched.send(computation);
            });
            self.matcher.resolve(computation, callback);
        }
    }

    fn on_accepted(&self, computation: Computation) {
        for order_id in [computation.buy, computation.sell] {
            if let Err(error) = self.orderbook.confirm(order_id) {
                tracing::debug!(order = %order_id, %error, "orderbook confirm skipped");
            }
        }
        if let Err(error) = self.settler.settle(computation) {
            tracing::error!(id = %computation.id, %error, "settlement failed to start");
        }
    }
}
