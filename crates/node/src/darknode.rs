use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nocturne_ledger::{Ledger, LedgerStatus};
use nocturne_ome::{
    Confirmer, ComputationStorer, DelegateRanker, FragmentStorer, Ome, OmeConfig, OmeError,
    SettlementRegistry, SmpcMatcher, SmpcSettler,
};
use nocturne_order::{Fragment, Parity, Settlement};
use nocturne_orderbook::{Orderbook, Status};
use nocturne_registry::Epoch;
use nocturne_smpc::{Crypter, JoinTransport, SignedEnvelope, SmpcEngine, Smpcer};
use nocturne_store::{ComputationTable, FragmentTable, MemoryStore};

use crate::limiter::{RateLimitClass, RateLimiter};
use crate::{Config, NodeError};

/// A fully wired darknode.
///
/// The transport and the ledger are injected; everything else — crypter,
/// SMPC engine, orderbook, stores, and the matching engine — is assembled
/// here from the configuration.
pub struct Darknode<T: JoinTransport> {
    config: Config,
    crypter: Arc<Crypter>,
    ledger: Arc<dyn Ledger>,
    orderbook: Arc<Orderbook>,
    fragments: Arc<FragmentTable<MemoryStore>>,
    computations: Arc<ComputationTable<MemoryStore>>,
    engine: Arc<SmpcEngine<T>>,
    limiter: Arc<RateLimiter>,
}

impl<T: JoinTransport> std::fmt::Debug for Darknode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Darknode").field("address", &self.address()).finish_non_exhaustive()
    }
}

impl<T: JoinTransport> Darknode<T> {
    pub fn new(
        config: Config,
        signer: PrivateKeySigner,
        ledger: Arc<dyn Ledger>,
        transport: Arc<T>,
    ) -> Self {
        let crypter = Arc::new(Crypter::new(signer));
        let engine = Arc::new(SmpcEngine::new(
            Arc::clone(&crypter),
            transport,
            Duration::from_secs(config.timing.join_ttl_secs),
        ));
        let store_expiry = Duration::from_secs(config.timing.store_expiry_secs);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Self {
            config,
            crypter,
            ledger,
            orderbook: Arc::new(Orderbook::new()),
            fragments: Arc::new(FragmentTable::new(MemoryStore::new(), store_expiry)),
            computations: Arc::new(ComputationTable::new(MemoryStore::new(), store_expiry)),
            engine,
            limiter,
        }
    }

    /// The address this darknode participates as.
    pub fn address(&self) -> Address {
        self.crypter.address()
    }

    pub fn orderbook(&self) -> Arc<Orderbook> {
        Arc::clone(&self.orderbook)
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// RPC entry point: stores one order fragment delivered by a trader's
    /// gateway. Charged against the client's unary budget.
    pub fn receive_fragment(
        &self,
        client: Address,
        epoch_hash: B256,
        fragment: Fragment,
    ) -> Result<(), NodeError> {
        self.limiter.allow(RateLimitClass::Unary, client)?;
        tracing::debug!(order = %fragment.order_id, index = fragment.index, "received fragment");
        self.fragments.put_fragment(epoch_hash, fragment)?;
        Ok(())
    }

    /// Runs the darknode until cancellation: consumes inbound SMPC
    /// envelopes, waits for an epoch that includes this darknode, then
    /// drives the matching engine alongside the epoch, sync, and prune
    /// loops.
    pub async fn run(
        self,
        cancel: CancellationToken,
        inbound: mpsc::UnboundedReceiver<SignedEnvelope>,
    ) -> Result<(), NodeError> {
        tokio::spawn(Arc::clone(&self.engine).run(inbound, cancel.clone()));

        let Some(mut epoch) = self.await_first_epoch(&cancel).await else {
            return Ok(());
        };
        self.crypter.update_registered(epoch.darknodes.iter().copied());
        tracing::info!(address = %self.address(), epoch = %epoch.hash, "joining epoch");

        let ranker = Arc::new(DelegateRanker::new(self.address(), epoch.clone())?);
        let matcher = Arc::new(SmpcMatcher::new(
            Arc::clone(&self.engine) as Arc<dyn Smpcer>,
            Arc::clone(&self.fragments) as Arc<dyn FragmentStorer>,
        ));
        let confirmer = Arc::new(Confirmer::new(
            Arc::clone(&self.computations) as Arc<dyn ComputationStorer>,
            Arc::clone(&self.ledger),
            Duration::from_millis(self.config.timing.confirmer_poll_ms),
            self.config.timing.confirmer_depth,
        ));
        let settlements = Arc::new(SettlementRegistry::new());
        settlements.register(Settlement::Spot, Arc::clone(&self.ledger));
        settlements.register(Settlement::Atomic, Arc::clone(&self.ledger));
        let settler = Arc::new(SmpcSettler::new(
            Arc::clone(&self.engine) as Arc<dyn Smpcer>,
            Arc::clone(&self.fragments) as Arc<dyn FragmentStorer>,
            settlements,
            Arc::clone(&self.orderbook),
        ));

        let ome = Ome::new(
            self.address(),
            OmeConfig::default(),
            ranker,
            matcher,
            confirmer,
            settler,
            Arc::clone(&self.orderbook),
            Arc::clone(&self.engine) as Arc<dyn Smpcer>,
        );
        let (epoch_tx, epoch_rx) = mpsc::unbounded_channel();
        tokio::spawn(ome.run(cancel.clone(), epoch_rx));
        let _ = epoch_tx.send(epoch.clone());

        let mut epoch_tick =
            tokio::time::interval(Duration::from_millis(self.config.timing.epoch_poll_ms));
        let mut sync_tick =
            tokio::time::interval(Duration::from_millis(self.config.timing.sync_poll_ms));
        let prune_every =
            Duration::from_secs((self.config.timing.store_expiry_secs / 4).max(1));
        let mut prune_tick = tokio::time::interval(prune_every);
        for tick in [&mut epoch_tick, &mut sync_tick, &mut prune_tick] {
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(address = %self.address(), "darknode stopped");
                    return Ok(());
                }

                _ = epoch_tick.tick() => {
                    match self.ledger.epoch().await {
                        Ok(next) if next.hash != epoch.hash => {
                            self.crypter.update_registered(next.darknodes.iter().copied());
                            let _ = epoch_tx.send(next.clone());
                            epoch = next;
                        }
                        Ok(_) => {}
                        Err(error) => tracing::warn!(%error, "failed to poll epoch"),
                    }
                }

                _ = sync_tick.tick() => {
                    if let Err(error) = self.sync_orderbook(&epoch).await {
                        tracing::warn!(%error, "orderbook sync failed");
                    }
                }

                _ = prune_tick.tick() => self.prune_stores(),
            }
        }
    }

    async fn await_first_epoch(&self, cancel: &CancellationToken) -> Option<Epoch> {
        let poll = Duration::from_millis(self.config.timing.epoch_poll_ms);
        loop {
            if let Ok(epoch) = self.ledger.epoch().await {
                if epoch.pod(self.address()).is_ok() {
                    return Some(epoch);
                }
                tracing::debug!(epoch = %epoch.hash, "registered but not yet in a pod");
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Reconciles the ledger's order state into the local orderbook. Only
    /// orders this darknode holds a fragment of are opened; everything else
    /// is invisible to the matcher anyway.
    async fn sync_orderbook(&self, epoch: &Epoch) -> Result<(), NodeError> {
        let records = self.ledger.orders(0, SYNC_PAGE_LIMIT).await?;
        for record in records {
            match record.status {
                LedgerStatus::Open => {
                    for parity in [Parity::Buy, Parity::Sell] {
                        match self.fragments.fragment(epoch.hash, parity, record.order_id) {
                            Ok(_) => {}
                            Err(OmeError::OrderFragmentNotFound) => continue,
                            Err(error) => return Err(error.into()),
                        }
                        let result = self.orderbook.open(
                            record.order_id,
                            parity,
                            record.priority,
                            epoch.hash,
                            epoch.block_number,
                            record.trader,
                        );
                        if let Err(error) = result {
                            tracing::trace!(order = %record.order_id, %error, "open skipped");
                        }
                    }
                }
                LedgerStatus::Canceled => {
                    if self.orderbook.status(record.order_id) == Ok(Status::Open) {
                        if let Err(error) = self.orderbook.cancel(record.order_id) {
                            tracing::trace!(order = %record.order_id, %error, "cancel skipped");
                        }
                    }
                }
                LedgerStatus::Confirmed => {
                    // Another pod matched it; take it out of ranking.
                    if self.orderbook.status(record.order_id) == Ok(Status::Open) {
                        let _ = self.orderbook.match_order(record.order_id);
                        let _ = self.orderbook.confirm(record.order_id);
                    }
                }
                LedgerStatus::Undefined => {}
            }
        }
        Ok(())
    }

    fn prune_stores(&self) {
        match self.fragments.prune() {
            Ok(pruned) if pruned > 0 => tracing::info!(pruned, "pruned expired fragments"),
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "fragment pruning failed"),
        }
        match self.computations.prune() {
            Ok(pruned) if pruned > 0 => tracing::info!(pruned, "pruned expired computations"),
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "computation pruning failed"),
        }
    }
}

const SYNC_PAGE_LIMIT: usize = 1024;
