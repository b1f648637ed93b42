use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use nocturne_order::{
    price_from_co_exp, volume_from_co_exp, Fragment, Order, Settlement, TokenPair,
};
use nocturne_orderbook::Orderbook;
use nocturne_ledger::Ledger;
use nocturne_smpc::{network_id, Join, Smpcer};

use crate::computation::{Computation, Stage};
use crate::matcher::MATCH_NETWORK_SUFFIX;
use crate::storer::FragmentStorer;
use crate::OmeError;

/// Maps a settlement layer tag to the ledger that clears it.
///
/// Orders carry their settlement tag; the settler dispatches the revealed
/// pair to the registered handler. Unknown tags fail settlement.
#[derive(Default)]
pub struct SettlementRegistry {
    handlers: RwLock<HashMap<Settlement, Arc<dyn Ledger>>>,
}

impl std::fmt::Debug for SettlementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementRegistry").finish_non_exhaustive()
    }
}

impl SettlementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, settlement: Settlement, ledger: Arc<dyn Ledger>) {
        self.handlers.write().insert(settlement, ledger);
    }

    pub fn handler(&self, settlement: Settlement) -> Option<Arc<dyn Ledger>> {
        self.handlers.read().get(&settlement).cloned()
    }
}

/// Settles accepted computations.
pub trait Settler: Send + Sync {
    /// Starts settlement of an accepted computation: reveal both orders to
    /// this darknode's pod and submit the plaintext pair.
    fn settle(&self, computation: Computation) -> Result<(), OmeError>;
}

#[derive(Default)]
struct PendingReveal {
    buy: Option<Vec<u64>>,
    sell: Option<Vec<u64>>,
}

/// The SMPC-backed settler.
///
/// For an accepted computation it contributes two joins — the buy
/// fragment's eight scalar shares and the sell fragment's — to the pod.
/// Once both reconstruct, the full plaintext of both orders is known to
/// this darknode, which submits them to the settlement handler and marks
/// them settled in the orderbook.
pub struct SmpcSettler {
    smpcer: Arc<dyn Smpcer>,
    fragments: Arc<dyn FragmentStorer>,
    settlements: Arc<SettlementRegistry>,
    orderbook: Arc<Orderbook>,
}

impl std::fmt::Debug for SmpcSettler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmpcSettler").finish_non_exhaustive()
    }
}

impl SmpcSettler {
    pub fn new(
        smpcer: Arc<dyn Smpcer>,
        fragments: Arc<dyn FragmentStorer>,
        settlements: Arc<SettlementRegistry>,
        orderbook: Arc<Orderbook>,
    ) -> Self {
        Self { smpcer, fragments, settlements, orderbook }
    }

    fn join_side(
        &self,
        computation: Computation,
        stage: Stage,
        pending: Arc<Mutex<PendingReveal>>,
        buy_fragment: Fragment,
        sell_fragment: Fragment,
    ) -> Result<(), OmeError> {
        let own = match stage {
            Stage::SettleBuy => &buy_fragment,
            Stage::SettleSell => &sell_fragment,
            Stage::Match => unreachable!("settler joins only settle stages"),
        };
        let join = Join::new(
            stage.join_id(computation.id),
            own.index,
            own.scalar_shares().to_vec(),
        );
        let settlements = Arc::clone(&self.settlements);
        let orderbook = Arc::clone(&self.orderbook);
        self.smpcer.join(
            network_id(computation.epoch_hash, MATCH_NETWORK_SUFFIX),
            join,
            Box::new(move |_, values| {
                let both = {
                    let mut pending = pending.lock();
                    match stage {
                        Stage::SettleBuy => pending.buy = Some(values.to_vec()),
                        Stage::SettleSell => pending.sell = Some(values.to_vec()),
                        Stage::Match => unreachable!("settler joins only settle stages"),
                    }
                    match (&pending.buy, &pending.sell) {
                        (Some(buy), Some(sell)) => Some((buy.clone(), sell.clone())),
                        _ => None,
                    }
                };
                if let Some((buy_values, sell_values)) = both {
                    finish_settlement(
                        computation,
                        &buy_fragment,
                        &sell_fragment,
                        &buy_values,
                        &sell_values,
                        settlements,
                        orderbook,
                    );
                }
            }),
        )?;
        Ok(())
    }
}

impl Settler for SmpcSettler {
    fn settle(&self, computation: Computation) -> Result<(), OmeError> {
        let buy =
            self.fragments
                .fragment(computation.epoch_hash, nocturne_order::Parity::Buy, computation.buy)?;
        let sell = self.fragments.fragment(
            computation.epoch_hash,
            nocturne_order::Parity::Sell,
            computation.sell,
        )?;

        let pending = Arc::new(Mutex::new(PendingReveal::default()));
        self.join_side(
            computation,
            Stage::SettleBuy,
            Arc::clone(&pending),
            buy.clone(),
            sell.clone(),
        )?;
        self.join_side(computation, Stage::SettleSell, pending, buy, sell)?;
        Ok(())
    }
}

/// Both sides are revealed: rebuild the orders, dispatch to the settlement
/// handler, and mark them settled.
fn finish_settlement(
    computation: Computation,
    buy_fragment: &Fragment,
    sell_fragment: &Fragment,
    buy_values: &[u64],
    sell_values: &[u64],
    settlements: Arc<SettlementRegistry>,
    orderbook: Arc<Orderbook>,
) {
    let buy = match order_from_reveal(buy_fragment, buy_values) {
        Ok(order) => order,
        Err(error) => {
            tracing::error!(id = %computation.id, %error, "buy reveal failed");
            return;
        }
    };
    let sell = match order_from_reveal(sell_fragment, sell_values) {
        Ok(order) => order,
        Err(error) => {
            tracing::error!(id = %computation.id, %error, "sell reveal failed");
            return;
        }
    };

    let Some(handler) = settlements.handler(buy.settlement) else {
        tracing::error!(id = %computation.id, settlement = %buy.settlement, "no settlement handler");
        return;
    };

    tokio::spawn(async move {
        if let Err(error) = handler.settle(buy.clone(), sell.clone()).await {
            tracing::error!(id = %computation.id, %error, "settlement submission failed");
            return;
        }
        for order_id in [buy.id, sell.id] {
            if let Err(error) = orderbook.settle(order_id) {
                tracing::warn!(order = %order_id, %error, "orderbook settle failed");
            }
        }
        tracing::info!(id = %computation.id, buy = %buy.id, sell = %sell.id, "settled order pair");
    });
}

/// Rebuilds an order from a fragment's public fields and the reconstructed
/// scalar values, and checks that it hashes back to the expected id.
fn order_from_reveal(fragment: &Fragment, values: &[u64]) -> Result<Order, OmeError> {
    if values.len() != 8 {
        return Err(OmeError::ReconstructionMismatch);
    }
    let order = Order::new(
        fragment.parity,
        fragment.order_type,
        fragment.expiry,
        fragment.settlement,
        TokenPair(values[0]),
        price_from_co_exp(values[1], values[2]),
        volume_from_co_exp(values[3], values[4]),
        volume_from_co_exp(values[5], values[6]),
        values[7],
    );
    if order.id != fragment.order_id {
        return Err(OmeError::ReconstructionMismatch);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{InstantSmpcer, MemoryFragments};
    use alloy_primitives::{Address, B256};
    use nocturne_ledger::MemoryLedger;
    use nocturne_order::{OrderType, Parity};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn order(parity: Parity, nonce: u64) -> Order {
        Order::new(
            parity,
            OrderType::Limit,
            1_700_000_000,
            Settlement::Spot,
            TokenPair::ETH_REN,
            100,
            10,
            1,
            nonce,
        )
    }

    fn reveal_values(order: &Order) -> Vec<u64> {
        let price = nocturne_order::price_to_co_exp(order.price);
        let volume = nocturne_order::volume_to_co_exp(order.volume);
        let minimum = nocturne_order::volume_to_co_exp(order.minimum_volume);
        vec![
            order.tokens.0,
            price.co,
            price.exp,
            volume.co,
            volume.exp,
            minimum.co,
            minimum.exp,
            order.nonce,
        ]
    }

    #[tokio::test]
    async fn settlement_reveals_and_submits_the_pair() {
        let mut rng = StdRng::seed_from_u64(21);
        let buy = order(Parity::Buy, 100);
        let sell = order(Parity::Sell, 200);
        let epoch_hash = B256::repeat_byte(1);

        let fragments = Arc::new(MemoryFragments::default());
        let buy_fragment = buy.split(6, 4, &mut rng).unwrap().remove(0);
        let sell_fragment = sell.split(6, 4, &mut rng).unwrap().remove(0);
        fragments.put_fragment(epoch_hash, buy_fragment).unwrap();
        fragments.put_fragment(epoch_hash, sell_fragment).unwrap();

        let computation = Computation::new(buy.id, sell.id, epoch_hash, 1);
        let smpcer = Arc::new(InstantSmpcer::default());
        smpcer.preload(Stage::SettleBuy.join_id(computation.id), reveal_values(&buy));
        smpcer.preload(Stage::SettleSell.join_id(computation.id), reveal_values(&sell));

        let ledger = Arc::new(MemoryLedger::new(3));
        let settlements = Arc::new(SettlementRegistry::new());
        settlements.register(Settlement::Spot, Arc::clone(&ledger) as Arc<dyn Ledger>);

        let orderbook = Arc::new(Orderbook::new());
        for order in [&buy, &sell] {
            orderbook
                .open(order.id, order.parity, 1, epoch_hash, 100, Address::repeat_byte(9))
                .unwrap();
            orderbook.match_order(order.id).unwrap();
            orderbook.confirm(order.id).unwrap();
        }

        let settler = SmpcSettler::new(
            smpcer,
            fragments,
            settlements,
            Arc::clone(&orderbook),
        );
        settler.settle(computation).unwrap();

        // The submission happens on a spawned task.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(ledger.settlements(), vec![(buy.id, sell.id)]);
        assert_eq!(orderbook.status(buy.id).unwrap(), nocturne_orderbook::Status::Settled);
        assert_eq!(orderbook.status(sell.id).unwrap(), nocturne_orderbook::Status::Settled);
    }

    #[tokio::test]
    async fn a_corrupted_reveal_never_settles() {
        let mut rng = StdRng::seed_from_u64(22);
        let buy = order(Parity::Buy, 300);
        let sell = order(Parity::Sell, 400);
        let epoch_hash = B256::repeat_byte(2);

        let fragments = Arc::new(MemoryFragments::default());
        fragments
            .put_fragment(epoch_hash, buy.split(6, 4, &mut rng).unwrap().remove(0))
            .unwrap();
        fragments
            .put_fragment(epoch_hash, sell.split(6, 4, &mut rng).unwrap().remove(0))
            .unwrap();

        let computation = Computation::new(buy.id, sell.id, epoch_hash, 1);
        let smpcer = Arc::new(InstantSmpcer::default());
        let mut corrupted = reveal_values(&buy);
        corrupted[7] ^= 1; // wrong nonce: the reveal no longer hashes to the id
        smpcer.preload(Stage::SettleBuy.join_id(computation.id), corrupted);
        smpcer.preload(Stage::SettleSell.join_id(computation.id), reveal_values(&sell));

        let ledger = Arc::new(MemoryLedger::new(3));
        let settlements = Arc::new(SettlementRegistry::new());
        settlements.register(Settlement::Spot, Arc::clone(&ledger) as Arc<dyn Ledger>);

        let settler = SmpcSettler::new(
            smpcer,
            fragments,
            settlements,
            Arc::new(Orderbook::new()),
        );
        settler.settle(computation).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(ledger.settlements().is_empty());
    }

    #[test]
    fn missing_fragments_fail_settlement() {
        let settler = SmpcSettler::new(
            Arc::new(InstantSmpcer::default()),
            Arc::new(MemoryFragments::default()),
            Arc::new(SettlementRegistry::new()),
            Arc::new(Orderbook::new()),
        );
        let computation =
            Computation::new(B256::repeat_byte(1), B256::repeat_byte(2), B256::ZERO, 0);
        assert_eq!(settler.settle(computation), Err(OmeError::OrderFragmentNotFound));
    }
}
