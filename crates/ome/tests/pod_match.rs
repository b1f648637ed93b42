//! End-to-end pod test: six darknodes match, confirm, and settle a pair of
//! confidential orders over the in-process transport.
//!
//! Every darknode runs the full pipeline against a shared memory ledger:
//! fragments are seeded as a trader would distribute them, the pod
//! reconstructs the match verdict at quorum 4-of-6, the confirmer waits out
//! block-depth finality, and the settler reveals and submits the plaintext
//! pair exactly once.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nocturne_ledger::{Ledger, MemoryLedger};
use nocturne_ome::{
    Confirmer, DelegateRanker, Ome, OmeConfig, SettlementRegistry, SmpcMatcher, SmpcSettler,
};
use nocturne_order::{Order, OrderType, Parity, Settlement, TokenPair};
use nocturne_orderbook::{Orderbook, Status};
use nocturne_registry::Epoch;
use nocturne_smpc::{Crypter, MemoryTransport, SmpcEngine};
use nocturne_store::{ComputationTable, FragmentTable, MemoryStore};

const POD_SIZE: usize = 6;

struct Darknode {
    orderbook: Arc<Orderbook>,
    fragments: Arc<FragmentTable<MemoryStore>>,
    epoch_tx: mpsc::UnboundedSender<Epoch>,
}

struct Pod {
    darknodes: Vec<Darknode>,
    ledger: Arc<MemoryLedger>,
    epoch: Epoch,
    cancel: CancellationToken,
}

async fn spawn_pod() -> Pod {
    let ledger = Arc::new(MemoryLedger::new(POD_SIZE));
    let transport = Arc::new(MemoryTransport::new());
    let cancel = CancellationToken::new();

    let crypters: Vec<Arc<Crypter>> = (0..POD_SIZE)
        .map(|_| Arc::new(Crypter::new(PrivateKeySigner::random())))
        .collect();
    let addresses: Vec<Address> = crypters.iter().map(|crypter| crypter.address()).collect();
    let epoch = Epoch::new(100, 50, B256::repeat_byte(0xE1), addresses.clone(), POD_SIZE)
        .expect("pod-sized epoch");

    let mut darknodes = Vec::with_capacity(POD_SIZE);
    for crypter in crypters {
        crypter.update_registered(addresses.clone());
        let address = crypter.address();

        let inbound = transport.register(address);
        let engine = Arc::new(SmpcEngine::new(
            Arc::clone(&crypter),
            Arc::clone(&transport),
            Duration::from_secs(60),
        ));
        tokio::spawn(Arc::clone(&engine).run(inbound, cancel.clone()));

        let orderbook = Arc::new(Orderbook::new());
        let fragments = Arc::new(FragmentTable::new(MemoryStore::new(), Duration::from_secs(3600)));
        let computations =
            Arc::new(ComputationTable::new(MemoryStore::new(), Duration::from_secs(3600)));

        let ranker = Arc::new(DelegateRanker::new(address, epoch.clone()).unwrap());
        let matcher = Arc::new(SmpcMatcher::new(
            Arc::clone(&engine) as Arc<dyn nocturne_smpc::Smpcer>,
            Arc::clone(&fragments) as Arc<dyn nocturne_ome::FragmentStorer>,
        ));
        let confirmer = Arc::new(Confirmer::new(
            Arc::clone(&computations) as Arc<dyn nocturne_ome::ComputationStorer>,
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Duration::from_millis(10),
            4,
        ));
        let settlements = Arc::new(SettlementRegistry::new());
        settlements.register(Settlement::Spot, Arc::clone(&ledger) as Arc<dyn Ledger>);
        let settler = Arc::new(SmpcSettler::new(
            Arc::clone(&engine) as Arc<dyn nocturne_smpc::Smpcer>,
            Arc::clone(&fragments) as Arc<dyn nocturne_ome::FragmentStorer>,
            settlements,
            Arc::clone(&orderbook),
        ));

        let ome = Ome::new(
            address,
            OmeConfig { computation_buffer: 16, match_interval: Duration::from_millis(10) },
            ranker,
            matcher,
            confirmer,
            settler,
            Arc::clone(&orderbook),
            Arc::clone(&engine) as Arc<dyn nocturne_smpc::Smpcer>,
        );
        let (epoch_tx, epoch_rx) = mpsc::unbounded_channel();
        tokio::spawn(ome.run(cancel.clone(), epoch_rx));
        epoch_tx.send(epoch.clone()).unwrap();

        darknodes.push(Darknode { orderbook, fragments, epoch_tx });
    }

    Pod { darknodes, ledger, epoch, cancel }
}

fn limit_order(parity: Parity, price: u64, nonce: u64) -> Order {
    Order::new(
        parity,
        OrderType::Limit,
        1_700_000_000,
        Settlement::Spot,
        TokenPair::ETH_REN,
        price,
        10,
        1,
        nonce,
    )
}

/// Distributes one fragment per darknode and opens the order everywhere, as
/// the trader's gateway would.
async fn submit_order(pod: &Pod, order: &Order, trader: Address, rng: &mut StdRng) {
    let fragments = order.split(POD_SIZE as u64, 4, rng).unwrap();
    pod.ledger.open_order_as(trader, order.id);
    let priority = pod.ledger.priority(order.id).await.unwrap();

    for (darknode, fragment) in pod.darknodes.iter().zip(fragments) {
        use nocturne_ome::FragmentStorer;
        darknode.fragments.put_fragment(pod.epoch.hash, fragment).unwrap();
        darknode
            .orderbook
            .open(order.id, order.parity, priority, pod.epoch.hash, 100, trader)
            .unwrap();
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_pod_matches_confirms_and_settles_one_pair() {
    let mut rng = StdRng::seed_from_u64(1001);
    let pod = spawn_pod().await;

    let buy = limit_order(Parity::Buy, 100, 11);
    let sell = limit_order(Parity::Sell, 100, 22);
    submit_order(&pod, &buy, Address::repeat_byte(0xA1), &mut rng).await;
    submit_order(&pod, &sell, Address::repeat_byte(0xB2), &mut rng).await;

    // The pod matches and submits the confirmation; then finality arrives.
    wait_for("ledger confirmation", || {
        block_on_inline(pod.ledger.status(buy.id))
            == Ok(nocturne_ledger::LedgerStatus::Confirmed)
    })
    .await;
    pod.ledger.advance_blocks(4);

    wait_for("settlement", || !pod.ledger.settlements().is_empty()).await;
    assert_eq!(pod.ledger.settlements(), vec![(buy.id, sell.id)]);

    // Every darknode converges on the settled status.
    wait_for("orderbooks settled", || {
        pod.darknodes.iter().all(|darknode| {
            darknode.orderbook.status(buy.id) == Ok(Status::Settled)
                && darknode.orderbook.status(sell.id) == Ok(Status::Settled)
        })
    })
    .await;

    pod.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mismatched_prices_never_confirm() {
    let mut rng = StdRng::seed_from_u64(1002);
    let pod = spawn_pod().await;

    let buy = limit_order(Parity::Buy, 99, 33);
    let sell = limit_order(Parity::Sell, 100, 44);
    submit_order(&pod, &buy, Address::repeat_byte(0xA1), &mut rng).await;
    submit_order(&pod, &sell, Address::repeat_byte(0xB2), &mut rng).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    pod.ledger.advance_blocks(4);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        pod.ledger.status(buy.id).await.unwrap(),
        nocturne_ledger::LedgerStatus::Open
    );
    assert!(pod.ledger.settlements().is_empty());
    for darknode in &pod.darknodes {
        assert_eq!(darknode.orderbook.status(buy.id), Ok(Status::Open));
    }
    pod.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn epoch_rollover_keeps_the_pipeline_alive() {
    let mut rng = StdRng::seed_from_u64(1003);
    let pod = spawn_pod().await;

    // Roll the epoch before any orders arrive.
    let addresses = pod.epoch.darknodes.clone();
    let next = Epoch::new(200, 50, B256::repeat_byte(0xE2), addresses, POD_SIZE).unwrap();
    for darknode in &pod.darknodes {
        darknode.epoch_tx.send(next.clone()).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Orders submitted under the new epoch still match and settle.
    let buy = limit_order(Parity::Buy, 100, 55);
    let sell = limit_order(Parity::Sell, 100, 66);
    let submit = |order: Order, trader: Address, rng: &mut StdRng| {
        let fragments = order.split(POD_SIZE as u64, 4, rng).unwrap();
        pod.ledger.open_order_as(trader, order.id);
        (order, fragments)
    };
    let (buy, buy_fragments) = submit(buy, Address::repeat_byte(0xA1), &mut rng);
    let (sell, sell_fragments) = submit(sell, Address::repeat_byte(0xB2), &mut rng);

    for (i, darknode) in pod.darknodes.iter().enumerate() {
        use nocturne_ome::FragmentStorer;
        darknode.fragments.put_fragment(next.hash, buy_fragments[i].clone()).unwrap();
        darknode.fragments.put_fragment(next.hash, sell_fragments[i].clone()).unwrap();
        darknode
            .orderbook
            .open(buy.id, buy.parity, 1, next.hash, 200, Address::repeat_byte(0xA1))
            .unwrap();
        darknode
            .orderbook
            .open(sell.id, sell.parity, 2, next.hash, 200, Address::repeat_byte(0xB2))
            .unwrap();
    }

    wait_for("confirmation after rollover", || {
        block_on_inline(pod.ledger.status(buy.id))
            == Ok(nocturne_ledger::LedgerStatus::Confirmed)
    })
    .await;
    pod.ledger.advance_blocks(4);
    wait_for("settlement after rollover", || !pod.ledger.settlements().is_empty()).await;

    pod.cancel.cancel();
}

/// Resolves a short future from a sync closure inside the test runtime.
fn block_on_inline<F: std::future::Future>(future: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
