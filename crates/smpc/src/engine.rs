use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::crypter::Crypter;
use crate::join::{Join, JoinId};
use crate::joiner::{JoinCallback, Joiner};
use crate::message::{Message, MessageJoin, MessageJoinResponse, NetworkId, SignedEnvelope};
use crate::SmpcError;

/// Returns whether `local` opens the stream to `remote`.
///
/// The side with the lexicographically smaller address initiates; the other
/// waits. Both peers derive the same answer, so a pair never double-opens.
pub fn initiator(local: Address, remote: Address) -> Result<bool, SmpcError> {
    if local == remote {
        return Err(SmpcError::ConnectToSelf);
    }
    Ok(local < remote)
}

/// Delivers signed envelopes to pod peers.
///
/// Implementations own connection management, including the dial-direction
/// rule from [`initiator`]. The engine only addresses peers.
#[async_trait]
pub trait JoinTransport: Send + Sync + 'static {
    async fn send(&self, to: Address, envelope: SignedEnvelope) -> Result<(), SmpcError>;
}

/// The interface the matcher and settler drive.
pub trait Smpcer: Send + Sync {
    /// Opens a network: a batch of reconstructions scoped to one epoch,
    /// shared with the given pod peers at the given quorum.
    fn connect(&self, network_id: NetworkId, peers: Vec<Address>, k: usize);

    /// Tears down a network and forgets its pending joins.
    fn disconnect(&self, network_id: NetworkId);

    /// Contributes this darknode's join and registers the callback to fire
    /// when the network's quorum reconstructs the values. The join is
    /// broadcast to all pod peers.
    fn join(
        &self,
        network_id: NetworkId,
        join: Join,
        callback: JoinCallback,
    ) -> Result<(), SmpcError>;
}

/// Cap on cached own joins per network.
const MAX_OWN_JOINS: usize = 4096;

struct Network {
    peers: Vec<Address>,
    joiner: Arc<Joiner>,
    /// Joins this darknode produced, kept to answer late peers.
    own: HashMap<JoinId, Join>,
}

/// The networked SMPC engine.
///
/// One engine serves all networks a darknode participates in. Outbound joins
/// are signed and pushed to every pod peer; inbound envelopes are verified,
/// inserted into the network's joiner, and answered with this darknode's own
/// join so peers that connected late still reach quorum.
pub struct SmpcEngine<T: JoinTransport> {
    crypter: Arc<Crypter>,
    transport: Arc<T>,
    networks: Mutex<HashMap<NetworkId, Arc<Mutex<Network>>>>,
    join_ttl: Duration,
}

impl<T: JoinTransport> std::fmt::Debug for SmpcEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmpcEngine")
            .field("address", &self.crypter.address())
            .finish_non_exhaustive()
    }
}

impl<T: JoinTransport> SmpcEngine<T> {
    pub fn new(crypter: Arc<Crypter>, transport: Arc<T>, join_ttl: Duration) -> Self {
        Self { crypter, transport, networks: Mutex::new(HashMap::new()), join_ttl }
    }

    /// The address this engine participates as.
    pub fn address(&self) -> Address {
        self.crypter.address()
    }

    /// Consumes inbound envelopes until cancellation. Also drives the join
    /// timeout: pending reconstructions older than the configured window are
    /// dropped and will be re-proposed on a later epoch.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<SignedEnvelope>,
        cancel: CancellationToken,
    ) {
        let mut purge = tokio::time::interval(self.join_ttl.max(Duration::from_millis(10)));
        purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => return,
                },
                _ = purge.tick() => self.purge_stale_joins(),
            }
        }
    }

    /// Verifies and dispatches one inbound envelope. Envelopes that fail
    /// verification are dropped silently (logged at debug).
    pub fn handle_envelope(&self, envelope: SignedEnvelope) {
        let sender = envelope.sender;
        let message = match self.crypter.verify(&envelope) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%sender, %error, "dropping unverified message");
                return;
            }
        };

        let network_id = message.network_id();
        let Some(network) = self.network(network_id) else {
            tracing::debug!(%sender, %network_id, "message for unconnected network");
            return;
        };

        match message {
            Message::Join(MessageJoin { join, .. }) => {
                let join_id = join.id;
                self.insert(&network, join);

                // Answer with our own join so the sender reaches quorum even
                // if it missed our broadcast.
                let own = network.lock().own.get(&join_id).cloned();
                if let Some(own) = own {
                    let response = Message::JoinResponse(MessageJoinResponse {
                        network_id,
                        join: own,
                    });
                    self.send_to(sender, &response);
                }
            }
            Message::JoinResponse(MessageJoinResponse { join, .. }) => {
                self.insert(&network, join);
            }
        }
    }

    fn network(&self, network_id: NetworkId) -> Option<Arc<Mutex<Network>>> {
        self.networks.lock().get(&network_id).cloned()
    }

    fn insert(&self, network: &Arc<Mutex<Network>>, join: Join) {
        let joiner = network.lock().joiner.clone();
        if let Err(error) = joiner.insert(join) {
            tracing::debug!(%error, "rejected join");
        }
    }

    fn send_to(&self, peer: Address, message: &Message) {
        let envelope = match self.crypter.sign(message) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::error!(%error, "failed to sign message");
                return;
            }
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(error) = transport.send(peer, envelope).await {
                tracing::debug!(%peer, %error, "failed to send join");
            }
        });
    }

    fn purge_stale_joins(&self) {
        let networks: Vec<Arc<Mutex<Network>>> =
            self.networks.lock().values().cloned().collect();
        for network in networks {
            let joiner = {
                let mut network = network.lock();
                // Cached own joins only matter while a reconstruction is
                // pending; cap the cache alongside the joiner window.
                if network.own.len() > MAX_OWN_JOINS {
                    network.own.clear();
                }
                network.joiner.clone()
            };
            let purged = joiner.purge_older_than(self.join_ttl);
            if purged > 0 {
                tracing::debug!(purged, "timed out pending joins");
            }
        }
    }
}

impl<T: JoinTransport> Smpcer for SmpcEngine<T> {
    fn connect(&self, network_id: NetworkId, peers: Vec<Address>, k: usize) {
        let network = Network {
            peers,
            joiner: Arc::new(Joiner::new(k)),
            own: HashMap::new(),
        };
        self.networks.lock().insert(network_id, Arc::new(Mutex::new(network)));
        tracing::debug!(%network_id, k, "connected smpc network");
    }

    fn disconnect(&self, network_id: NetworkId) {
        self.networks.lock().remove(&network_id);
        tracing::debug!(%network_id, "disconnected smpc network");
    }

    fn join(
        &self,
        network_id: NetworkId,
        join: Join,
        callback: JoinCallback,
    ) -> Result<(), SmpcError> {
        let network = self.network(network_id).ok_or(SmpcError::NetworkNotFound)?;

        let peers = {
            let mut guard = network.lock();
            guard.own.insert(join.id, join.clone());
            guard.joiner.insert_and_set_callback(join.clone(), callback)?;
            guard.peers.clone()
        };

        let message = Message::Join(MessageJoin { network_id, join });
        for peer in peers {
            if peer == self.address() {
                continue;
            }
            self.send_to(peer, &message);
        }
        Ok(())
    }
}

/// An in-process transport: a mesh of channels between local engines.
///
/// Used by tests and single-process deployments; the production transport is
/// the RPC layer, which implements [`JoinTransport`] over network streams.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<RwLock<HashMap<Address, mpsc::UnboundedSender<SignedEnvelope>>>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport").finish_non_exhaustive()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an address on the mesh and returns its inbound stream.
    pub fn register(&self, address: Address) -> mpsc::UnboundedReceiver<SignedEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(address, tx);
        rx
    }
}

#[async_trait]
impl JoinTransport for MemoryTransport {
    async fn send(&self, to: Address, envelope: SignedEnvelope) -> Result<(), SmpcError> {
        let route = self.routes.read().get(&to).cloned();
        match route {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| SmpcError::Transport(format!("peer {to} is gone"))),
            None => Err(SmpcError::Transport(format!("no route to {to}"))),
        }
    }
}
