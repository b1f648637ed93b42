use alloy_primitives::{keccak256, B256};
use rand::Rng;
use serde::{Deserialize, Serialize};

use nocturne_shamir::{self as shamir, ShamirError, PRIME};

use crate::coexp::{price_from_co_exp, price_to_co_exp, volume_from_co_exp, volume_to_co_exp};
use crate::fragment::{CoExpShare, Fragment};
use crate::tokens::TokenPair;

/// The keccak256 hash of an order's canonical binary layout.
pub type OrderId = B256;

/// Errors produced while constructing or splitting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Shamir(#[from] ShamirError),
}

/// Whether an order buys or sells the non-priority token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Buy = 0,
    Sell = 1,
}

impl Parity {
    /// The parity an order of this parity matches against.
    pub fn opposite(self) -> Parity {
        match self {
            Parity::Buy => Parity::Sell,
            Parity::Sell => Parity::Buy,
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parity::Buy => write!(f, "buy"),
            Parity::Sell => write!(f, "sell"),
        }
    }
}

/// The publicly visible kind of trade an order represents.
///
/// The fill-or-kill variants carry through hashing and settlement untouched;
/// the match test itself does not branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderType {
    Midpoint = 0,
    Limit = 1,
    MidpointFok = 2,
    LimitFok = 3,
}

/// Identifies the settlement layer an order clears on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Settlement {
    Nil = 0,
    Spot = 1,
    Atomic = 2,
}

impl std::fmt::Display for Settlement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Settlement::Nil => write!(f, "nil"),
            Settlement::Spot => write!(f, "spot"),
            Settlement::Atomic => write!(f, "atomic"),
        }
    }
}

/// The want to perform a trade of assets.
///
/// The id is deterministic over all other fields; two orders with equal
/// content have equal ids. Prices and volumes are normalized through the
/// CoExp encoding at construction so the id always reflects the magnitudes
/// the matcher will actually compare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    pub parity: Parity,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Expiry as unix seconds.
    pub expiry: u64,
    pub nonce: u64,

    pub settlement: Settlement,
    pub tokens: TokenPair,
    pub price: u64,
    pub volume: u64,
    #[serde(rename = "minimumVolume")]
    pub minimum_volume: u64,
}

impl Order {
    /// Returns a new order with its id computed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parity: Parity,
        order_type: OrderType,
        expiry: u64,
        settlement: Settlement,
        tokens: TokenPair,
        price: u64,
        volume: u64,
        minimum_volume: u64,
        nonce: u64,
    ) -> Self {
        let price_co_exp = price_to_co_exp(price);
        let volume_co_exp = volume_to_co_exp(volume);
        let minimum_volume_co_exp = volume_to_co_exp(minimum_volume);
        let mut order = Order {
            id: OrderId::ZERO,
            parity,
            order_type,
            expiry,
            nonce,
            settlement,
            tokens,
            price: price_from_co_exp(price_co_exp.co, price_co_exp.exp),
            volume: volume_from_co_exp(volume_co_exp.co, volume_co_exp.exp),
            minimum_volume: volume_from_co_exp(
                minimum_volume_co_exp.co,
                minimum_volume_co_exp.exp,
            ),
        };
        order.id = order.hash();
        order
    }

    /// The keccak256 hash of the canonical binary layout. This hash is the
    /// order id and the preimage of the trader's opening signature.
    pub fn hash(&self) -> B256 {
        keccak256(self.to_bytes())
    }

    /// The prefix header of the canonical layout: type, expiry, nonce.
    pub fn prefix_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        buf.push(self.order_type as u8);
        buf.extend_from_slice(&self.expiry.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf
    }

    /// The canonical binary layout used for hashing and for submission to
    /// the settlement ledger. Big-endian throughout; price, volume and
    /// minimum volume are packed as zero-padded 256-bit words; the token
    /// pair is swapped for sell orders.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.prefix_bytes();
        buf.extend_from_slice(&(self.settlement as u64).to_be_bytes());
        let tokens = match self.parity {
            Parity::Buy => self.tokens,
            Parity::Sell => self.tokens.swapped(),
        };
        buf.extend_from_slice(&tokens.0.to_be_bytes());
        for word in [self.price, self.volume, self.minimum_volume] {
            buf.extend_from_slice(&[0u8; 24]);
            buf.extend_from_slice(&word.to_be_bytes());
        }
        buf
    }

    /// Splits the order into `n` fragments of which any `k` reconstruct it.
    ///
    /// Every scalar field is split with an independent fresh polynomial;
    /// public fields are copied into each fragment verbatim. The nonce is
    /// folded into the field before splitting.
    pub fn split(&self, n: u64, k: u64, rng: &mut impl Rng) -> Result<Vec<Fragment>, OrderError> {
        let price = price_to_co_exp(self.price);
        let volume = volume_to_co_exp(self.volume);
        let minimum_volume = volume_to_co_exp(self.minimum_volume);

        let tokens = shamir::split(self.tokens.0, n, k, rng)?;
        let price_cos = shamir::split(price.co, n, k, rng)?;
        let price_exps = shamir::split(price.exp, n, k, rng)?;
        let volume_cos = shamir::split(volume.co, n, k, rng)?;
        let volume_exps = shamir::split(volume.exp, n, k, rng)?;
        let minimum_volume_cos = shamir::split(minimum_volume.co, n, k, rng)?;
        let minimum_volume_exps = shamir::split(minimum_volume.exp, n, k, rng)?;
        let nonces = shamir::split(self.nonce % PRIME, n, k, rng)?;

        let fragments = (0..n as usize)
            .map(|i| Fragment {
                order_id: self.id,
                order_type: self.order_type,
                parity: self.parity,
                settlement: self.settlement,
                expiry: self.expiry,
                index: tokens[i].index,
                tokens: tokens[i],
                price: CoExpShare { co: price_cos[i], exp: price_exps[i] },
                volume: CoExpShare { co: volume_cos[i], exp: volume_exps[i] },
                minimum_volume: CoExpShare {
                    co: minimum_volume_cos[i],
                    exp: minimum_volume_exps[i],
                },
                nonce: nonces[i],
            })
            .collect();
        Ok(fragments)
    }

    /// Reads one order from a JSON file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Order> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(std::io::Error::from)
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}@{}", self.parity, self.tokens, self.volume, self.price)
    }
}
