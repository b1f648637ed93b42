//! Secure multi-party reconstruction for pods.
//!
//! Darknodes never exchange order shares directly. They exchange *joins*:
//! bundles of derived share values keyed by a join id. The [`Joiner`]
//! collects joins from pod peers and, once a quorum of distinct indices is
//! present, reconstructs every offset and fires a registered callback
//! exactly once. The [`SmpcEngine`] moves joins between peers as signed,
//! network-scoped messages.
//!
//! ## Components
//!
//! - **join**: the join bundle and its bounds
//! - **joiner**: quorum collection and at-most-once reconstruction
//! - **message**: wire messages and signed envelopes
//! - **crypter**: envelope signing and registry-scoped verification
//! - **engine**: the networked SMPC engine and its transport abstraction

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod crypter;
mod engine;
mod join;
mod joiner;
mod message;

pub use crypter::Crypter;
pub use engine::{initiator, JoinTransport, MemoryTransport, SmpcEngine, Smpcer};
pub use join::{Join, JoinId, MAX_JOIN_LENGTH};
pub use joiner::{JoinCallback, Joiner};
pub use message::{network_id, Message, MessageJoin, MessageJoinResponse, NetworkId, SignedEnvelope};

/// Errors produced by the SMPC layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmpcError {
    /// A join arrived whose length differs from earlier joins of the same id.
    #[error("join length unequal")]
    JoinLengthUnequal,

    /// A join carries more shares than [`MAX_JOIN_LENGTH`] permits.
    #[error("join length exceeds maximum")]
    JoinLengthExceedsMax,

    #[error(transparent)]
    Shamir(#[from] nocturne_shamir::ShamirError),

    /// The message signer is not a registered darknode.
    #[error("signer is not a registered darknode")]
    InvalidRegistration,

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A join was submitted for a network id with no connected pod.
    #[error("network not connected")]
    NetworkNotFound,

    #[error("cannot connect to self")]
    ConnectToSelf,

    #[error("transport error: {0}")]
    Transport(String),
}
