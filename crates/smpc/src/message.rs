use alloy_primitives::{keccak256, Address, B256};
use serde::{Deserialize, Serialize};

use crate::join::Join;
use crate::SmpcError;

/// Scopes a batch of joins to one epoch: keccak256 of the epoch hash plus a
/// protocol suffix.
pub type NetworkId = B256;

/// Derives a network id for an epoch and protocol suffix.
pub fn network_id(epoch_hash: B256, suffix: &[u8]) -> NetworkId {
    let mut preimage = Vec::with_capacity(32 + suffix.len());
    preimage.extend_from_slice(epoch_hash.as_slice());
    preimage.extend_from_slice(suffix);
    keccak256(&preimage)
}

/// A join pushed by the peer that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageJoin {
    pub network_id: NetworkId,
    pub join: Join,
}

/// A peer's own join, returned to a requester that pushed one first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageJoinResponse {
    pub network_id: NetworkId,
    pub join: Join,
}

/// Every message exchanged inside a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Join(MessageJoin),
    JoinResponse(MessageJoinResponse),
}

impl Message {
    pub fn network_id(&self) -> NetworkId {
        match self {
            Message::Join(message) => message.network_id,
            Message::JoinResponse(message) => message.network_id,
        }
    }

    pub fn join(&self) -> &Join {
        match self {
            Message::Join(message) => &message.join,
            Message::JoinResponse(message) => &message.join,
        }
    }

    /// Serializes for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("message serialization should not fail")
    }

    /// Deserializes a received message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SmpcError> {
        bincode::deserialize(bytes).map_err(|e| SmpcError::MalformedMessage(e.to_string()))
    }
}

/// A signed message in transit between two darknodes.
///
/// The payload is the bincode encoding of a [`Message`]; the signature is an
/// ECDSA signature over the keccak256 of the payload. Receivers drop
/// envelopes whose signature does not recover to a registered darknode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub sender: Address,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
}

impl SignedEnvelope {
    /// The signing hash of the payload.
    pub fn hash(&self) -> B256 {
        keccak256(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nocturne_shamir::Share;

    fn sample_join() -> Join {
        Join::new(
            B256::repeat_byte(0xAA),
            3,
            (0..7).map(|i| Share::new(3, i * 1000)).collect(),
        )
    }

    #[test]
    fn messages_roundtrip_through_bytes() {
        let network = network_id(B256::repeat_byte(1), b"match");
        for message in [
            Message::Join(MessageJoin { network_id: network, join: sample_join() }),
            Message::JoinResponse(MessageJoinResponse { network_id: network, join: sample_join() }),
        ] {
            let decoded = Message::from_bytes(&message.to_bytes()).unwrap();
            assert_eq!(decoded, message);
            assert_eq!(decoded.network_id(), network);
            assert_eq!(decoded.join(), &sample_join());
        }
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(matches!(
            Message::from_bytes(&[0xFF; 4]),
            Err(SmpcError::MalformedMessage(_))
        ));
    }

    #[test]
    fn network_ids_differ_by_epoch_and_suffix() {
        let a = network_id(B256::repeat_byte(1), b"match");
        let b = network_id(B256::repeat_byte(2), b"match");
        let c = network_id(B256::repeat_byte(1), b"settle");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
