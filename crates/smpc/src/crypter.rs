use std::collections::HashSet;

use alloy_primitives::{Address, Signature};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use parking_lot::RwLock;

use crate::message::{Message, SignedEnvelope};
use crate::SmpcError;

/// Signs outbound messages and verifies inbound ones against the darknode
/// registry.
///
/// The registered set is refreshed on every epoch transition; verification
/// is a pure in-memory check so the receive path never touches the ledger.
pub struct Crypter {
    signer: PrivateKeySigner,
    registered: RwLock<HashSet<Address>>,
}

impl std::fmt::Debug for Crypter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypter").field("address", &self.address()).finish_non_exhaustive()
    }
}

impl Crypter {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer, registered: RwLock::new(HashSet::new()) }
    }

    /// The address this crypter signs as.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Replaces the registered darknode set.
    pub fn update_registered(&self, darknodes: impl IntoIterator<Item = Address>) {
        *self.registered.write() = darknodes.into_iter().collect();
    }

    /// Whether the address is currently registered.
    pub fn is_registered(&self, address: Address) -> bool {
        self.registered.read().contains(&address)
    }

    /// Wraps a message in a signed envelope.
    pub fn sign(&self, message: &Message) -> Result<SignedEnvelope, SmpcError> {
        let payload = message.to_bytes();
        let hash = alloy_primitives::keccak256(&payload);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| SmpcError::InvalidSignature(e.to_string()))?;
        Ok(SignedEnvelope {
            sender: self.address(),
            signature: signature.as_bytes().to_vec(),
            payload,
        })
    }

    /// Verifies an envelope and returns the message it carries.
    ///
    /// Fails if the signature does not recover to the claimed sender, or if
    /// the sender is not a registered darknode.
    pub fn verify(&self, envelope: &SignedEnvelope) -> Result<Message, SmpcError> {
        let signature = Signature::try_from(envelope.signature.as_slice())
            .map_err(|e| SmpcError::InvalidSignature(e.to_string()))?;
        let recovered = signature
            .recover_address_from_prehash(&envelope.hash())
            .map_err(|e| SmpcError::InvalidSignature(e.to_string()))?;
        if recovered != envelope.sender {
            return Err(SmpcError::InvalidSignature("sender mismatch".to_string()));
        }
        if !self.is_registered(recovered) {
            return Err(SmpcError::InvalidRegistration);
        }
        Message::from_bytes(&envelope.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::Join;
    use crate::message::{network_id, MessageJoin};
    use alloy_primitives::B256;
    use nocturne_shamir::Share;

    fn message() -> Message {
        Message::Join(MessageJoin {
            network_id: network_id(B256::repeat_byte(4), b"match"),
            join: Join::new(B256::repeat_byte(7), 1, vec![Share::new(1, 99)]),
        })
    }

    #[test]
    fn signed_envelopes_verify_for_registered_senders() {
        let alice = Crypter::new(PrivateKeySigner::random());
        let bob = Crypter::new(PrivateKeySigner::random());
        bob.update_registered([alice.address(), bob.address()]);

        let envelope = alice.sign(&message()).unwrap();
        assert_eq!(bob.verify(&envelope).unwrap(), message());
    }

    #[test]
    fn unregistered_senders_are_rejected() {
        let alice = Crypter::new(PrivateKeySigner::random());
        let bob = Crypter::new(PrivateKeySigner::random());
        bob.update_registered([bob.address()]);

        let envelope = alice.sign(&message()).unwrap();
        assert_eq!(bob.verify(&envelope), Err(SmpcError::InvalidRegistration));
    }

    #[test]
    fn tampered_payloads_are_rejected() {
        let alice = Crypter::new(PrivateKeySigner::random());
        let bob = Crypter::new(PrivateKeySigner::random());
        bob.update_registered([alice.address()]);

        let mut envelope = alice.sign(&message()).unwrap();
        envelope.payload[0] ^= 0x01;
        assert!(matches!(bob.verify(&envelope), Err(SmpcError::InvalidSignature(_))));
    }

    #[test]
    fn spoofed_senders_are_rejected() {
        let alice = Crypter::new(PrivateKeySigner::random());
        let mallory = Crypter::new(PrivateKeySigner::random());
        let bob = Crypter::new(PrivateKeySigner::random());
        bob.update_registered([alice.address(), mallory.address()]);

        let mut envelope = mallory.sign(&message()).unwrap();
        envelope.sender = alice.address();
        assert!(matches!(bob.verify(&envelope), Err(SmpcError::InvalidSignature(_))));
    }
}
