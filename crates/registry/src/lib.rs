//! Epochs and pods.
//!
//! An epoch is an immutable snapshot of the darknode registry taken at an
//! on-chain epoch transition: the registered darknodes and their partition
//! into pods. The partition is a pure function of the epoch hash and the
//! sorted darknode list, so every honest observer derives the same pods
//! without communication.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use alloy_primitives::{keccak256, Address, B256};
use serde::{Deserialize, Serialize};

/// Errors produced while deriving or querying epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Too few darknodes are registered to fill a single pod.
    #[error("degraded pod: expected at least {required} darknodes, got {have}")]
    DegradedPod { required: usize, have: usize },

    /// The queried darknode is in no pod of this epoch.
    #[error("cannot find darknode in any pod")]
    PodNotFound,
}

/// An ordered set of darknodes jointly responsible for one slice of the
/// epoch's computations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Index of this pod within the epoch's pod list.
    pub position: usize,
    /// keccak256 of the member addresses in insertion order.
    pub hash: B256,
    pub darknodes: Vec<Address>,
}

impl Pod {
    pub fn size(&self) -> usize {
        self.darknodes.len()
    }

    /// The Byzantine-tolerant quorum: the number of distinct shares needed
    /// before this pod reconstructs a secret.
    pub fn quorum(&self) -> usize {
        2 * (self.darknodes.len() + 1) / 3
    }

    /// Whether the given darknode is a member of this pod.
    pub fn contains(&self, darknode: Address) -> bool {
        self.darknodes.contains(&darknode)
    }
}

/// The registry snapshot between two on-chain epoch transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Block at which the epoch was triggered.
    pub block_number: u64,
    /// Minimum number of blocks between epoch transitions.
    pub interval: u64,
    pub hash: B256,
    /// All registered darknodes, sorted by address.
    pub darknodes: Vec<Address>,
    pub pods: Vec<Pod>,
}

impl Epoch {
    /// Builds an epoch, deriving the pod partition from the hash.
    pub fn new(
        block_number: u64,
        interval: u64,
        hash: B256,
        mut darknodes: Vec<Address>,
        pod_size: usize,
    ) -> Result<Self, RegistryError> {
        darknodes.sort();
        let pods = pods(hash, &darknodes, pod_size)?;
        Ok(Epoch { block_number, interval, hash, darknodes, pods })
    }

    /// The pod the given darknode belongs to in this epoch.
    pub fn pod(&self, darknode: Address) -> Result<&Pod, RegistryError> {
        self.pods
            .iter()
            .find(|pod| pod.contains(darknode))
            .ok_or(RegistryError::PodNotFound)
    }
}

/// Derives the pod partition for an epoch where every listed darknode is
/// registered.
pub fn pods(hash: B256, darknodes: &[Address], pod_size: usize) -> Result<Vec<Pod>, RegistryError> {
    pods_with(hash, darknodes, pod_size, |_| true)
}

/// Derives the pod partition, skipping darknodes the predicate rejects.
///
/// Assignment walks a counter seeded with the epoch hash: each step claims
/// the next unassigned registered darknode at or after the counter, places
/// it in pod `i mod slots`, and re-seeds the counter by adding the hash.
/// The walk is a pure function of `(hash, darknodes)`.
pub fn pods_with(
    hash: B256,
    darknodes: &[Address],
    pod_size: usize,
    registered: impl Fn(&Address) -> bool,
) -> Result<Vec<Pod>, RegistryError> {
    let total = darknodes.len();
    let eligible = darknodes.iter().filter(|addr| registered(addr)).count();
    if pod_size == 0 || eligible < pod_size {
        return Err(RegistryError::DegradedPod { required: pod_size.max(1), have: eligible });
    }

    let slots = (total / pod_size).max(1);
    let seed = hash_mod(hash, total as u64);

    let mut assigned = vec![false; total];
    let mut members: Vec<Vec<Address>> = vec![Vec::new(); slots];
    let mut x = seed as usize;
    for i in 0..eligible {
        // The scan touches each slot at most once per assignment, so it
        // terminates even when some darknodes are unregistered.
        let mut steps = 0;
        while assigned[x] || !registered(&darknodes[x]) {
            x = (x + 1) % total;
            steps += 1;
            if steps > total {
                return Err(RegistryError::DegradedPod { required: pod_size, have: i });
            }
        }
        assigned[x] = true;
        members[i % slots].push(darknodes[x]);
        x = (x + seed as usize) % total;
    }

    let pods = members
        .into_iter()
        .enumerate()
        .map(|(position, darknodes)| {
            let mut preimage = Vec::with_capacity(darknodes.len() * Address::len_bytes());
            for darknode in &darknodes {
                preimage.extend_from_slice(darknode.as_slice());
            }
            Pod { position, hash: keccak256(&preimage), darknodes }
        })
        .collect();
    Ok(pods)
}

/// Interprets the 32-byte hash as a big-endian integer and reduces it mod n.
fn hash_mod(hash: B256, n: u64) -> u64 {
    let mut acc: u128 = 0;
    for byte in hash.as_slice() {
        acc = ((acc << 8) | *byte as u128) % n as u128;
    }
    acc as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn darknodes(n: usize) -> Vec<Address> {
        let mut addrs: Vec<Address> = (1..=n).map(|i| Address::repeat_byte(i as u8)).collect();
        addrs.sort();
        addrs
    }

    #[test]
    fn derivation_is_deterministic() {
        let nodes = darknodes(12);
        let hash = B256::repeat_byte(0xAB);
        let a = pods(hash, &nodes, 6).unwrap();
        let b = pods(hash, &nodes, 6).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn partition_covers_every_darknode_exactly_once() {
        let nodes = darknodes(13);
        let hash = B256::repeat_byte(0x42);
        let pods = pods(hash, &nodes, 6).unwrap();
        assert_eq!(pods.len(), 2);

        let mut seen: Vec<Address> = pods.iter().flat_map(|p| p.darknodes.clone()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 13);
    }

    #[test]
    fn pod_hashes_commit_to_membership_order() {
        let nodes = darknodes(6);
        let pods = pods(B256::repeat_byte(1), &nodes, 3).unwrap();
        for pod in &pods {
            let mut preimage = Vec::new();
            for darknode in &pod.darknodes {
                preimage.extend_from_slice(darknode.as_slice());
            }
            assert_eq!(pod.hash, keccak256(&preimage));
        }
        assert_ne!(pods[0].hash, pods[1].hash);
    }

    #[test]
    fn different_hashes_shuffle_the_assignment() {
        let nodes = darknodes(16);
        let a = pods(B256::repeat_byte(0x01), &nodes, 4).unwrap();
        let b = pods(B256::repeat_byte(0xF7), &nodes, 4).unwrap();
        assert_ne!(
            a.iter().map(|p| p.darknodes.clone()).collect::<Vec<_>>(),
            b.iter().map(|p| p.darknodes.clone()).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn degraded_epochs_are_rejected() {
        let nodes = darknodes(4);
        assert_eq!(
            pods(B256::ZERO, &nodes, 6),
            Err(RegistryError::DegradedPod { required: 6, have: 4 })
        );
    }

    #[test]
    fn unregistered_darknodes_are_skipped() {
        let nodes = darknodes(8);
        let banned = nodes[3];
        let pods = pods_with(B256::repeat_byte(9), &nodes, 3, |addr| *addr != banned).unwrap();
        let all: Vec<Address> = pods.iter().flat_map(|p| p.darknodes.clone()).collect();
        assert_eq!(all.len(), 7);
        assert!(!all.contains(&banned));
    }

    #[test]
    fn epoch_pod_lookup() {
        let nodes = darknodes(12);
        let epoch = Epoch::new(100, 50, B256::repeat_byte(5), nodes.clone(), 6).unwrap();
        for node in &nodes {
            let pod = epoch.pod(*node).unwrap();
            assert!(pod.contains(*node));
        }
        assert_eq!(epoch.pod(Address::repeat_byte(0xEE)), Err(RegistryError::PodNotFound));
    }

    #[test]
    fn quorum_is_two_thirds_rounded() {
        let pod = |n: usize| Pod {
            position: 0,
            hash: B256::ZERO,
            darknodes: (0..n).map(|i| Address::repeat_byte(i as u8 + 1)).collect(),
        };
        assert_eq!(pod(6).quorum(), 4);
        assert_eq!(pod(24).quorum(), 16);
        assert_eq!(pod(3).quorum(), 2);
    }
}
