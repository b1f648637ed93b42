use std::sync::Arc;

use nocturne_shamir::HALF_PRIME;
use nocturne_smpc::{network_id, Join, NetworkId, Smpcer};

use crate::computation::{Computation, ComputationState, Stage};
use crate::storer::FragmentStorer;

/// Suffix scoping a pod's match reconstructions to one epoch.
pub const MATCH_NETWORK_SUFFIX: &[u8] = b"ome";

/// Receives the computation with its state resolved to `Matched` or
/// `Mismatched`.
pub type MatchCallback = Box<dyn FnOnce(Computation) + Send>;

/// Resolves computations into match verdicts.
pub trait Matcher: Send + Sync {
    /// Starts resolution of one computation. The callback fires once the
    /// pod reconstructs the verdict; it never fires if the pod fails to
    /// reach quorum (the computation times out and is re-proposed on a
    /// later epoch).
    fn resolve(&self, computation: Computation, callback: MatchCallback);
}

/// Evaluates the match predicate on a reconstructed 7-tuple.
///
/// The field has no signed values; "non-negative" means v ≤ p/2 with p/2
/// truncated, so v = p/2 itself counts as non-negative. Offsets 0..6 are
/// the price, buy-volume, and sell-volume differences (co then exp each);
/// offset 6 is the token-pair difference, which must be exactly zero.
pub fn is_match(values: &[u64]) -> bool {
    values.len() == 7
        && values[6] == 0
        && values[..6].iter().all(|&value| value <= HALF_PRIME)
}

/// The SMPC-backed matcher.
///
/// For every computation it loads this darknode's buy and sell fragments,
/// forms the seven match-predicate share differences, and contributes them
/// to the pod as a join. The verdict exists only once a quorum of the pod
/// has contributed; no darknode ever sees either order's plaintext.
pub struct SmpcMatcher {
    smpcer: Arc<dyn Smpcer>,
    fragments: Arc<dyn FragmentStorer>,
}

impl std::fmt::Debug for SmpcMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmpcMatcher").finish_non_exhaustive()
    }
}

impl SmpcMatcher {
    pub fn new(smpcer: Arc<dyn Smpcer>, fragments: Arc<dyn FragmentStorer>) -> Self {
        Self { smpcer, fragments }
    }

    /// The network a computation's joins travel on.
    pub fn network(computation: &Computation) -> NetworkId {
        network_id(computation.epoch_hash, MATCH_NETWORK_SUFFIX)
    }
}

impl Matcher for SmpcMatcher {
    fn resolve(&self, computation: Computation, callback: MatchCallback) {
        let buy = match self.fragments.fragment(
            computation.epoch_hash,
            nocturne_order::Parity::Buy,
            computation.buy,
        ) {
            Ok(fragment) => fragment,
            Err(error) => {
                tracing::debug!(id = %computation.id, %error, "missing buy fragment");
                return;
            }
        };
        let sell = match self.fragments.fragment(
            computation.epoch_hash,
            nocturne_order::Parity::Sell,
            computation.sell,
        ) {
            Ok(fragment) => fragment,
            Err(error) => {
                tracing::debug!(id = %computation.id, %error, "missing sell fragment");
                return;
            }
        };
        debug_assert_eq!(buy.index, sell.index, "one darknode holds one index per epoch");

        // The seven predicate differences. Shares subtract pointwise, so
        // the reconstruction is the difference of the plaintext values.
        let shares = vec![
            buy.price.co.sub(&sell.price.co),
            buy.price.exp.sub(&sell.price.exp),
            buy.volume.co.sub(&sell.minimum_volume.co),
            buy.volume.exp.sub(&sell.minimum_volume.exp),
            sell.volume.co.sub(&buy.minimum_volume.co),
            sell.volume.exp.sub(&buy.minimum_volume.exp),
            buy.tokens.sub(&sell.tokens),
        ];
        let join = Join::new(Stage::Match.join_id(computation.id), buy.index, shares);

        let result = self.smpcer.join(
            Self::network(&computation),
            join,
            Box::new(move |_, values| {
                let state = if is_match(values) {
                    ComputationState::Matched
                } else {
                    ComputationState::Mismatched
                };
                tracing::debug!(id = %computation.id, ?state, "resolved computation");
                callback(computation.with_state(state));
            }),
        );
        if let Err(error) = result {
            tracing::warn!(id = %computation.id, %error, "failed to contribute match join");
        }
    }
}
