use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nocturne_shamir as shamir;

use crate::join::{Join, JoinId, MAX_JOIN_LENGTH};
use crate::SmpcError;

/// Invoked with the reconstructed values once a join id reaches quorum.
pub type JoinCallback = Box<dyn FnOnce(JoinId, &[u64]) + Send>;

#[derive(Default)]
struct JoinSet {
    length: usize,
    joins: BTreeMap<u64, Join>,
    callback: Option<JoinCallback>,
    /// Cached reconstruction; present once the quorum has fired.
    values: Option<Vec<u64>>,
    inserted_at: Option<Instant>,
}

/// Collects joins until `k` distinct indices are present, then reconstructs
/// every offset and fires the callback at most once per join id.
///
/// Joins past the quorum are accepted and ignored; they never re-trigger the
/// callback. Reconstructed sets stay cached so a late
/// [`insert_and_set_callback`](Joiner::insert_and_set_callback) still
/// observes the values.
pub struct Joiner {
    k: usize,
    sets: Mutex<HashMap<JoinId, JoinSet>>,
}

impl std::fmt::Debug for Joiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Joiner").field("k", &self.k).finish_non_exhaustive()
    }
}

impl Joiner {
    /// Returns a joiner that reconstructs after `k` distinct-index joins.
    pub fn new(k: usize) -> Self {
        Self { k, sets: Mutex::new(HashMap::new()) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Inserts a join. If this insert completes the quorum, the registered
    /// callback (if any) fires with the reconstructed values.
    pub fn insert(&self, join: Join) -> Result<(), SmpcError> {
        self.insert_inner(join, None)
    }

    /// Atomically registers `callback` and then inserts the join. If the
    /// quorum was already reached, the callback fires immediately with the
    /// cached values; otherwise it replaces any previously registered
    /// callback.
    pub fn insert_and_set_callback(
        &self,
        join: Join,
        callback: JoinCallback,
    ) -> Result<(), SmpcError> {
        self.insert_inner(join, Some(callback))
    }

    /// Drops every join set older than `ttl`, reconstructed or not. Returns
    /// the number of sets removed. Abandoned computations are re-proposed by
    /// the ranker on a later epoch, so forgetting them here is safe.
    pub fn purge_older_than(&self, ttl: Duration) -> usize {
        let mut sets = self.sets.lock();
        let before = sets.len();
        let now = Instant::now();
        sets.retain(|_, set| match set.inserted_at {
            Some(at) => now.duration_since(at) < ttl,
            None => true,
        });
        before - sets.len()
    }

    fn insert_inner(
        &self,
        join: Join,
        callback: Option<JoinCallback>,
    ) -> Result<(), SmpcError> {
        if join.shares.len() > MAX_JOIN_LENGTH {
            return Err(SmpcError::JoinLengthExceedsMax);
        }
        let id = join.id;

        // The callback must run outside the lock: it is free to re-enter
        // the joiner.
        let fired: Option<(JoinCallback, Vec<u64>)> = {
            let mut sets = self.sets.lock();
            let set = sets.entry(join.id).or_insert_with(|| JoinSet {
                length: join.shares.len(),
                inserted_at: Some(Instant::now()),
                ..JoinSet::default()
            });
            if set.length != join.shares.len() {
                return Err(SmpcError::JoinLengthUnequal);
            }

            if let Some(values) = &set.values {
                // Quorum already fired. A freshly supplied callback sees the
                // cached values; the join itself is ignored.
                match callback {
                    Some(callback) => Some((callback, values.clone())),
                    None => None,
                }
            } else {
                if let Some(callback) = callback {
                    set.callback = Some(callback);
                }
                if set.joins.len() < self.k {
                    set.joins.insert(join.index, join);
                }
                if set.joins.len() == self.k {
                    let values = reconstruct(set, self.k)?;
                    set.values = Some(values.clone());
                    set.callback.take().map(|callback| (callback, values))
                } else {
                    None
                }
            }
        };

        if let Some((callback, values)) = fired {
            callback(id, &values);
        }
        Ok(())
    }
}

fn reconstruct(set: &JoinSet, k: usize) -> Result<Vec<u64>, SmpcError> {
    let joins: Vec<&Join> = set.joins.values().collect();
    let mut values = Vec::with_capacity(set.length);
    for offset in 0..set.length {
        let shares: Vec<shamir::Share> =
            joins.iter().map(|join| join.shares[offset]).collect();
        values.push(shamir::join(&shares, k)?);
    }
    Ok(values)
}
