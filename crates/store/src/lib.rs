//! The persistence collaborator.
//!
//! Storage is an abstract key-value store with forward range iteration;
//! values are opaque byte blobs. On top of it sit three logical tables —
//! computations, buy fragments per epoch, sell fragments per epoch — whose
//! values are timestamped JSON so stale entries can be pruned by age.
//! The engine depends only on the storer traits; swapping the in-memory
//! backend for a disk store never touches the pipeline.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod tables;

pub use tables::{ComputationTable, FragmentTable};

use std::collections::BTreeMap;

use parking_lot::RwLock;

/// Errors produced by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The iterator cursor does not point at an entry.
    #[error("cursor out of range")]
    CursorOutOfRange,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A key-ordered store of opaque byte blobs.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Forward iteration over entries with keys in `[start, end)`.
    fn range(&self, start: &[u8], end: &[u8]) -> Result<RangeIter, StoreError>;
}

/// A snapshot iterator in key order.
///
/// Starts before the first entry; [`next`](RangeIter::next) advances and
/// reports whether a cursor exists. Reading the cursor without a valid
/// position fails with [`StoreError::CursorOutOfRange`].
#[derive(Debug, Clone)]
pub struct RangeIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: Option<usize>,
}

impl RangeIter {
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { entries, position: None }
    }

    /// Advances to the next entry. Returns false once exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |position| position + 1);
        if next < self.entries.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.entries.len());
            false
        }
    }

    /// The entry under the cursor.
    pub fn cursor(&self) -> Result<(&[u8], &[u8]), StoreError> {
        match self.position {
            Some(position) if position < self.entries.len() => {
                let (key, value) = &self.entries[position];
                Ok((key, value))
            }
            _ => Err(StoreError::CursorOutOfRange),
        }
    }

    /// Drains the remaining entries into a vector of values.
    pub fn collect_values(mut self) -> Vec<Vec<u8>> {
        let mut values = Vec::new();
        while self.next() {
            if let Ok((_, value)) = self.cursor() {
                values.push(value.to_vec());
            }
        }
        values
    }
}

/// An ordered in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn range(&self, start: &[u8], end: &[u8]) -> Result<RangeIter, StoreError> {
        let entries = self
            .inner
            .read()
            .range(start.to_vec()..end.to_vec())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(RangeIter::new(entries))
    }
}

/// The smallest key strictly greater than every key with this prefix.
pub(crate) fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    for byte in end.iter_mut().rev() {
        if *byte < u8::MAX {
            *byte += 1;
            return end;
        }
        *byte = 0;
    }
    // All 0xFF: no finite upper bound short of the whole keyspace.
    vec![u8::MAX; prefix.len() + 1]
}
