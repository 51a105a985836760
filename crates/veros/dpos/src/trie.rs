//! Ordered index interface over the authenticated storage engine
//!
//! The Merkle engine itself lives outside this crate; the epoch layer only
//! needs ordered iteration, prefix windows and point reads/writes. Iteration
//! is an explicit pull API: a [`TrieIter`] yields `(key, value)` pairs in key
//! order and surfaces a storage failure as a terminal `Err` item.

use std::collections::BTreeMap;
use thiserror::Error;

/// Failures surfaced from the storage engine
#[derive(Debug, Error)]
pub enum StorageError {
    /// A stored value does not decode to what the schema says it holds
    #[error("corrupt value under key 0x{key}: {reason}")]
    Corrupt {
        /// Hex rendering of the offending key
        key: String,
        /// What failed to decode
        reason: String,
    },

    /// The backing engine failed
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Build a [`StorageError::Corrupt`] for `key`
    pub fn corrupt(key: &[u8], reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: alloy_primitives::hex::encode(key),
            reason: reason.into(),
        }
    }
}

/// One step of trie iteration
pub type TrieItem = Result<(Vec<u8>, Vec<u8>), StorageError>;

/// Pull iterator over trie entries in key order
pub struct TrieIter<'a> {
    inner: Box<dyn Iterator<Item = TrieItem> + 'a>,
}

impl<'a> TrieIter<'a> {
    /// Wrap an engine-specific iterator
    pub fn new(inner: impl Iterator<Item = TrieItem> + 'a) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Iterator for TrieIter<'_> {
    type Item = TrieItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl std::fmt::Debug for TrieIter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieIter").finish_non_exhaustive()
    }
}

/// The index surface the epoch layer consumes.
///
/// Implementations must iterate a consistent snapshot for the duration of a
/// single epoch-layer call; the caller serialises mutations around it.
pub trait Trie {
    /// Point read; `Ok(None)` when the key is absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or overwrite `key`
    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    /// Iterate every entry in key order
    fn iter(&self) -> TrieIter<'_>;

    /// Iterate entries whose key starts with `prefix`, in key order
    fn iter_prefix(&self, prefix: &[u8]) -> TrieIter<'_>;
}

/// In-memory trie backed by a `BTreeMap`.
///
/// Serves as the engine for tests and for embeddings that keep the epoch
/// indices entirely in memory. Cloning takes a snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemTrie {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemTrie {
    /// Empty trie
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the trie holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Trie for MemTrie {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn iter(&self) -> TrieIter<'_> {
        TrieIter::new(self.entries.iter().map(|(k, v)| Ok((k.clone(), v.clone()))))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> TrieIter<'_> {
        let start = prefix.to_vec();
        TrieIter::new(
            self.entries
                .range(start.clone()..)
                .take_while(move |(k, _)| k.starts_with(&start))
                .map(|(k, v)| Ok((k.clone(), v.clone()))),
        )
    }
}
