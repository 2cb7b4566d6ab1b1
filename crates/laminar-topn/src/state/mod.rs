//! # State Store Module
//!
//! Persistent keyed state backing the Top-N ranking buffers.
//!
//! The store is the source of truth for every partition. In-memory buffers
//! are rebuilt from it on a cache miss or after a restart, so every backend
//! must return prefix scans in lexicographic key order.
//!
//! ## State Backends
//!
//! - **[`InMemoryStore`]**: BTreeMap-based, O(log n + k) prefix scans
//!
//! ## Example
//!
//! ```rust
//! use laminar_topn::state::{InMemoryStore, StateStore, StateStoreExt};
//!
//! let mut store = InMemoryStore::new();
//!
//! store.put(b"partition:books", b"rows").unwrap();
//! assert_eq!(store.get(b"partition:books").unwrap().as_ref(), b"rows");
//!
//! // Typed state access (requires StateStoreExt)
//! store.put_typed(b"rank_end", &3u64).unwrap();
//! let end: u64 = store.get_typed(b"rank_end").unwrap().unwrap();
//! assert_eq!(end, 3);
//!
//! // Snapshots simulate a restart
//! let snapshot = store.snapshot();
//! store.clear();
//! assert!(store.is_empty());
//! store.restore(snapshot);
//! assert_eq!(store.len(), 2);
//! ```

use bytes::Bytes;
use rkyv::{
    api::high::{HighDeserializer, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    rancor::Error as RkyvError,
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize,
};
use std::collections::BTreeMap;
use std::ops::Bound;

pub mod topn_state;

pub use topn_state::{StoredRow, TopNStateKeys};

/// Compute the lexicographic successor of a byte prefix.
///
/// Returns `None` if no successor exists (empty prefix or all bytes are 0xFF).
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    if prefix.is_empty() {
        return None;
    }
    let mut successor = prefix.to_vec();
    while let Some(last) = successor.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(successor);
        }
        successor.pop();
    }
    None
}

/// Trait for state store implementations.
///
/// State stores are `Send` but not `Sync`: one store is owned by the single
/// execution context processing a shard of partitions.
///
/// # Dyn Compatibility
///
/// This trait is dyn-compatible so operators can receive
/// `&mut dyn StateStore`. Generic typed helpers live on [`StateStoreExt`].
pub trait StateStore: Send {
    /// Get a value by key.
    ///
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &[u8]) -> Option<Bytes>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the backend cannot accept the write.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError>;

    /// Delete a key.
    ///
    /// No error is returned if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if the operation fails.
    fn delete(&mut self, key: &[u8]) -> Result<(), StateError>;

    /// Scan all keys with a given prefix, in lexicographic order.
    fn prefix_scan<'a>(&'a self, prefix: &'a [u8])
        -> Box<dyn Iterator<Item = (Bytes, Bytes)> + 'a>;

    /// Check if a key exists.
    fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Number of entries in the store.
    fn len(&self) -> usize;

    /// Check if the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create a snapshot for checkpointing.
    fn snapshot(&self) -> StateSnapshot;

    /// Replace the current contents with the snapshot's contents.
    fn restore(&mut self, snapshot: StateSnapshot);

    /// Clear all entries.
    fn clear(&mut self);
}

/// Extension trait for [`StateStore`] providing typed access methods.
///
/// Uses rkyv for serialization. Types must derive `Archive`,
/// `rkyv::Serialize`, and `rkyv::Deserialize`.
pub trait StateStoreExt: StateStore {
    /// Get a value and deserialize it using rkyv.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Serialization` if the stored bytes are not a
    /// valid archive of `T`.
    fn get_typed<T>(&self, key: &[u8]) -> Result<Option<T>, StateError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + RkyvDeserialize<T, HighDeserializer<RkyvError>>,
    {
        match self.get(key) {
            Some(bytes) => {
                let archived = rkyv::access::<T::Archived, RkyvError>(&bytes)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                let value = rkyv::deserialize::<T, RkyvError>(archived)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Serialize and store a value using rkyv.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Serialization` if serialization fails, or the
    /// backend's error if the write fails.
    fn put_typed<T>(&mut self, key: &[u8], value: &T) -> Result<(), StateError>
    where
        T: for<'a> RkyvSerialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
    {
        let bytes = rkyv::to_bytes::<RkyvError>(value)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        self.put(key, &bytes)
    }
}

impl<T: StateStore + ?Sized> StateStoreExt for T {}

/// A snapshot of state store contents for checkpointing.
///
/// Snapshots are rkyv-serializable so they can be persisted and loaded into
/// a fresh store after a restart.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct StateSnapshot {
    /// Key-value pairs in key order
    data: Vec<(Vec<u8>, Vec<u8>)>,
}

impl StateSnapshot {
    /// Create a new snapshot from key-value pairs.
    #[must_use]
    pub fn new(data: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { data }
    }

    /// Get the snapshot data.
    #[must_use]
    pub fn data(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.data
    }

    /// Get the number of entries in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialize the snapshot to bytes using rkyv.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<AlignedVec, StateError> {
        rkyv::to_bytes::<RkyvError>(self).map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// Deserialize a snapshot from bytes using rkyv.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid snapshot archive.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let archived = rkyv::access::<<Self as Archive>::Archived, RkyvError>(bytes)
            .map_err(|e| StateError::Corruption(e.to_string()))?;
        rkyv::deserialize::<Self, RkyvError>(archived)
            .map_err(|e| StateError::Serialization(e.to_string()))
    }
}

/// In-memory state store using `BTreeMap` for sorted key access.
///
/// Prefix scans are O(log n + k), which keeps partition replay cheap.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: BTreeMap<Vec<u8>, Bytes>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    #[inline]
    fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.data.get(key).cloned()
    }

    #[inline]
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StateError> {
        self.data.insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StateError> {
        self.data.remove(key);
        Ok(())
    }

    fn prefix_scan<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> Box<dyn Iterator<Item = (Bytes, Bytes)> + 'a> {
        let upper = match prefix_successor(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Box::new(
            self.data
                .range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), upper))
                .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone())),
        )
    }

    #[inline]
    fn contains(&self, key: &[u8]) -> bool {
        self.data.contains_key(key)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn snapshot(&self) -> StateSnapshot {
        let data: Vec<(Vec<u8>, Vec<u8>)> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.to_vec()))
            .collect();
        StateSnapshot::new(data)
    }

    fn restore(&mut self, snapshot: StateSnapshot) {
        self.data = snapshot
            .data
            .into_iter()
            .map(|(key, value)| (key, Bytes::from(value)))
            .collect();
    }

    fn clear(&mut self) {
        self.data.clear();
    }
}

/// Errors that can occur in state operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes failed validation
    #[error("Corruption error: {0}")]
    Corruption(String),

    /// Operation not supported by this store type
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}
