//! Backing-store contracts.
//!
//! The trie and state layers never talk to a database driver directly; they
//! go through [`KvStore`] for reads and accumulate writes in a [`WriteBatch`]
//! that the caller flushes atomically. [`MemoryStore`] is the in-memory
//! implementation used by tests and examples.

use hashbrown::HashMap;
use parking_lot::RwLock;
use thiserror::Error;

/// Backing-store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// The underlying driver failed.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Key-value driver consumed by the state store.
///
/// Implementations are expected to be internally synchronized; the trie
/// layer shares a store between trie instances via `Arc`.
pub trait KvStore: Send + Sync {
    /// Reads a value. `Ok(None)` means the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Writes a single value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Deletes a key. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// Writes a batch of values atomically.
    fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), KvError>;
}

/// An accumulating batch writer.
///
/// Commit paths only ever append `(key, value)` pairs; the caller decides
/// when (and whether) to flush the batch into a store.
#[derive(Debug, Default)]
pub struct WriteBatch {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write to the batch.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.entries.push((key.to_vec(), value.to_vec()));
    }

    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flushes the batch into a store in one atomic call.
    pub fn write_to(&self, store: &dyn KvStore) -> Result<(), KvError> {
        store.batch_put(&self.entries)
    }

    /// Consumes the batch, returning the buffered entries.
    pub fn into_entries(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries
    }
}

/// In-memory key-value store.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(key)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), KvError> {
        let mut map = self.map.write();
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}
