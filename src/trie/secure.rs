//! Secure trie: hashed-key wrapper.
//!
//! All keys are passed through Keccak-256 before touching the underlying
//! trie, so key depth is uniform and attacker-chosen keys cannot build
//! pathologically deep paths. Because hashing is one-way, the original keys
//! are kept in a preimage cache and persisted under a dedicated key prefix
//! at commit time, outside the authenticated structure.

use std::sync::Arc;

use primitive_types::H256;
use rustc_hash::FxHashMap;

use super::hasher::HasherPool;
use super::trie::Trie;
use super::{keccak256, TrieError};
use crate::store::{KvStore, WriteBatch};

/// Store-key prefix for key preimages. Preimage entries live beside trie
/// nodes but do not participate in the root hash.
pub const SECURE_KEY_PREFIX: &[u8] = b"secure-key-";

/// A trie whose keys are hashed before use.
#[derive(Clone)]
pub struct SecureTrie {
    trie: Trie,
    sec_key_cache: FxHashMap<H256, Vec<u8>>,
}

impl SecureTrie {
    /// Opens the secure trie at `root`.
    pub fn new(root: H256, db: Arc<dyn KvStore>) -> Result<Self, TrieError> {
        Ok(Self {
            trie: Trie::new(root, db)?,
            sec_key_cache: FxHashMap::default(),
        })
    }

    /// Opens the secure trie with a shared hasher pool and cache limit.
    pub(crate) fn with_cache(
        root: H256,
        db: Arc<dyn KvStore>,
        pool: HasherPool,
        cache_limit: u64,
    ) -> Result<Self, TrieError> {
        Ok(Self {
            trie: Trie::with_cache(root, db, pool, cache_limit)?,
            sec_key_cache: FxHashMap::default(),
        })
    }

    /// Looks up the value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let hashed = keccak256(key);
        self.trie.get(hashed.as_bytes())
    }

    /// Inserts or updates `key`, remembering its preimage for the next
    /// commit. An empty value deletes the key.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        let hashed = keccak256(key);
        self.sec_key_cache.insert(hashed, key.to_vec());
        self.trie.update(hashed.as_bytes(), value)
    }

    /// Removes `key`.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let hashed = keccak256(key);
        self.trie.delete(hashed.as_bytes())
    }

    /// Recovers the original key for a hashed key, from the preimage cache
    /// or the backing store. Returns `Ok(None)` when the preimage was never
    /// recorded.
    pub fn get_key(&self, key_hash: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        if key_hash.len() == super::HASH_SIZE {
            if let Some(key) = self.sec_key_cache.get(&H256::from_slice(key_hash)) {
                return Ok(Some(key.clone()));
            }
        }
        Ok(self.trie.db().get(&Self::secure_key(key_hash))?)
    }

    /// Computes the root hash without persisting anything.
    pub fn hash(&mut self) -> H256 {
        self.trie.hash()
    }

    /// Commits the trie to `batch`, flushing cached key preimages alongside
    /// the nodes.
    pub fn commit_to(&mut self, batch: &mut WriteBatch) -> H256 {
        for (hashed, key) in self.sec_key_cache.drain() {
            batch.put(&Self::secure_key(hashed.as_bytes()), &key);
        }
        self.trie.commit_to(batch)
    }

    /// Serializes the resolved portion of the underlying trie.
    pub fn serialize(&self) -> Vec<u8> {
        self.trie.serialize()
    }

    fn secure_key(key_hash: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SECURE_KEY_PREFIX.len() + key_hash.len());
        buf.extend_from_slice(SECURE_KEY_PREFIX);
        buf.extend_from_slice(key_hash);
        buf
    }
}
