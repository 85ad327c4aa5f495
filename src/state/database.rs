//! Caching database between the state layer and the backing store.
//!
//! [`Database`] wraps a [`KvStore`] and caches what the state layer reuses
//! across blocks: a small ring of recently committed account tries (reopened
//! by root hash with their node caches intact) and an LRU of contract code
//! sizes. Storage tries are per-account and too numerous to ring-cache;
//! they are always opened fresh.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use primitive_types::H256;
use tracing::debug;

use super::account::EMPTY_CODE_HASH;
use crate::store::KvStore;
use crate::trie::{HasherPool, SecureTrie, TrieError};

/// Number of recent account tries kept for reuse.
pub const MAX_PAST_TRIES: usize = 12;

/// Cache generations a clean node survives before it is unloaded.
pub(crate) const MAX_TRIE_CACHE_GEN: u64 = 120;

const CODE_SIZE_CACHE_CAPACITY: usize = 100_000;

/// Shared caching wrapper around a backing store. Clones share caches.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    store: Arc<dyn KvStore>,
    pool: HasherPool,
    past_tries: Mutex<Vec<(H256, SecureTrie)>>,
    code_sizes: Mutex<CodeSizeCache>,
}

impl Database {
    /// Wraps a backing store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                store,
                pool: HasherPool::new(),
                past_tries: Mutex::new(Vec::new()),
                code_sizes: Mutex::new(CodeSizeCache::new(CODE_SIZE_CACHE_CAPACITY)),
            }),
        }
    }

    /// The wrapped backing store.
    pub fn store(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.inner.store)
    }

    /// Opens the account trie at `root`, reusing a recently committed trie
    /// (with its node cache) when one matches.
    pub fn open_trie(&self, root: H256) -> Result<SecureTrie, TrieError> {
        {
            let past = self.inner.past_tries.lock();
            for (past_root, trie) in past.iter().rev() {
                if *past_root == root {
                    debug!(?root, "reusing cached account trie");
                    return Ok(trie.clone());
                }
            }
        }
        debug!(?root, "opening account trie from store");
        SecureTrie::with_cache(
            root,
            self.store(),
            self.inner.pool.clone(),
            MAX_TRIE_CACHE_GEN,
        )
    }

    /// Opens a contract storage trie at `root`. Storage tries bypass the
    /// past-tries ring and run without generational unloading.
    pub fn open_storage_trie(&self, _addr_hash: H256, root: H256) -> Result<SecureTrie, TrieError> {
        SecureTrie::with_cache(root, self.store(), self.inner.pool.clone(), 0)
    }

    /// Independent copy of a trie.
    pub fn copy_trie(&self, trie: &SecureTrie) -> SecureTrie {
        trie.clone()
    }

    /// Loads contract code by hash, recording its size in the cache.
    pub fn contract_code(&self, _addr_hash: H256, code_hash: H256) -> Result<Vec<u8>, TrieError> {
        if code_hash == EMPTY_CODE_HASH {
            return Ok(Vec::new());
        }
        let code = self
            .inner
            .store
            .get(code_hash.as_bytes())?
            .ok_or(TrieError::MissingNode {
                hash: code_hash,
                path: Vec::new(),
            })?;
        self.inner.code_sizes.lock().insert(code_hash, code.len());
        Ok(code)
    }

    /// Size of contract code by hash, served from the cache when possible.
    pub fn contract_code_size(
        &self,
        addr_hash: H256,
        code_hash: H256,
    ) -> Result<usize, TrieError> {
        if let Some(size) = self.inner.code_sizes.lock().get(&code_hash) {
            return Ok(size);
        }
        Ok(self.contract_code(addr_hash, code_hash)?.len())
    }

    /// Records a freshly committed account trie in the ring.
    pub(crate) fn push_trie(&self, root: H256, trie: SecureTrie) {
        let mut past = self.inner.past_tries.lock();
        if past.len() >= MAX_PAST_TRIES {
            past.remove(0);
        }
        past.push((root, trie));
    }
}

/// Code-size LRU keyed by code hash.
struct CodeSizeCache {
    sizes: HashMap<H256, usize>,
    order: VecDeque<H256>,
    capacity: usize,
}

impl CodeSizeCache {
    fn new(capacity: usize) -> Self {
        Self {
            sizes: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&mut self, code_hash: &H256) -> Option<usize> {
        let size = *self.sizes.get(code_hash)?;
        if let Some(idx) = self.order.iter().position(|h| h == code_hash) {
            self.order.remove(idx);
            self.order.push_back(*code_hash);
        }
        Some(size)
    }

    fn insert(&mut self, code_hash: H256, size: usize) {
        if self.sizes.insert(code_hash, size).is_none() {
            self.order.push_back(code_hash);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.sizes.remove(&evicted);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::trie::{keccak256, EMPTY_ROOT};

    #[test]
    fn test_open_trie_empty_root() {
        let db = Database::new(Arc::new(MemoryStore::new()));
        assert!(db.open_trie(EMPTY_ROOT).is_ok());
        assert!(db.open_trie(H256::zero()).is_ok());
    }

    #[test]
    fn test_open_trie_unknown_root_fails() {
        let db = Database::new(Arc::new(MemoryStore::new()));
        let missing = keccak256(b"unknown");
        match db.open_trie(missing) {
            Err(TrieError::MissingNode { hash, .. }) => assert_eq!(hash, missing),
            other => panic!("expected missing node, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_contract_code_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let code = b"contract bytecode".to_vec();
        let code_hash = keccak256(&code);
        store.put(code_hash.as_bytes(), &code).unwrap();

        let db = Database::new(store);
        let addr_hash = keccak256(b"addr");
        assert_eq!(db.contract_code(addr_hash, code_hash).unwrap(), code);
        // Size now served from the cache.
        assert_eq!(
            db.contract_code_size(addr_hash, code_hash).unwrap(),
            code.len()
        );
    }

    #[test]
    fn test_contract_code_empty_hash() {
        let db = Database::new(Arc::new(MemoryStore::new()));
        let addr_hash = keccak256(b"addr");
        assert!(db
            .contract_code(addr_hash, EMPTY_CODE_HASH)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_past_tries_ring_bounded() {
        let store = Arc::new(MemoryStore::new());
        let db = Database::new(Arc::clone(&store) as Arc<dyn KvStore>);
        for i in 0..(MAX_PAST_TRIES + 4) {
            let trie = SecureTrie::new(EMPTY_ROOT, store.clone()).unwrap();
            db.push_trie(H256::from_low_u64_be(i as u64), trie);
        }
        assert_eq!(db.inner.past_tries.lock().len(), MAX_PAST_TRIES);
    }

    #[test]
    fn test_code_size_cache_evicts() {
        let mut cache = CodeSizeCache::new(2);
        cache.insert(H256::from_low_u64_be(1), 10);
        cache.insert(H256::from_low_u64_be(2), 20);
        cache.insert(H256::from_low_u64_be(3), 30);
        assert_eq!(cache.get(&H256::from_low_u64_be(1)), None);
        assert_eq!(cache.get(&H256::from_low_u64_be(2)), Some(20));
        assert_eq!(cache.get(&H256::from_low_u64_be(3)), Some(30));
    }
}
