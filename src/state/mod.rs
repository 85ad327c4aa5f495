//! World-state layer.
//!
//! [`StateDb`] is the transactional facade over the account trie: reads
//! materialize accounts into in-memory [`StateObject`]s, writes touch only
//! those objects, and nothing reaches the trie until `finalise` folds the
//! dirty set in. `intermediate_root` reports the would-be root without
//! persisting; `commit_to` persists the whole state into a write batch.
//!
//! Internal errors stick: the first trie failure is recorded and reported
//! at commit, so a block's worth of mutations can run without checking
//! every read.

mod account;
mod database;
mod object;

use primitive_types::{H160, H256, U256};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

pub use account::{Account, EMPTY_CODE_HASH};
pub use database::{Database, MAX_PAST_TRIES};
pub use object::StateObject;

use crate::store::WriteBatch;
use crate::trie::{keccak256, SecureTrie, TrieError};

/// Transactional world state over one account trie.
pub struct StateDb {
    db: Database,
    trie: SecureTrie,
    state_objects: FxHashMap<H160, StateObject>,
    dirty_objects: FxHashSet<H160>,
    err: Option<TrieError>,
}

impl StateDb {
    /// Opens the state at `root`.
    pub fn new(root: H256, db: Database) -> Result<Self, TrieError> {
        let trie = db.open_trie(root)?;
        Ok(Self {
            db,
            trie,
            state_objects: FxHashMap::default(),
            dirty_objects: FxHashSet::default(),
            err: None,
        })
    }

    /// The first internal error encountered, if any.
    pub fn error(&self) -> Option<&TrieError> {
        self.err.as_ref()
    }

    /// Records an internal error; only the first one is kept.
    fn set_error(&mut self, err: TrieError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// True when the account exists (including empty accounts).
    pub fn exist(&mut self, address: H160) -> bool {
        self.object_mut(address).is_some()
    }

    /// True when the account is absent or carries no state.
    pub fn empty(&mut self, address: H160) -> bool {
        self.object_mut(address).map_or(true, |obj| obj.is_empty())
    }

    pub fn get_balance(&mut self, address: H160) -> U256 {
        self.object_mut(address)
            .map_or_else(U256::zero, |obj| obj.balance())
    }

    pub fn get_nonce(&mut self, address: H160) -> u64 {
        self.object_mut(address).map_or(0, |obj| obj.nonce())
    }

    pub fn get_code_hash(&mut self, address: H160) -> H256 {
        self.object_mut(address)
            .map_or_else(H256::zero, |obj| obj.code_hash())
    }

    pub fn get_code(&mut self, address: H160) -> Vec<u8> {
        let db = self.db.clone();
        let result = match self.object_mut(address) {
            None => return Vec::new(),
            Some(obj) => obj.code(&db),
        };
        match result {
            Ok(code) => code,
            Err(err) => {
                self.set_error(err);
                Vec::new()
            }
        }
    }

    pub fn get_code_size(&mut self, address: H160) -> usize {
        let db = self.db.clone();
        let result = match self.object_mut(address) {
            None => return 0,
            Some(obj) => obj.code_size(&db),
        };
        match result {
            Ok(size) => size,
            Err(err) => {
                self.set_error(err);
                0
            }
        }
    }

    /// Reads a storage slot. Absent slots and accounts read as zero.
    pub fn get_state(&mut self, address: H160, key: H256) -> H256 {
        let db = self.db.clone();
        let result = match self.object_mut(address) {
            None => return H256::zero(),
            Some(obj) => obj.get_state(&db, key),
        };
        match result {
            Ok(value) => value,
            Err(err) => {
                self.set_error(err);
                H256::zero()
            }
        }
    }

    pub fn has_suicided(&mut self, address: H160) -> bool {
        self.object_mut(address)
            .map_or(false, |obj| obj.is_suicided())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn add_balance(&mut self, address: H160, amount: U256) {
        self.object_mut_or_new(address).add_balance(amount);
        self.dirty_objects.insert(address);
    }

    pub fn sub_balance(&mut self, address: H160, amount: U256) {
        self.object_mut_or_new(address).sub_balance(amount);
        self.dirty_objects.insert(address);
    }

    pub fn set_balance(&mut self, address: H160, balance: U256) {
        self.object_mut_or_new(address).set_balance(balance);
        self.dirty_objects.insert(address);
    }

    pub fn set_nonce(&mut self, address: H160, nonce: u64) {
        self.object_mut_or_new(address).set_nonce(nonce);
        self.dirty_objects.insert(address);
    }

    pub fn set_code(&mut self, address: H160, code: Vec<u8>) {
        self.object_mut_or_new(address).set_code(code);
        self.dirty_objects.insert(address);
    }

    /// Buffers a storage write. A zero value deletes the slot.
    pub fn set_state(&mut self, address: H160, key: H256, value: H256) {
        self.object_mut_or_new(address).set_state(key, value);
        self.dirty_objects.insert(address);
    }

    /// Marks the account self-destructed. Returns false when the account
    /// does not exist.
    pub fn suicide(&mut self, address: H160) -> bool {
        match self.object_mut(address) {
            None => false,
            Some(obj) => {
                obj.suicide();
                self.dirty_objects.insert(address);
                true
            }
        }
    }

    // ========================================================================
    // Finalization and commit
    // ========================================================================

    /// Folds every dirty object into the account trie.
    ///
    /// Suicided accounts, and empty accounts when `delete_empty` is set,
    /// are removed from the trie instead. The dirty set is retained so a
    /// later commit still persists storage tries and code.
    pub fn finalise(&mut self, delete_empty: bool) {
        let db = self.db.clone();
        let mut first_err = None;
        let addresses: Vec<H160> = self.dirty_objects.iter().copied().collect();
        for address in addresses {
            let Some(obj) = self.state_objects.get_mut(&address) else {
                continue;
            };
            if obj.is_suicided() || (delete_empty && obj.is_empty()) {
                if let Err(err) = self.trie.delete(address.as_bytes()) {
                    first_err.get_or_insert(err);
                }
                obj.mark_deleted();
            } else {
                if let Err(err) = obj.update_root(&db) {
                    first_err.get_or_insert(err);
                    continue;
                }
                if let Err(err) = self.trie.update(address.as_bytes(), &obj.account().encode()) {
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err {
            self.set_error(err);
        }
    }

    /// Root hash the state would commit to, without persisting anything.
    pub fn intermediate_root(&mut self, delete_empty: bool) -> H256 {
        self.finalise(delete_empty);
        self.trie.hash()
    }

    /// Commits the whole state into `batch`: contract code, storage tries,
    /// then the account trie. Returns the new state root.
    ///
    /// Fails if any internal error was recorded during this transaction.
    pub fn commit_to(
        &mut self,
        batch: &mut WriteBatch,
        delete_empty: bool,
    ) -> Result<H256, TrieError> {
        let db = self.db.clone();
        let mut first_err = None;
        let addresses: Vec<H160> = self.dirty_objects.drain().collect();
        for address in addresses {
            let Some(obj) = self.state_objects.get_mut(&address) else {
                continue;
            };
            if obj.is_suicided() || (delete_empty && obj.is_empty()) {
                if let Err(err) = self.trie.delete(address.as_bytes()) {
                    first_err.get_or_insert(err);
                }
                obj.mark_deleted();
            } else {
                if let Some((code_hash, code)) = obj.take_dirty_code() {
                    batch.put(code_hash.as_bytes(), &code);
                }
                if let Err(err) = obj.commit_storage(&db, batch) {
                    first_err.get_or_insert(err);
                    continue;
                }
                if let Err(err) = self.trie.update(address.as_bytes(), &obj.account().encode()) {
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err {
            self.set_error(err);
        }
        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        let root = self.trie.commit_to(batch);
        self.db.push_trie(root, self.trie.clone());
        debug!(?root, writes = batch.len(), "state committed");
        Ok(root)
    }

    /// Independent snapshot of the state.
    ///
    /// Dirty objects are deep-copied; clean state is shared structurally
    /// through the trie, which never mutates nodes in place.
    pub fn copy(&self) -> StateDb {
        let mut state_objects = FxHashMap::default();
        for address in &self.dirty_objects {
            if let Some(obj) = self.state_objects.get(address) {
                state_objects.insert(*address, obj.clone());
            }
        }
        StateDb {
            db: self.db.clone(),
            trie: self.db.copy_trie(&self.trie),
            state_objects,
            dirty_objects: self.dirty_objects.clone(),
            err: self.err.clone(),
        }
    }

    // ========================================================================
    // Object materialization
    // ========================================================================

    /// Loads the account into the object map if needed. Returns `None` for
    /// absent or already-deleted accounts.
    fn object_mut(&mut self, address: H160) -> Option<&mut StateObject> {
        if !self.state_objects.contains_key(&address) {
            let data = match self.trie.get(address.as_bytes()) {
                Ok(data) => data,
                Err(err) => {
                    self.set_error(err);
                    return None;
                }
            };
            let account = match data {
                None => return None,
                Some(bytes) => match Account::decode(&bytes) {
                    Ok(account) => account,
                    Err(source) => {
                        let err = TrieError::Decode {
                            hash: keccak256(address.as_bytes()),
                            path: Vec::new(),
                            source,
                        };
                        self.set_error(err);
                        return None;
                    }
                },
            };
            self.state_objects
                .insert(address, StateObject::new(address, account));
        }
        self.state_objects
            .get_mut(&address)
            .filter(|obj| !obj.is_deleted())
    }

    /// Like [`Self::object_mut`], but creates a fresh account when absent
    /// or deleted.
    fn object_mut_or_new(&mut self, address: H160) -> &mut StateObject {
        if self.object_mut(address).is_none() {
            self.state_objects
                .insert(address, StateObject::new(address, Account::new()));
        }
        self.state_objects
            .get_mut(&address)
            .expect("object just inserted")
    }
}
