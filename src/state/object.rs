//! Per-account mutable state.
//!
//! A [`StateObject`] wraps one account while it is being read or mutated:
//! the decoded account record, lazily loaded code, a lazily opened storage
//! trie, and two storage maps. `cached_storage` mirrors committed slots for
//! cheap re-reads; `dirty_storage` holds pending writes until they are
//! flushed into the storage trie at finalization or commit.

use primitive_types::{H160, H256, U256};
use rustc_hash::FxHashMap;

use super::account::{trim_leading_zeros, Account, EMPTY_CODE_HASH};
use super::database::Database;
use crate::store::WriteBatch;
use crate::trie::{keccak256, SecureTrie, TrieError, HASH_SIZE};

/// One account under mutation.
#[derive(Clone)]
pub struct StateObject {
    address: H160,
    addr_hash: H256,
    account: Account,
    code: Option<Vec<u8>>,
    storage_trie: Option<SecureTrie>,
    cached_storage: FxHashMap<H256, H256>,
    dirty_storage: FxHashMap<H256, H256>,
    dirty_code: bool,
    suicided: bool,
    deleted: bool,
}

impl StateObject {
    pub(crate) fn new(address: H160, account: Account) -> Self {
        Self {
            address,
            addr_hash: keccak256(address.as_bytes()),
            account,
            code: None,
            storage_trie: None,
            cached_storage: FxHashMap::default(),
            dirty_storage: FxHashMap::default(),
            dirty_code: false,
            suicided: false,
            deleted: false,
        }
    }

    pub fn address(&self) -> H160 {
        self.address
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn balance(&self) -> U256 {
        self.account.balance
    }

    pub fn nonce(&self) -> u64 {
        self.account.nonce
    }

    pub fn code_hash(&self) -> H256 {
        self.account.code_hash
    }

    /// True when the account carries no nonce, balance or code.
    pub fn is_empty(&self) -> bool {
        self.account.is_empty()
    }

    pub(crate) fn is_suicided(&self) -> bool {
        self.suicided
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub(crate) fn set_balance(&mut self, balance: U256) {
        self.account.balance = balance;
    }

    pub(crate) fn add_balance(&mut self, amount: U256) {
        self.account.balance = self.account.balance.saturating_add(amount);
    }

    pub(crate) fn sub_balance(&mut self, amount: U256) {
        self.account.balance = self.account.balance.saturating_sub(amount);
    }

    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.account.nonce = nonce;
    }

    /// Marks the account self-destructed: balance drops to zero and the
    /// account is removed from the trie at the next finalization.
    pub(crate) fn suicide(&mut self) {
        self.suicided = true;
        self.account.balance = U256::zero();
    }

    /// Replaces the account's code, updating the code hash.
    pub(crate) fn set_code(&mut self, code: Vec<u8>) {
        self.account.code_hash = keccak256(&code);
        self.code = Some(code);
        self.dirty_code = true;
    }

    /// Loads the account's code, from the object cache or the database.
    pub(crate) fn code(&mut self, db: &Database) -> Result<Vec<u8>, TrieError> {
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        if self.account.code_hash == EMPTY_CODE_HASH {
            return Ok(Vec::new());
        }
        let code = db.contract_code(self.addr_hash, self.account.code_hash)?;
        self.code = Some(code.clone());
        Ok(code)
    }

    /// Size of the account's code: in-memory code first (covers code set
    /// but not yet committed), then the database size cache.
    pub(crate) fn code_size(&self, db: &Database) -> Result<usize, TrieError> {
        if let Some(code) = &self.code {
            return Ok(code.len());
        }
        if self.account.code_hash == EMPTY_CODE_HASH {
            return Ok(0);
        }
        db.contract_code_size(self.addr_hash, self.account.code_hash)
    }

    /// Takes pending code for persistence, clearing the dirty marker.
    pub(crate) fn take_dirty_code(&mut self) -> Option<(H256, Vec<u8>)> {
        if !self.dirty_code {
            return None;
        }
        self.dirty_code = false;
        self.code
            .clone()
            .map(|code| (self.account.code_hash, code))
    }

    /// Reads a storage slot: pending writes first, then the slot cache,
    /// then the storage trie. Absent slots read as zero.
    pub(crate) fn get_state(&mut self, db: &Database, key: H256) -> Result<H256, TrieError> {
        if let Some(value) = self.dirty_storage.get(&key) {
            return Ok(*value);
        }
        if let Some(value) = self.cached_storage.get(&key) {
            return Ok(*value);
        }
        let trie = self.storage_trie(db)?;
        let value = match trie.get(key.as_bytes())? {
            None => H256::zero(),
            Some(bytes) => expand_slot_value(&bytes)?,
        };
        self.cached_storage.insert(key, value);
        Ok(value)
    }

    /// Buffers a storage write. A zero value deletes the slot when the
    /// buffer is flushed.
    pub(crate) fn set_state(&mut self, key: H256, value: H256) {
        self.dirty_storage.insert(key, value);
    }

    /// Flushes buffered storage writes into the storage trie.
    pub(crate) fn update_storage(&mut self, db: &Database) -> Result<(), TrieError> {
        if self.dirty_storage.is_empty() {
            return Ok(());
        }
        let pending: Vec<(H256, H256)> = self.dirty_storage.drain().collect();
        let trie = self.storage_trie(db)?;
        for (key, value) in &pending {
            if value.is_zero() {
                trie.delete(key.as_bytes())?;
            } else {
                let mut bytes = [0u8; HASH_SIZE];
                bytes.copy_from_slice(value.as_bytes());
                trie.update(key.as_bytes(), trim_leading_zeros(&bytes))?;
            }
        }
        self.cached_storage.extend(pending);
        Ok(())
    }

    /// Flushes storage writes and refreshes the account's storage root.
    pub(crate) fn update_root(&mut self, db: &Database) -> Result<(), TrieError> {
        self.update_storage(db)?;
        if let Some(trie) = &mut self.storage_trie {
            self.account.storage_root = trie.hash();
        }
        Ok(())
    }

    /// Flushes storage writes and commits the storage trie into `batch`.
    pub(crate) fn commit_storage(
        &mut self,
        db: &Database,
        batch: &mut WriteBatch,
    ) -> Result<(), TrieError> {
        self.update_storage(db)?;
        if let Some(trie) = &mut self.storage_trie {
            self.account.storage_root = trie.commit_to(batch);
        }
        Ok(())
    }

    fn storage_trie(&mut self, db: &Database) -> Result<&mut SecureTrie, TrieError> {
        if self.storage_trie.is_none() {
            let trie = db.open_storage_trie(self.addr_hash, self.account.storage_root)?;
            self.storage_trie = Some(trie);
        }
        Ok(self
            .storage_trie
            .as_mut()
            .expect("storage trie just opened"))
    }
}

/// Left-pads a trimmed big-endian slot value back to 32 bytes.
fn expand_slot_value(bytes: &[u8]) -> Result<H256, TrieError> {
    if bytes.len() > HASH_SIZE {
        // Stored by a different writer; slot values are at most one word.
        return Err(TrieError::Decode {
            hash: H256::zero(),
            path: Vec::new(),
            source: crate::trie::RlpError::Unexpected("storage value wider than 32 bytes"),
        });
    }
    let mut padded = [0u8; HASH_SIZE];
    padded[HASH_SIZE - bytes.len()..].copy_from_slice(bytes);
    Ok(H256(padded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_slot_value_pads_left() {
        let value = expand_slot_value(&[0x12, 0x34]).unwrap();
        assert_eq!(value, H256::from_low_u64_be(0x1234));
        assert_eq!(expand_slot_value(&[]).unwrap(), H256::zero());
        assert!(expand_slot_value(&[0xFF; 33]).is_err());
    }

    #[test]
    fn test_suicide_zeroes_balance() {
        let mut object = StateObject::new(H160::repeat_byte(1), Account::new());
        object.set_balance(U256::from(100));
        object.suicide();
        assert!(object.is_suicided());
        assert!(object.balance().is_zero());
    }

    #[test]
    fn test_set_code_updates_hash() {
        let mut object = StateObject::new(H160::repeat_byte(1), Account::new());
        assert_eq!(object.code_hash(), EMPTY_CODE_HASH);

        object.set_code(b"contract".to_vec());
        assert_eq!(object.code_hash(), keccak256(b"contract"));
        let (hash, code) = object.take_dirty_code().unwrap();
        assert_eq!(hash, keccak256(b"contract"));
        assert_eq!(code, b"contract");
        // Taken once.
        assert!(object.take_dirty_code().is_none());
    }

    #[test]
    fn test_balance_arithmetic_saturates() {
        let mut object = StateObject::new(H160::repeat_byte(1), Account::new());
        object.sub_balance(U256::from(5));
        assert!(object.balance().is_zero());

        object.set_balance(U256::MAX);
        object.add_balance(U256::from(1));
        assert_eq!(object.balance(), U256::MAX);
    }
}
