//! # triedb
//!
//! An authenticated world-state store: a Merkle-Patricia Trie over a
//! key-value backing store, a per-account state-object layer on top of it,
//! and a caching database wrapper that makes repeated trie opens cheap.
//!
//! ## Architecture
//!
//! 1. **Trie** - the core radix trie: nibble-path get/update/delete, lazy
//!    resolution of stored nodes, root hashing with the 32-byte
//!    inline-vs-spill threshold, commit to a batch writer.
//! 2. **SecureTrie** - the same surface with keccak-hashed keys, plus a
//!    preimage side channel so original keys stay recoverable.
//! 3. **StateDb** - the transactional facade used by ledgers: tracks touched
//!    accounts, computes intermediate/final state roots, commits atomically,
//!    and supports cheap copy-on-write snapshots.
//!
//! ## Modules
//!
//! - `store` - backing-store contracts and the in-memory store
//! - `trie` - nodes, hashing, the trie itself and its secure wrapper
//! - `state` - accounts, state objects, the caching database and `StateDb`

pub mod state;
pub mod store;
pub mod trie;

pub use state::{Account, Database, StateDb, StateObject, EMPTY_CODE_HASH};
pub use store::{KvError, KvStore, MemoryStore, WriteBatch};
pub use trie::{keccak256, SecureTrie, Trie, TrieError, EMPTY_ROOT, HASH_SIZE};
