//! Merkle-Patricia Trie.
//!
//! This module implements the authenticated radix trie: node model, the two
//! node encodings (canonical hash encoding and tree-shaped persistence
//! encoding), recursive hashing with the inline-vs-spill threshold, and the
//! trie itself plus its secure (hashed-key) wrapper.

mod encoding;
mod hasher;
mod nibbles;
mod node;
mod secure;
#[allow(clippy::module_inception)]
mod trie;


use thiserror::Error;
use tiny_keccak::{Hasher as _, Keccak};

use primitive_types::H256;

pub use encoding::{RlpEncoder, RlpError};
pub use secure::{SecureTrie, SECURE_KEY_PREFIX};
pub use trie::Trie;

pub(crate) use encoding::{decode_item, RlpItem};
pub(crate) use hasher::HasherPool;

use crate::store::KvError;

/// Hash size (Keccak-256).
pub const HASH_SIZE: usize = 32;

/// The empty trie root hash (keccak of RLP empty string).
pub const EMPTY_ROOT: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);

/// Computes the Keccak-256 hash of data.
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; HASH_SIZE];
    hasher.finalize(&mut hash);
    H256(hash)
}

/// Trie errors.
///
/// `MissingNode` is recoverable: the referenced node exists somewhere (the
/// root commits to it) but not in this store, so the caller may fetch it
/// elsewhere and retry. `Decode` means the stored bytes for a node are
/// malformed and is always propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrieError {
    /// A referenced node is absent from the backing store.
    #[error("missing trie node {hash:?} (path {path:?})")]
    MissingNode {
        /// Hash of the missing node.
        hash: H256,
        /// Nibble path at which the node was needed.
        path: Vec<u8>,
    },

    /// Persisted node bytes failed to decode.
    #[error("failed to decode node {hash:?} (path {path:?}): {source}")]
    Decode {
        /// Hash the bytes were loaded under.
        hash: H256,
        /// Nibble path at which the node was being resolved.
        path: Vec<u8>,
        /// Root cause.
        source: RlpError,
    },

    /// The backing store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
}
