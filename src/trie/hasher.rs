//! Recursive node hashing.
//!
//! The hasher folds a node tree bottom-up into its canonical hash encoding.
//! Children whose encoding is shorter than a hash are embedded verbatim in
//! the parent; larger children are replaced by their Keccak-256 hash and,
//! when a writer is supplied, persisted under that hash. The root is always
//! hashed regardless of size (`force`).
//!
//! Hashing also rebuilds the cached tree: every visited node comes back with
//! its hash recorded in its flags, and nodes that are clean and older than
//! the cache limit are replaced by bare hash references so committed
//! generations can be dropped from memory.

use std::sync::Arc;

use parking_lot::Mutex;
use primitive_types::H256;

use super::encoding::RlpEncoder;
use super::nibbles::compact_encode;
use super::node::{Node, NodeFlags};
use super::{keccak256, HASH_SIZE};
use crate::store::WriteBatch;

/// Result of collapsing a node: either spilled to the store under its hash,
/// or small enough to ride along inside its parent's encoding.
pub(crate) enum NodeRef {
    Hash(H256),
    Inline(Vec<u8>),
}

impl NodeRef {
    /// The hash this reference commits to. Inline encodings are hashed on
    /// demand; only the root (which is always spilled) normally needs this.
    pub(crate) fn as_hash(&self) -> H256 {
        match self {
            NodeRef::Hash(h) => *h,
            NodeRef::Inline(data) => keccak256(data),
        }
    }

    fn write_into(&self, enc: &mut RlpEncoder) {
        match self {
            NodeRef::Hash(h) => enc.encode_bytes(h.as_bytes()),
            NodeRef::Inline(data) => enc.encode_raw(data),
        }
    }
}

/// Bottom-up hasher over a node tree.
pub(crate) struct Hasher {
    enc: RlpEncoder,
    cache_gen: u64,
    cache_limit: u64,
}

impl Hasher {
    fn new(enc: RlpEncoder, cache_gen: u64, cache_limit: u64) -> Self {
        Self {
            enc,
            cache_gen,
            cache_limit,
        }
    }

    /// Collapses `node` into a [`NodeRef`] and returns the rebuilt cached
    /// node alongside it.
    ///
    /// With a writer, every spilled node is appended to the batch and comes
    /// back clean; without one, hashes are computed and cached but dirty
    /// bits are left alone so a later commit still persists everything.
    pub(crate) fn hash(
        &mut self,
        node: &Arc<Node>,
        mut writer: Option<&mut WriteBatch>,
        force: bool,
    ) -> (NodeRef, Arc<Node>) {
        if let Some(flags) = node.cache() {
            if let Some(hash) = flags.hash {
                if !flags.dirty {
                    return (NodeRef::Hash(hash), self.unload_or_keep(node, hash, flags));
                }
                if writer.is_none() {
                    return (NodeRef::Hash(hash), Arc::clone(node));
                }
            }
        }

        match node.as_ref() {
            Node::Hash(h) => (NodeRef::Hash(*h), Arc::clone(node)),

            Node::Short { key, val, flags } => {
                let compact = compact_encode(key);
                let (child_ref, cached_val) = match val.as_ref() {
                    // Leaf values are plain byte strings, not child nodes.
                    Node::Value(_) => (None, Arc::clone(val)),
                    _ => {
                        let (r, c) = self.hash(val, writer.as_mut().map(|w| &mut **w), false);
                        (Some(r), c)
                    }
                };

                self.enc.clear();
                self.enc.encode_list(|e| {
                    e.encode_bytes(&compact);
                    match (&child_ref, cached_val.as_ref()) {
                        (Some(r), _) => r.write_into(e),
                        (None, Node::Value(v)) => e.encode_bytes(v),
                        (None, _) => unreachable!("leaf child is always a value"),
                    }
                });
                let encoded = self.enc.as_bytes().to_vec();

                let (node_ref, new_flags) = self.store(encoded, writer, force, flags);
                let cached = Arc::new(Node::Short {
                    key: key.clone(),
                    val: cached_val,
                    flags: new_flags,
                });
                (node_ref, cached)
            }

            Node::Branch { children, flags } => {
                let mut child_refs: [Option<NodeRef>; 16] = Default::default();
                let mut cached_children: [Option<Arc<Node>>; 17] =
                    std::array::from_fn(|_| None);
                for i in 0..16 {
                    if let Some(child) = &children[i] {
                        let (r, c) = self.hash(child, writer.as_mut().map(|w| &mut **w), false);
                        child_refs[i] = Some(r);
                        cached_children[i] = Some(c);
                    }
                }
                cached_children[16] = children[16].clone();

                self.enc.clear();
                self.enc.encode_list(|e| {
                    for r in &child_refs {
                        match r {
                            Some(r) => r.write_into(e),
                            None => e.encode_empty(),
                        }
                    }
                    match children[16].as_deref() {
                        Some(Node::Value(v)) => e.encode_bytes(v),
                        Some(_) => unreachable!("branch value slot holds a non-value node"),
                        None => e.encode_empty(),
                    }
                });
                let encoded = self.enc.as_bytes().to_vec();

                let (node_ref, new_flags) = self.store(encoded, writer, force, flags);
                let cached = Arc::new(Node::Branch {
                    children: Box::new(cached_children),
                    flags: new_flags,
                });
                (node_ref, cached)
            }

            Node::Value(_) => unreachable!("value nodes are encoded by their parent"),
        }
    }

    /// Applies the inline-vs-spill rule to a finished encoding and derives
    /// the flags for the rebuilt node.
    fn store(
        &mut self,
        encoded: Vec<u8>,
        writer: Option<&mut WriteBatch>,
        force: bool,
        old: &NodeFlags,
    ) -> (NodeRef, NodeFlags) {
        if encoded.len() < HASH_SIZE && !force {
            let flags = NodeFlags {
                hash: None,
                dirty: old.dirty && writer.is_none(),
                gen: old.gen,
            };
            return (NodeRef::Inline(encoded), flags);
        }

        let hash = keccak256(&encoded);
        let committed = match writer {
            Some(batch) => {
                batch.put(hash.as_bytes(), &encoded);
                true
            }
            None => false,
        };
        let flags = NodeFlags {
            hash: Some(hash),
            dirty: old.dirty && !committed,
            gen: old.gen,
        };
        (NodeRef::Hash(hash), flags)
    }

    /// Replaces a clean node from an old enough generation with a bare hash
    /// reference. A limit of zero disables unloading.
    fn unload_or_keep(&self, node: &Arc<Node>, hash: H256, flags: &NodeFlags) -> Arc<Node> {
        if self.cache_limit > 0 && self.cache_gen.saturating_sub(flags.gen) >= self.cache_limit {
            Arc::new(Node::Hash(hash))
        } else {
            Arc::clone(node)
        }
    }
}

/// Shared pool of RLP encoders so repeated hashing reuses buffers.
#[derive(Clone, Default)]
pub(crate) struct HasherPool {
    encoders: Arc<Mutex<Vec<RlpEncoder>>>,
}

impl HasherPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Checks out a hasher for one hashing pass.
    pub(crate) fn hasher(&self, cache_gen: u64, cache_limit: u64) -> Hasher {
        let enc = self.encoders.lock().pop().unwrap_or_default();
        Hasher::new(enc, cache_gen, cache_limit)
    }

    /// Returns a hasher's encoder to the pool.
    pub(crate) fn put_back(&self, mut hasher: Hasher) {
        hasher.enc.clear();
        self.encoders.lock().push(hasher.enc);
    }
}
