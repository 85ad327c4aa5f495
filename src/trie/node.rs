//! Trie node model.
//!
//! Nodes form a sum type: branches (17 child slots, the 17th holding a value
//! that terminates exactly at the branch), short nodes (a shared nibble run
//! over a single child; a leaf when the run is terminated), hash references
//! into the backing store, and raw values.
//!
//! Two encodings coexist by design. The canonical RLP *hash encoding*
//! (produced by the hasher, decoded here by [`Node::decode`]) is
//! content-addressed and stored under the node's hash. The *persistence
//! encoding* ([`encode_stored`]/[`decode_stored`]) serializes an
//! already-resolved subtree as one self-contained value, used when a whole
//! subtree travels as a single storage entry.

use std::sync::Arc;

use primitive_types::H256;

use super::encoding::{decode_item, RlpError, RlpItem};
use super::nibbles::{compact_decode, has_terminator};
use super::HASH_SIZE;

/// Per-node bookkeeping: cached hash, dirty bit, cache generation.
///
/// The cached hash is valid once computed and not subsequently mutated; the
/// generation is compared against the trie's current generation to decide
/// when a clean, committed node may be dropped from memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct NodeFlags {
    /// Cached hash of the node's canonical encoding, if computed.
    pub hash: Option<H256>,
    /// True while the node differs from its persisted form.
    pub dirty: bool,
    /// Cache generation the node was created or loaded in.
    pub gen: u64,
}

impl NodeFlags {
    /// Flags for a node freshly loaded from the store under `hash`.
    pub(crate) fn loaded(hash: H256, gen: u64) -> Self {
        Self {
            hash: Some(hash),
            dirty: false,
            gen,
        }
    }
}

/// A node in the Merkle-Patricia trie.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    /// Branch node: 16 nibble children plus the value slot (index 16).
    /// Absent children are `None`, never a placeholder.
    Branch {
        children: Box<[Option<Arc<Node>>; 17]>,
        flags: NodeFlags,
    },
    /// Short node: a nibble run over a single child. An extension when the
    /// run is unterminated (child is another node), a leaf when the run
    /// ends with the terminator (child is a value).
    Short {
        key: Vec<u8>,
        val: Arc<Node>,
        flags: NodeFlags,
    },
    /// Reference to a node persisted separately in the backing store.
    Hash(H256),
    /// Raw value bytes.
    Value(Vec<u8>),
}

impl Node {
    /// Returns the cached hash and dirty bit for branch/short nodes.
    pub(crate) fn cache(&self) -> Option<&NodeFlags> {
        match self {
            Node::Branch { flags, .. } | Node::Short { flags, .. } => Some(flags),
            Node::Hash(_) | Node::Value(_) => None,
        }
    }

    /// Decodes a node from its canonical hash encoding.
    ///
    /// `hash` is the key the bytes were loaded under; reconstructed nodes
    /// carry it in their flags together with the current cache generation.
    pub(crate) fn decode(data: &[u8], hash: Option<H256>, gen: u64) -> Result<Node, RlpError> {
        let item = decode_item(data)?;
        decode_node_item(&item, hash, gen)
    }
}

fn decode_node_item(item: &RlpItem<'_>, hash: Option<H256>, gen: u64) -> Result<Node, RlpError> {
    let items = match item {
        RlpItem::List(items, _) => items,
        RlpItem::Bytes(_) => return Err(RlpError::Unexpected("node must be an rlp list")),
    };
    let flags = match hash {
        Some(h) => NodeFlags::loaded(h, gen),
        None => NodeFlags {
            hash: None,
            dirty: false,
            gen,
        },
    };

    match items.len() {
        2 => {
            let compact = items[0].as_bytes()?;
            let key =
                compact_decode(compact).ok_or(RlpError::Unexpected("malformed hex-prefix key"))?;
            let val = if has_terminator(&key) {
                Arc::new(Node::Value(items[1].as_bytes()?.to_vec()))
            } else {
                decode_child(&items[1], gen)?
                    .ok_or(RlpError::Unexpected("extension child is empty"))?
            };
            Ok(Node::Short { key, val, flags })
        }
        17 => {
            let mut children: [Option<Arc<Node>>; 17] = std::array::from_fn(|_| None);
            for (i, child) in items.iter().take(16).enumerate() {
                children[i] = decode_child(child, gen)?;
            }
            let value = items[16].as_bytes()?;
            if !value.is_empty() {
                children[16] = Some(Arc::new(Node::Value(value.to_vec())));
            }
            Ok(Node::Branch {
                children: Box::new(children),
                flags,
            })
        }
        _ => Err(RlpError::Unexpected("node list must have 2 or 17 items")),
    }
}

/// Decodes a child reference: empty (absent), a 32-byte hash, or an inline
/// node whose whole encoding was smaller than a hash.
fn decode_child(item: &RlpItem<'_>, gen: u64) -> Result<Option<Arc<Node>>, RlpError> {
    match item {
        RlpItem::Bytes(b) if b.is_empty() => Ok(None),
        RlpItem::Bytes(b) if b.len() == HASH_SIZE => {
            Ok(Some(Arc::new(Node::Hash(H256::from_slice(b)))))
        }
        RlpItem::Bytes(_) => Err(RlpError::Unexpected("node reference must be 32 bytes")),
        RlpItem::List(_, raw) => {
            if raw.len() >= HASH_SIZE {
                return Err(RlpError::Unexpected("inline node encoding too large"));
            }
            Ok(Some(Arc::new(decode_node_item(item, None, gen)?)))
        }
    }
}

// ============================================================================
// Persistence (tree) encoding
// ============================================================================

const STORED_EMPTY: u8 = 0;
const STORED_BRANCH: u8 = 1;
const STORED_SHORT: u8 = 2;
const STORED_HASH: u8 = 3;
const STORED_VALUE: u8 = 4;

/// Serializes a resolved subtree as a single self-contained value.
pub(crate) fn encode_stored(node: Option<&Arc<Node>>, out: &mut Vec<u8>) {
    let node = match node {
        None => {
            out.push(STORED_EMPTY);
            return;
        }
        Some(n) => n,
    };
    match node.as_ref() {
        Node::Branch { children, flags } => {
            out.push(STORED_BRANCH);
            // A dirty node's cached hash is not backed by the store yet, so
            // it must not survive a reload as a clean hash.
            encode_stored_hash(flags.hash.filter(|_| !flags.dirty), out);
            for child in children.iter() {
                encode_stored(child.as_ref(), out);
            }
        }
        Node::Short { key, val, flags } => {
            out.push(STORED_SHORT);
            encode_stored_hash(flags.hash.filter(|_| !flags.dirty), out);
            out.extend_from_slice(&(key.len() as u16).to_be_bytes());
            out.extend_from_slice(key);
            encode_stored(Some(val), out);
        }
        Node::Hash(h) => {
            out.push(STORED_HASH);
            out.extend_from_slice(h.as_bytes());
        }
        Node::Value(v) => {
            out.push(STORED_VALUE);
            out.extend_from_slice(&(v.len() as u32).to_be_bytes());
            out.extend_from_slice(v);
        }
    }
}

fn encode_stored_hash(hash: Option<H256>, out: &mut Vec<u8>) {
    match hash {
        Some(h) => {
            out.push(1);
            out.extend_from_slice(h.as_bytes());
        }
        None => out.push(0),
    }
}

/// Reconstructs a subtree from the persistence encoding.
///
/// Reconstructed branch/short nodes carry the hash they were stored with
/// (when present) and the given cache generation.
pub(crate) fn decode_stored(
    data: &[u8],
    pos: &mut usize,
    gen: u64,
) -> Result<Option<Arc<Node>>, RlpError> {
    let tag = *data.get(*pos).ok_or(RlpError::Truncated)?;
    *pos += 1;
    match tag {
        STORED_EMPTY => Ok(None),
        STORED_BRANCH => {
            let flags = decode_stored_flags(data, pos, gen)?;
            let mut children: [Option<Arc<Node>>; 17] = std::array::from_fn(|_| None);
            for child in children.iter_mut() {
                *child = decode_stored(data, pos, gen)?;
            }
            Ok(Some(Arc::new(Node::Branch {
                children: Box::new(children),
                flags,
            })))
        }
        STORED_SHORT => {
            let flags = decode_stored_flags(data, pos, gen)?;
            let len = read_exact(data, pos, 2)?;
            let key_len = u16::from_be_bytes([len[0], len[1]]) as usize;
            let key = read_exact(data, pos, key_len)?.to_vec();
            let val = decode_stored(data, pos, gen)?
                .ok_or(RlpError::Unexpected("stored short node without child"))?;
            Ok(Some(Arc::new(Node::Short { key, val, flags })))
        }
        STORED_HASH => {
            let bytes = read_exact(data, pos, HASH_SIZE)?;
            Ok(Some(Arc::new(Node::Hash(H256::from_slice(bytes)))))
        }
        STORED_VALUE => {
            let len = read_exact(data, pos, 4)?;
            let val_len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
            let val = read_exact(data, pos, val_len)?.to_vec();
            Ok(Some(Arc::new(Node::Value(val))))
        }
        _ => Err(RlpError::Unexpected("unknown stored node tag")),
    }
}

fn decode_stored_flags(data: &[u8], pos: &mut usize, gen: u64) -> Result<NodeFlags, RlpError> {
    let present = *data.get(*pos).ok_or(RlpError::Truncated)?;
    *pos += 1;
    let hash = match present {
        0 => None,
        1 => {
            let bytes = read_exact(data, pos, HASH_SIZE)?;
            Some(H256::from_slice(bytes))
        }
        _ => return Err(RlpError::Unexpected("invalid stored hash marker")),
    };
    Ok(NodeFlags {
        hash,
        dirty: false,
        gen,
    })
}

fn read_exact<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], RlpError> {
    let end = pos.checked_add(len).ok_or(RlpError::Truncated)?;
    if end > data.len() {
        return Err(RlpError::Truncated);
    }
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::nibbles::TERMINATOR;

    fn leaf(key: Vec<u8>, value: &[u8]) -> Arc<Node> {
        Arc::new(Node::Short {
            key,
            val: Arc::new(Node::Value(value.to_vec())),
            flags: NodeFlags::default(),
        })
    }

    #[test]
    fn test_decode_leaf() {
        // RLP([compact([1, 2, 3, T]), "cat"])
        let data = [0xc7, 0x82, 0x31, 0x23, 0x83, b'c', b'a', b't'];
        let node = Node::decode(&data, None, 0).unwrap();
        match node {
            Node::Short { key, val, .. } => {
                assert_eq!(key, vec![1, 2, 3, TERMINATOR]);
                match val.as_ref() {
                    Node::Value(v) => assert_eq!(v, b"cat"),
                    other => panic!("expected value child, got {:?}", other),
                }
            }
            other => panic!("expected short node, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_extension_with_hash_child() {
        let child = [0xAB; 32];
        let mut data = vec![0xe4, 0x82, 0x00, 0x12, 0xa0];
        data.extend_from_slice(&child);
        let node = Node::decode(&data, None, 0).unwrap();
        match node {
            Node::Short { key, val, .. } => {
                assert_eq!(key, vec![1, 2]);
                match val.as_ref() {
                    Node::Hash(h) => assert_eq!(h.as_bytes(), &child),
                    other => panic!("expected hash child, got {:?}", other),
                }
            }
            other => panic!("expected short node, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_branch_with_value() {
        // 17-item list: all children empty, slot 16 holds "v"
        let mut data = vec![0xd2];
        data.extend_from_slice(&[0x80; 16]);
        data.extend_from_slice(&[0x81, b'v']);
        let node = Node::decode(&data, None, 0).unwrap();
        match node {
            Node::Branch { children, .. } => {
                assert!(children[..16].iter().all(|c| c.is_none()));
                match children[16].as_deref() {
                    Some(Node::Value(v)) => assert_eq!(v, b"v"),
                    other => panic!("expected value slot, got {:?}", other),
                }
            }
            other => panic!("expected branch node, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_tags_loading_hash() {
        let data = [0xc7, 0x82, 0x31, 0x23, 0x83, b'c', b'a', b't'];
        let hash = H256::repeat_byte(0x42);
        let node = Node::decode(&data, Some(hash), 7).unwrap();
        let flags = node.cache().unwrap();
        assert_eq!(flags.hash, Some(hash));
        assert!(!flags.dirty);
        assert_eq!(flags.gen, 7);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // Bytes where a list is required
        assert!(Node::decode(&[0x83, 1, 2, 3], None, 0).is_err());
        // 3-item list
        assert!(Node::decode(&[0xc3, 0x01, 0x02, 0x03], None, 0).is_err());
        // Bad reference length inside a branch
        let mut data = vec![0xd3, 0x82, 0xAA, 0xBB];
        data.extend_from_slice(&[0x80; 15]);
        data.push(0x80);
        assert!(Node::decode(&data, None, 0).is_err());
    }

    #[test]
    fn test_stored_roundtrip() {
        let mut children: [Option<Arc<Node>>; 17] = std::array::from_fn(|_| None);
        children[3] = Some(leaf(vec![7, TERMINATOR], b"left"));
        children[9] = Some(Arc::new(Node::Hash(H256::repeat_byte(0x11))));
        children[16] = Some(Arc::new(Node::Value(b"at-branch".to_vec())));
        let root = Arc::new(Node::Branch {
            children: Box::new(children),
            flags: NodeFlags::loaded(H256::repeat_byte(0x22), 0),
        });

        let mut out = Vec::new();
        encode_stored(Some(&root), &mut out);

        let mut pos = 0;
        let decoded = decode_stored(&out, &mut pos, 5).unwrap().unwrap();
        assert_eq!(pos, out.len());

        match decoded.as_ref() {
            Node::Branch { children, flags } => {
                assert_eq!(flags.hash, Some(H256::repeat_byte(0x22)));
                assert_eq!(flags.gen, 5);
                assert!(children[0].is_none());
                match children[3].as_deref() {
                    Some(Node::Short { key, .. }) => assert_eq!(key, &vec![7, TERMINATOR]),
                    other => panic!("expected short child, got {:?}", other),
                }
                match children[9].as_deref() {
                    Some(Node::Hash(h)) => assert_eq!(*h, H256::repeat_byte(0x11)),
                    other => panic!("expected hash child, got {:?}", other),
                }
            }
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_stored_empty() {
        let mut out = Vec::new();
        encode_stored(None, &mut out);
        assert_eq!(out, vec![STORED_EMPTY]);

        let mut pos = 0;
        assert!(decode_stored(&out, &mut pos, 0).unwrap().is_none());
    }

    #[test]
    fn test_stored_rejects_truncated() {
        let mut out = Vec::new();
        encode_stored(Some(&leaf(vec![1, TERMINATOR], b"value")), &mut out);
        out.truncate(out.len() - 1);

        let mut pos = 0;
        assert!(decode_stored(&out, &mut pos, 0).is_err());
    }
}
