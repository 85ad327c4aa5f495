//! The Merkle-Patricia trie.
//!
//! Keys are expanded to terminator-suffixed nibble paths before every
//! operation. Mutations never edit nodes in place: each touched node along
//! the path is rebuilt and untouched siblings are shared through `Arc`, so
//! cloning a trie is cheap and clones never observe each other's writes.
//!
//! Deletion restores canonical form eagerly: a branch left with one child
//! collapses back into a short node, merging nibble runs as needed, so any
//! two tries holding the same key set hash identically.

use std::sync::Arc;

use primitive_types::H256;
use tracing::trace;

use super::hasher::HasherPool;
use super::nibbles::{common_prefix_len, key_to_nibbles, TERMINATOR};
use super::node::{self, Node, NodeFlags};
use super::{TrieError, EMPTY_ROOT};
use crate::store::{KvStore, WriteBatch};

/// An authenticated key-value trie over a backing store.
#[derive(Clone)]
pub struct Trie {
    root: Option<Arc<Node>>,
    db: Arc<dyn KvStore>,
    cache_gen: u64,
    cache_limit: u64,
    pool: HasherPool,
}

impl Trie {
    /// Opens the trie at `root`.
    ///
    /// An all-zero or empty root opens an empty trie; any other root must
    /// resolve in the store or the open fails with `MissingNode`.
    pub fn new(root: H256, db: Arc<dyn KvStore>) -> Result<Self, TrieError> {
        Self::with_cache(root, db, HasherPool::new(), 0)
    }

    /// Opens the trie with a shared hasher pool and cache-unload limit.
    /// A limit of zero disables generational unloading.
    pub(crate) fn with_cache(
        root: H256,
        db: Arc<dyn KvStore>,
        pool: HasherPool,
        cache_limit: u64,
    ) -> Result<Self, TrieError> {
        let mut trie = Self {
            root: None,
            db,
            cache_gen: 0,
            cache_limit,
            pool,
        };
        if root != EMPTY_ROOT && root != H256::zero() {
            trie.root = Some(trie.resolve_hash(root, &[])?);
        }
        Ok(trie)
    }

    /// The backing store this trie reads from.
    pub(crate) fn db(&self) -> &Arc<dyn KvStore> {
        &self.db
    }

    /// Looks up the value stored under `key`.
    ///
    /// Nodes resolved from the store during the walk are spliced back into
    /// the in-memory tree so repeated reads stay cheap.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = key_to_nibbles(key);
        let (value, resolved) = self.get_at(self.root.as_ref(), &path, 0)?;
        if let Some(new_root) = resolved {
            self.root = Some(new_root);
        }
        Ok(value)
    }

    /// Inserts or updates `key`. An empty value deletes the key.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), TrieError> {
        if value.is_empty() {
            return self.delete(key);
        }
        let path = key_to_nibbles(key);
        let value = Arc::new(Node::Value(value.to_vec()));
        let (_, new_root) = self.insert_at(self.root.clone(), &path, 0, value)?;
        self.root = Some(new_root);
        Ok(())
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let path = key_to_nibbles(key);
        let (_, new_root) = self.delete_at(self.root.clone(), &path, 0)?;
        self.root = new_root;
        Ok(())
    }

    /// Computes the root hash without persisting anything.
    ///
    /// Hashes are cached in the tree, so calling this repeatedly on an
    /// unchanged trie is cheap, and a later commit still writes every node.
    pub fn hash(&mut self) -> H256 {
        let root = match &self.root {
            None => return EMPTY_ROOT,
            Some(r) => Arc::clone(r),
        };
        let mut hasher = self.pool.hasher(self.cache_gen, self.cache_limit);
        let (root_ref, cached) = hasher.hash(&root, None, true);
        self.pool.put_back(hasher);
        self.root = Some(cached);
        root_ref.as_hash()
    }

    /// Hashes the trie and appends every dirty node to `batch`.
    ///
    /// Committing an already-committed trie appends nothing. Each commit
    /// advances the cache generation used for unload decisions.
    pub fn commit_to(&mut self, batch: &mut WriteBatch) -> H256 {
        let root = match &self.root {
            None => {
                self.cache_gen += 1;
                return EMPTY_ROOT;
            }
            Some(r) => Arc::clone(r),
        };
        let mut hasher = self.pool.hasher(self.cache_gen, self.cache_limit);
        let (root_ref, cached) = hasher.hash(&root, Some(batch), true);
        self.pool.put_back(hasher);
        self.root = Some(cached);
        self.cache_gen += 1;
        let root_hash = root_ref.as_hash();
        trace!(root = ?root_hash, writes = batch.len(), "trie committed");
        root_hash
    }

    /// Serializes the resolved portion of the tree as one value.
    ///
    /// Unresolved subtrees stay as hash references, so the result is valid
    /// against the same backing store.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        node::encode_stored(self.root.as_ref(), &mut out);
        out
    }

    /// Rebuilds a trie from [`Trie::serialize`] output.
    pub fn deserialize(db: Arc<dyn KvStore>, bytes: &[u8]) -> Result<Self, TrieError> {
        let decode_err = |source| TrieError::Decode {
            hash: H256::zero(),
            path: Vec::new(),
            source,
        };
        let mut pos = 0;
        let root = node::decode_stored(bytes, &mut pos, 0).map_err(decode_err)?;
        if pos != bytes.len() {
            return Err(decode_err(super::RlpError::Trailing));
        }
        Ok(Self {
            root,
            db,
            cache_gen: 0,
            cache_limit: 0,
            pool: HasherPool::new(),
        })
    }

    fn new_flags(&self) -> NodeFlags {
        NodeFlags {
            hash: None,
            dirty: true,
            gen: self.cache_gen,
        }
    }

    fn get_at(
        &self,
        node: Option<&Arc<Node>>,
        path: &[u8],
        pos: usize,
    ) -> Result<(Option<Vec<u8>>, Option<Arc<Node>>), TrieError> {
        let node = match node {
            None => return Ok((None, None)),
            Some(n) => n,
        };
        match node.as_ref() {
            Node::Value(v) => Ok((Some(v.clone()), None)),

            Node::Short { key, val, flags } => {
                let rest = &path[pos..];
                if rest.len() < key.len() || &rest[..key.len()] != key.as_slice() {
                    return Ok((None, None));
                }
                let (value, resolved) = self.get_at(Some(val), path, pos + key.len())?;
                let new_node = resolved.map(|child| {
                    Arc::new(Node::Short {
                        key: key.clone(),
                        val: child,
                        flags: flags.clone(),
                    })
                });
                Ok((value, new_node))
            }

            Node::Branch { children, flags } => {
                let idx = path[pos] as usize;
                let (value, resolved) = self.get_at(children[idx].as_ref(), path, pos + 1)?;
                let new_node = resolved.map(|child| {
                    let mut new_children = children.clone();
                    new_children[idx] = Some(child);
                    Arc::new(Node::Branch {
                        children: new_children,
                        flags: flags.clone(),
                    })
                });
                Ok((value, new_node))
            }

            Node::Hash(h) => {
                let resolved = self.resolve_hash(*h, &path[..pos])?;
                let (value, updated) = self.get_at(Some(&resolved), path, pos)?;
                Ok((value, Some(updated.unwrap_or(resolved))))
            }
        }
    }

    /// Inserts `value` at `path[pos..]`, returning whether anything changed
    /// and the replacement subtree.
    fn insert_at(
        &self,
        node: Option<Arc<Node>>,
        path: &[u8],
        pos: usize,
        value: Arc<Node>,
    ) -> Result<(bool, Arc<Node>), TrieError> {
        if pos == path.len() {
            // At the exact insertion point: replace whatever value is here.
            if let Some(n) = &node {
                if let Node::Value(old) = n.as_ref() {
                    let changed = match value.as_ref() {
                        Node::Value(new) => old != new,
                        _ => true,
                    };
                    return Ok((changed, value));
                }
            }
            return Ok((true, value));
        }

        let node = match node {
            None => {
                return Ok((
                    true,
                    Arc::new(Node::Short {
                        key: path[pos..].to_vec(),
                        val: value,
                        flags: self.new_flags(),
                    }),
                ));
            }
            Some(n) => n,
        };

        match node.as_ref() {
            Node::Short { key, val, .. } => {
                let rest = &path[pos..];
                let matchlen = common_prefix_len(rest, key);

                if matchlen == key.len() {
                    // Whole short key matches, descend into the child.
                    let (changed, new_val) =
                        self.insert_at(Some(Arc::clone(val)), path, pos + matchlen, value)?;
                    if !changed {
                        return Ok((false, node));
                    }
                    return Ok((
                        true,
                        Arc::new(Node::Short {
                            key: key.clone(),
                            val: new_val,
                            flags: self.new_flags(),
                        }),
                    ));
                }

                // Paths diverge: split into a branch under the shared prefix.
                let mut children: [Option<Arc<Node>>; 17] = std::array::from_fn(|_| None);

                let old_idx = key[matchlen] as usize;
                let old_rest = &key[matchlen + 1..];
                children[old_idx] = Some(if old_rest.is_empty() {
                    Arc::clone(val)
                } else {
                    Arc::new(Node::Short {
                        key: old_rest.to_vec(),
                        val: Arc::clone(val),
                        flags: self.new_flags(),
                    })
                });

                let new_idx = rest[matchlen] as usize;
                let new_rest = &rest[matchlen + 1..];
                children[new_idx] = Some(if new_rest.is_empty() {
                    value
                } else {
                    Arc::new(Node::Short {
                        key: new_rest.to_vec(),
                        val: value,
                        flags: self.new_flags(),
                    })
                });

                let branch = Arc::new(Node::Branch {
                    children: Box::new(children),
                    flags: self.new_flags(),
                });
                if matchlen == 0 {
                    return Ok((true, branch));
                }
                Ok((
                    true,
                    Arc::new(Node::Short {
                        key: rest[..matchlen].to_vec(),
                        val: branch,
                        flags: self.new_flags(),
                    }),
                ))
            }

            Node::Branch { children, .. } => {
                let idx = path[pos] as usize;
                let (changed, new_child) =
                    self.insert_at(children[idx].clone(), path, pos + 1, value)?;
                if !changed {
                    return Ok((false, node));
                }
                let mut new_children = children.clone();
                new_children[idx] = Some(new_child);
                Ok((
                    true,
                    Arc::new(Node::Branch {
                        children: new_children,
                        flags: self.new_flags(),
                    }),
                ))
            }

            Node::Hash(h) => {
                let resolved = self.resolve_hash(*h, &path[..pos])?;
                self.insert_at(Some(resolved), path, pos, value)
            }

            Node::Value(_) => unreachable!("value node above the insertion point"),
        }
    }

    /// Removes `path[pos..]`, returning whether anything changed and the
    /// replacement subtree (`None` when the subtree becomes empty).
    fn delete_at(
        &self,
        node: Option<Arc<Node>>,
        path: &[u8],
        pos: usize,
    ) -> Result<(bool, Option<Arc<Node>>), TrieError> {
        let node = match node {
            None => return Ok((false, None)),
            Some(n) => n,
        };

        match node.as_ref() {
            Node::Short { key, val, .. } => {
                let rest = &path[pos..];
                let matchlen = common_prefix_len(rest, key);
                if matchlen < key.len() {
                    return Ok((false, Some(node)));
                }
                if matchlen == rest.len() {
                    // The short node is exactly the key being removed.
                    return Ok((true, None));
                }

                let (changed, child) =
                    self.delete_at(Some(Arc::clone(val)), path, pos + key.len())?;
                if !changed {
                    return Ok((false, Some(node)));
                }
                match child {
                    None => Ok((true, None)),
                    Some(child) => match child.as_ref() {
                        // The child collapsed into a short node; merge the
                        // nibble runs to keep the tree canonical.
                        Node::Short {
                            key: child_key,
                            val: child_val,
                            ..
                        } => {
                            let mut merged = key.clone();
                            merged.extend_from_slice(child_key);
                            Ok((
                                true,
                                Some(Arc::new(Node::Short {
                                    key: merged,
                                    val: Arc::clone(child_val),
                                    flags: self.new_flags(),
                                })),
                            ))
                        }
                        _ => Ok((
                            true,
                            Some(Arc::new(Node::Short {
                                key: key.clone(),
                                val: child,
                                flags: self.new_flags(),
                            })),
                        )),
                    },
                }
            }

            Node::Branch { children, .. } => {
                let idx = path[pos] as usize;
                let (changed, new_child) = self.delete_at(children[idx].clone(), path, pos + 1)?;
                if !changed {
                    return Ok((false, Some(node)));
                }
                let mut new_children = children.clone();
                new_children[idx] = new_child;

                let mut survivor = None;
                let mut count = 0;
                for (i, child) in new_children.iter().enumerate() {
                    if child.is_some() {
                        survivor = Some(i);
                        count += 1;
                    }
                }

                if count == 1 {
                    let i = survivor.unwrap_or_default();
                    let Some(child) = new_children[i].take() else {
                        unreachable!("survivor slot is occupied");
                    };
                    if i == 16 {
                        // Only the value slot survives: a terminator leaf.
                        return Ok((
                            true,
                            Some(Arc::new(Node::Short {
                                key: vec![TERMINATOR],
                                val: child,
                                flags: self.new_flags(),
                            })),
                        ));
                    }
                    // The surviving child may itself be a short node behind
                    // a hash reference; resolve and merge runs.
                    let child = match child.as_ref() {
                        Node::Hash(h) => self.resolve_hash(*h, &path[..pos])?,
                        _ => child,
                    };
                    if let Node::Short {
                        key: child_key,
                        val: child_val,
                        ..
                    } = child.as_ref()
                    {
                        let mut merged = vec![i as u8];
                        merged.extend_from_slice(child_key);
                        return Ok((
                            true,
                            Some(Arc::new(Node::Short {
                                key: merged,
                                val: Arc::clone(child_val),
                                flags: self.new_flags(),
                            })),
                        ));
                    }
                    return Ok((
                        true,
                        Some(Arc::new(Node::Short {
                            key: vec![i as u8],
                            val: child,
                            flags: self.new_flags(),
                        })),
                    ));
                }

                Ok((
                    true,
                    Some(Arc::new(Node::Branch {
                        children: new_children,
                        flags: self.new_flags(),
                    })),
                ))
            }

            Node::Value(_) => Ok((true, None)),

            Node::Hash(h) => {
                let resolved = self.resolve_hash(*h, &path[..pos])?;
                self.delete_at(Some(resolved), path, pos)
            }
        }
    }

    /// Loads and decodes the node stored under `hash`.
    fn resolve_hash(&self, hash: H256, path: &[u8]) -> Result<Arc<Node>, TrieError> {
        let bytes = self
            .db
            .get(hash.as_bytes())?
            .ok_or_else(|| TrieError::MissingNode {
                hash,
                path: path.to_vec(),
            })?;
        let node = Node::decode(&bytes, Some(hash), self.cache_gen).map_err(|source| {
            TrieError::Decode {
                hash,
                path: path.to_vec(),
                source,
            }
        })?;
        Ok(Arc::new(node))
    }
}
