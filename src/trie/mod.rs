// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Merkle Patricia Trie over a key/value store.
//!
//! Nodes live in memory until `commit` writes every reachable node of 32
//! encoded bytes or more to the backing store under its Keccak-256 hash,
//! matching the inline-embedding rule of the node codec. The root node is
//! always written so a committed trie can be reopened by root hash.

mod nibble;
mod node;
mod secure;

pub use self::node::Node;
pub use self::secure::SecureTrie;

use std::{error, fmt, io, sync::Arc};

use ethereum_types::H256;
use keccak_hash::keccak;
use kvdb::{DBTransaction, KeyValueDB};

use self::nibble::{key_to_nibbles, prefix_len};
use self::node::{decode_node, encode_node};
use crate::rlp::DecoderError;

/// Root hash of the empty trie.
pub fn empty_root() -> H256 {
    keccak([])
}

#[derive(Debug)]
pub enum TrieError {
    Decoder(DecoderError),
    MissingNode(H256),
    Database(io::Error),
    Corrupt(&'static str),
}

impl fmt::Display for TrieError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrieError::Decoder(e) => write!(f, "trie node decode error: {}", e),
            TrieError::MissingNode(h) => write!(f, "missing trie node {:x}", h),
            TrieError::Database(e) => write!(f, "trie database error: {}", e),
            TrieError::Corrupt(s) => write!(f, "corrupt trie node: {}", s),
        }
    }
}

impl error::Error for TrieError {}

impl From<DecoderError> for TrieError {
    fn from(e: DecoderError) -> Self {
        TrieError::Decoder(e)
    }
}

impl From<io::Error> for TrieError {
    fn from(e: io::Error) -> Self {
        TrieError::Database(e)
    }
}

/// Node resolver over the key/value store.
#[derive(Clone)]
pub struct TrieDb {
    db: Arc<dyn KeyValueDB>,
    col: u32,
}

impl TrieDb {
    pub fn new(db: Arc<dyn KeyValueDB>, col: u32) -> Self {
        TrieDb { db, col }
    }

    fn node(&self, hash: &H256) -> Result<Node, TrieError> {
        let raw = self
            .db
            .get(self.col, hash.as_bytes())?
            .ok_or(TrieError::MissingNode(*hash))?;
        decode_node(&raw)
    }

    fn put(&self, tx: &mut DBTransaction, key: &[u8], value: &[u8]) {
        tx.put(self.col, key, value);
    }

    pub(crate) fn column(&self) -> u32 {
        self.col
    }
}

/// An in-memory Merkle Patricia Trie with lazy node resolution.
pub struct Trie {
    root: Node,
    db: TrieDb,
}

impl Trie {
    /// A fresh empty trie.
    pub fn new(db: TrieDb) -> Self {
        Trie {
            root: Node::Empty,
            db,
        }
    }

    /// Open a committed trie at `root`.
    pub fn from_root(db: TrieDb, root: H256) -> Result<Self, TrieError> {
        let root_node = if root == empty_root() {
            Node::Empty
        } else {
            db.node(&root)?
        };
        Ok(Trie {
            root: root_node,
            db,
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = key_to_nibbles(key);
        self.get_at(&self.root, &path)
    }

    /// Insert `value` under `key`. An empty value removes the key.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        if value.is_empty() {
            return self.remove(key);
        }
        let path = key_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        self.root = self.insert_at(root, &path, value)?;
        Ok(())
    }

    pub fn remove(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let path = key_to_nibbles(key);
        let root = std::mem::replace(&mut self.root, Node::Empty);
        self.root = self.remove_at(root, &path)?;
        Ok(())
    }

    pub(crate) fn db_column(&self) -> u32 {
        self.db.column()
    }

    /// Current root hash without persisting anything.
    pub fn root(&self) -> H256 {
        match &self.root {
            Node::Empty => empty_root(),
            Node::Hash(h) => *h,
            node => keccak(encode_node(node)),
        }
    }

    /// Queue every reachable node into `tx` and return the root hash.
    ///
    /// Re-committing an unchanged trie writes the identical node set and
    /// yields the identical root.
    pub fn commit(&self, tx: &mut DBTransaction) -> H256 {
        match &self.root {
            Node::Empty => empty_root(),
            Node::Hash(h) => *h,
            node => {
                self.commit_at(node, tx);
                let encoded = encode_node(node);
                let root = keccak(&encoded);
                // The root is stored regardless of size so the trie can be
                // reopened from its hash.
                self.db.put(tx, root.as_bytes(), &encoded);
                root
            }
        }
    }

    fn commit_at(&self, node: &Node, tx: &mut DBTransaction) {
        match node {
            Node::Short { val, .. } => {
                self.commit_at(val, tx);
                let encoded = encode_node(node);
                if encoded.len() >= 32 {
                    self.db.put(tx, keccak(&encoded).as_bytes(), &encoded);
                }
            }
            Node::Full { children } => {
                for child in children.iter().take(16) {
                    self.commit_at(child, tx);
                }
                let encoded = encode_node(node);
                if encoded.len() >= 32 {
                    self.db.put(tx, keccak(&encoded).as_bytes(), &encoded);
                }
            }
            Node::Empty | Node::Value(_) | Node::Hash(_) => {}
        }
    }

    fn get_at(&self, node: &Node, path: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        match node {
            Node::Empty => Ok(None),
            Node::Value(v) => {
                if path.is_empty() {
                    Ok(Some(v.clone()))
                } else {
                    Ok(None)
                }
            }
            Node::Short { key, val } => {
                if path.len() < key.len() || &path[..key.len()] != key.as_slice() {
                    return Ok(None);
                }
                self.get_at(val, &path[key.len()..])
            }
            Node::Full { children } => {
                let idx = path[0] as usize;
                self.get_at(&children[idx], &path[1..])
            }
            Node::Hash(h) => {
                let resolved = self.db.node(h)?;
                self.get_at(&resolved, path)
            }
        }
    }

    fn insert_at(&self, node: Node, path: &[u8], value: Vec<u8>) -> Result<Node, TrieError> {
        if path.is_empty() {
            return Ok(Node::Value(value));
        }
        match node {
            Node::Empty => Ok(Node::Short {
                key: path.to_vec(),
                val: Box::new(Node::Value(value)),
            }),
            Node::Short { key, val } => {
                let matched = prefix_len(path, &key);
                if matched == key.len() {
                    let new_val = self.insert_at(*val, &path[matched..], value)?;
                    return Ok(Node::Short {
                        key,
                        val: Box::new(new_val),
                    });
                }
                // Paths diverge: split into a branch under the shared prefix.
                let mut children = Node::empty_children();
                {
                    let idx = key[matched] as usize;
                    let rest = key[matched + 1..].to_vec();
                    children[idx] = if rest.is_empty() {
                        *val
                    } else {
                        Node::Short { key: rest, val }
                    };
                }
                {
                    let idx = path[matched] as usize;
                    let rest = path[matched + 1..].to_vec();
                    children[idx] = if rest.is_empty() {
                        Node::Value(value)
                    } else {
                        Node::Short {
                            key: rest,
                            val: Box::new(Node::Value(value)),
                        }
                    };
                }
                let branch = Node::Full { children };
                if matched == 0 {
                    Ok(branch)
                } else {
                    Ok(Node::Short {
                        key: path[..matched].to_vec(),
                        val: Box::new(branch),
                    })
                }
            }
            Node::Full { mut children } => {
                let idx = path[0] as usize;
                let child = std::mem::replace(&mut children[idx], Node::Empty);
                children[idx] = self.insert_at(child, &path[1..], value)?;
                Ok(Node::Full { children })
            }
            Node::Hash(h) => {
                let resolved = self.db.node(&h)?;
                self.insert_at(resolved, path, value)
            }
            Node::Value(_) => Err(TrieError::Corrupt("value node on a partial path")),
        }
    }

    fn remove_at(&self, node: Node, path: &[u8]) -> Result<Node, TrieError> {
        match node {
            Node::Empty => Ok(Node::Empty),
            Node::Value(_) => Ok(Node::Empty),
            Node::Short { key, val } => {
                let matched = prefix_len(path, &key);
                if matched < key.len() {
                    // Key absent: removal is a no-op.
                    return Ok(Node::Short { key, val });
                }
                if matched == path.len() {
                    return Ok(Node::Empty);
                }
                let child = self.remove_at(*val, &path[key.len()..])?;
                match child {
                    Node::Empty => Ok(Node::Empty),
                    Node::Short {
                        key: child_key,
                        val: child_val,
                    } => {
                        // Merge consecutive short nodes.
                        let mut merged = key;
                        merged.extend_from_slice(&child_key);
                        Ok(Node::Short {
                            key: merged,
                            val: child_val,
                        })
                    }
                    other => Ok(Node::Short {
                        key,
                        val: Box::new(other),
                    }),
                }
            }
            Node::Full { mut children } => {
                let idx = path[0] as usize;
                let child = std::mem::replace(&mut children[idx], Node::Empty);
                children[idx] = self.remove_at(child, &path[1..])?;

                let occupied: Vec<usize> = (0..17).filter(|i| !children[*i].is_empty()).collect();
                match occupied.len() {
                    0 => Ok(Node::Empty),
                    1 => self.collapse_branch(children, occupied[0]),
                    _ => Ok(Node::Full { children }),
                }
            }
            Node::Hash(h) => {
                let resolved = self.db.node(&h)?;
                self.remove_at(resolved, path)
            }
        }
    }

    /// A branch left with a single occupant folds back into a short node.
    fn collapse_branch(
        &self,
        mut children: Box<[Node; 17]>,
        pos: usize,
    ) -> Result<Node, TrieError> {
        let mut child = std::mem::replace(&mut children[pos], Node::Empty);
        if let Node::Hash(h) = child {
            child = self.db.node(&h)?;
        }
        match child {
            Node::Short { key, val } => {
                let mut merged = vec![pos as u8];
                merged.extend_from_slice(&key);
                Ok(Node::Short { key: merged, val })
            }
            other => Ok(Node::Short {
                key: vec![pos as u8],
                val: Box::new(other),
            }),
        }
    }
}
