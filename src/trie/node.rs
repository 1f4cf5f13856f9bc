// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Trie node representation and its canonical RLP form.

use ethereum_types::H256;
use keccak_hash::keccak;

use super::nibble::{compact_decode, compact_encode, has_terminator};
use super::TrieError;
use crate::rlp::{self, Rlp, RlpStream};

/// A trie node.
///
/// `Short` covers both leaves (its path ends in the terminator nibble and
/// the child is a `Value`) and extensions (no terminator, child is another
/// node). `Full` is the 16-way branch with the optional value in slot 16.
/// `Hash` is an unresolved reference into the node database.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Empty,
    Value(Vec<u8>),
    Short { key: Vec<u8>, val: Box<Node> },
    Full { children: Box<[Node; 17]> },
    Hash(H256),
}

impl Node {
    pub fn empty_children() -> Box<[Node; 17]> {
        Box::new(std::array::from_fn(|_| Node::Empty))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }
}

/// Canonical encoding of a structural node (`Short` or `Full`).
///
/// Children whose own encoding is 32 bytes or longer are referenced by
/// their Keccak-256 hash; shorter children embed inline.
pub fn encode_node(node: &Node) -> Vec<u8> {
    match node {
        Node::Short { key, val } => {
            let mut s = RlpStream::new_list(2);
            s.append(&compact_encode(key));
            append_child(&mut s, val);
            s.out()
        }
        Node::Full { children } => {
            let mut s = RlpStream::new_list(17);
            for child in children.iter().take(16) {
                append_child(&mut s, child);
            }
            match &children[16] {
                Node::Value(v) => s.append(v),
                _ => s.append(&Vec::<u8>::new()),
            };
            s.out()
        }
        Node::Value(v) => rlp::encode(v),
        Node::Hash(h) => rlp::encode(h),
        Node::Empty => rlp::encode(&Vec::<u8>::new()),
    }
}

fn append_child(s: &mut RlpStream, child: &Node) {
    match child {
        Node::Empty => {
            s.append(&Vec::<u8>::new());
        }
        Node::Value(v) => {
            s.append(v);
        }
        Node::Hash(h) => {
            s.append(h);
        }
        structural => {
            let encoded = encode_node(structural);
            if encoded.len() >= 32 {
                s.append(&keccak(&encoded));
            } else {
                s.append_raw(&encoded);
            }
        }
    }
}

/// Decode a node from its canonical encoding.
pub fn decode_node(bytes: &[u8]) -> Result<Node, TrieError> {
    let rlp = Rlp::new(bytes);
    if !rlp.is_list() {
        return Err(TrieError::Corrupt("node is not a list"));
    }
    match rlp.item_count()? {
        2 => {
            let key = compact_decode(rlp.at(0)?.data()?);
            let val_rlp = rlp.at(1)?;
            let val = if has_terminator(&key) {
                Node::Value(val_rlp.data()?.to_vec())
            } else {
                decode_child(&val_rlp)?
            };
            Ok(Node::Short {
                key,
                val: Box::new(val),
            })
        }
        17 => {
            let mut children = Node::empty_children();
            for (i, slot) in children.iter_mut().enumerate().take(16) {
                *slot = decode_child(&rlp.at(i)?)?;
            }
            let value = rlp.at(16)?.data()?;
            if !value.is_empty() {
                children[16] = Node::Value(value.to_vec());
            }
            Ok(Node::Full { children })
        }
        _ => Err(TrieError::Corrupt("invalid node arity")),
    }
}

fn decode_child(rlp: &Rlp) -> Result<Node, TrieError> {
    if rlp.is_list() {
        // An inline node embedded by the < 32-byte rule.
        return decode_node(rlp.as_raw());
    }
    let data = rlp.data()?;
    if data.is_empty() {
        Ok(Node::Empty)
    } else if data.len() == 32 {
        Ok(Node::Hash(H256::from_slice(data)))
    } else {
        Ok(Node::Value(data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trip() {
        let leaf = Node::Short {
            key: vec![1, 2, 3, 16],
            val: Box::new(Node::Value(b"dog".to_vec())),
        };
        let encoded = encode_node(&leaf);
        assert_eq!(decode_node(&encoded).unwrap(), leaf);
    }

    #[test]
    fn branch_round_trip_with_hashed_child() {
        let big_leaf = Node::Short {
            key: vec![4, 5, 16],
            val: Box::new(Node::Value(vec![0xab; 40])),
        };
        let mut children = Node::empty_children();
        children[3] = big_leaf.clone();
        children[16] = Node::Value(b"v".to_vec());
        let branch = Node::Full { children };

        let encoded = encode_node(&branch);
        let decoded = decode_node(&encoded).unwrap();

        // The large child collapses to its hash reference on decode.
        let expected_hash = keccak(encode_node(&big_leaf));
        match decoded {
            Node::Full { children } => {
                assert_eq!(children[3], Node::Hash(expected_hash));
                assert_eq!(children[16], Node::Value(b"v".to_vec()));
            }
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn small_child_embeds_inline() {
        let tiny = Node::Short {
            key: vec![7, 16],
            val: Box::new(Node::Value(b"x".to_vec())),
        };
        let mut children = Node::empty_children();
        children[0] = tiny.clone();
        let branch = Node::Full { children };

        let decoded = decode_node(&encode_node(&branch)).unwrap();
        match decoded {
            Node::Full { children } => assert_eq!(children[0], tiny),
            other => panic!("expected branch, got {:?}", other),
        }
    }
}
