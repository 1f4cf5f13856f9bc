// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

use super::Transaction;
use crate::util::unix_now;

/// Parent hash carried by the genesis block.
pub const GENESIS_PARENT_HASH: &str = "0";

fn zero_root() -> String {
    "0".repeat(64)
}

/// A block: header fields and the ordered transaction list, serialized by
/// field name on the wire. Hashes and roots are lowercase hex strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub parent_hash: String,
    pub hash: String,
    pub nonce: u64,
    pub state_root: String,
    pub tx_root: String,
    pub receipt_root: String,
}

impl Block {
    /// A fresh, unmined block on top of `parent_hash`.
    pub fn new(index: u64, transactions: Vec<Transaction>, parent_hash: &str) -> Block {
        Block {
            index,
            timestamp: unix_now(),
            transactions,
            parent_hash: parent_hash.to_string(),
            hash: String::new(),
            nonce: 0,
            state_root: zero_root(),
            tx_root: zero_root(),
            receipt_root: zero_root(),
        }
    }

    /// The unmined genesis block: empty, parent "0", zeroed roots.
    pub fn genesis() -> Block {
        Block::new(0, Vec::new(), GENESIS_PARENT_HASH)
    }

    /// Transaction digest feeding the hash preimage: empty for an empty
    /// block, else the per-transaction entries joined with "||".
    pub fn tx_digest(&self) -> String {
        self.transactions
            .iter()
            .map(Transaction::digest_entry)
            .collect::<Vec<_>>()
            .join("||")
    }

    /// The consensus-critical hash preimage.
    fn preimage(&self) -> String {
        format!(
            "{}{}{}{}{}{}{}{}",
            self.index,
            self.timestamp,
            self.tx_digest(),
            self.parent_hash,
            self.nonce,
            self.state_root,
            self.tx_root,
            self.receipt_root
        )
    }

    /// Keccak-256 of the preimage, rendered as lowercase hex.
    pub fn compute_hash(&self) -> String {
        hex::encode(keccak(self.preimage().as_bytes()))
    }

    /// Does the stored hash match the content and meet the target?
    pub fn is_valid(&self, difficulty: usize) -> bool {
        self.hash == self.compute_hash() && meets_target(&self.hash, difficulty)
    }
}

/// A hex hash meets difficulty `d` when it starts with `d` zero characters.
pub fn meets_target(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_check() {
        assert!(meets_target("00abc", 2));
        assert!(!meets_target("0abc", 2));
        assert!(meets_target("anything", 0));
        assert!(!meets_target("0", 2));
    }

    #[test]
    fn genesis_shape() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.parent_hash, GENESIS_PARENT_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.state_root, "0".repeat(64));
    }

    #[test]
    fn hash_depends_on_nonce() {
        let mut block = Block::new(1, Vec::new(), "aa");
        let first = block.compute_hash();
        block.nonce += 1;
        assert_ne!(block.compute_hash(), first);
    }

    #[test]
    fn hash_depends_on_transactions() {
        let empty = Block::new(1, Vec::new(), "aa");
        let mut with_tx = empty.clone();
        with_tx
            .transactions
            .push(Transaction::new("alice", "bob", 1.0, 0));
        assert_ne!(empty.compute_hash(), with_tx.compute_hash());
        assert_eq!(empty.tx_digest(), "");
    }

    #[test]
    fn validity_requires_stored_hash() {
        let mut block = Block::new(1, Vec::new(), "aa");
        block.hash = block.compute_hash();
        assert!(block.is_valid(0));

        block.timestamp += 1;
        assert!(!block.is_valid(0));
    }

    #[test]
    fn json_round_trip() {
        let mut block = Block::new(2, vec![Transaction::new("a", "b", 3.0, 1)], "pp");
        block.hash = block.compute_hash();
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hash, block.hash);
        assert_eq!(back.compute_hash(), block.hash);
        assert_eq!(back.transactions.len(), 1);
    }
}
