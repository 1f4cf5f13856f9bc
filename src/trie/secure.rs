// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Secure trie: user keys are hashed before touching the trie, bounding
//! path length and preventing key grinding. Original keys stay recoverable
//! through a preimage table in the backing store.

use std::collections::HashMap;

use ethereum_types::H256;
use keccak_hash::keccak;
use kvdb::DBTransaction;

use super::{Trie, TrieDb, TrieError};

const PREIMAGE_PREFIX: &[u8] = b"secure-key-";

pub struct SecureTrie {
    trie: Trie,
    preimages: HashMap<H256, Vec<u8>>,
}

impl SecureTrie {
    pub fn new(db: TrieDb) -> Self {
        SecureTrie {
            trie: Trie::new(db),
            preimages: HashMap::new(),
        }
    }

    pub fn from_root(db: TrieDb, root: H256) -> Result<Self, TrieError> {
        Ok(SecureTrie {
            trie: Trie::from_root(db, root)?,
            preimages: HashMap::new(),
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.trie.get(keccak(key).as_bytes())
    }

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        let hashed = keccak(key);
        if value.is_empty() {
            self.preimages.remove(&hashed);
            return self.trie.remove(hashed.as_bytes());
        }
        self.preimages.insert(hashed, key.to_vec());
        self.trie.insert(hashed.as_bytes(), value)
    }

    pub fn remove(&mut self, key: &[u8]) -> Result<(), TrieError> {
        let hashed = keccak(key);
        self.preimages.remove(&hashed);
        self.trie.remove(hashed.as_bytes())
    }

    pub fn root(&self) -> H256 {
        self.trie.root()
    }

    /// Commit trie nodes and the pending preimage table.
    pub fn commit(&mut self, tx: &mut DBTransaction) -> H256 {
        let col = self.trie.db_column();
        for (hashed, original) in self.preimages.drain() {
            let mut key = PREIMAGE_PREFIX.to_vec();
            key.extend_from_slice(hashed.as_bytes());
            tx.put(col, &key, &original);
        }
        self.trie.commit(tx)
    }
}
