// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! World state: accounts, deployed contracts and their storage, plus the
//! trie commitment that produces block state roots.
//!
//! Balances are floating point MTC in memory. Inside the trie encoding they
//! are quantized to integer micro-MTC so the committed root is deterministic
//! across nodes. Accounts materialize on first touch and empty accounts are
//! left out of the commitment.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::{error, fmt};

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use kvdb::KeyValueDB;

use crate::db::COL_STATE;
use crate::rlp::RlpStream;
use crate::trie::{SecureTrie, TrieDb, TrieError};

#[derive(Debug)]
pub enum StateError {
    InsufficientBalance { have: f64, need: f64 },
    Trie(TrieError),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StateError::InsufficientBalance { have, need } => {
                write!(f, "insufficient balance: have {:.6}, need {:.6}", have, need)
            }
            StateError::Trie(e) => write!(f, "state commit failed: {}", e),
        }
    }
}

impl error::Error for StateError {}

impl From<TrieError> for StateError {
    fn from(e: TrieError) -> Self {
        StateError::Trie(e)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub balance: f64,
    pub nonce: u64,
}

impl Account {
    fn is_empty(&self) -> bool {
        self.balance == 0.0 && self.nonce == 0
    }
}

/// A deployed contract: immutable code, mutable storage.
#[derive(Debug, Clone)]
pub struct Contract {
    pub address: String,
    pub owner: String,
    pub code: Vec<u8>,
    pub storage: BTreeMap<U256, U256>,
    pub balance: f64,
}

/// Deep copy of the account map, taken before each transaction.
pub struct AccountsSnapshot(HashMap<String, Account>);

/// Deep copy of one contract's storage.
pub struct StorageSnapshot(BTreeMap<U256, U256>);

/// The full mutable world state of a node.
#[derive(Clone)]
pub struct World {
    db: Arc<dyn KeyValueDB>,
    accounts: HashMap<String, Account>,
    contracts: HashMap<String, Contract>,
}

impl World {
    pub fn new(db: Arc<dyn KeyValueDB>) -> World {
        World {
            db,
            accounts: HashMap::new(),
            contracts: HashMap::new(),
        }
    }

    pub fn balance(&self, address: &str) -> f64 {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0.0)
    }

    pub fn nonce(&self, address: &str) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn add_balance(&mut self, address: &str, amount: f64) {
        self.account_mut(address).balance += amount;
    }

    pub fn sub_balance(&mut self, address: &str, amount: f64) -> Result<(), StateError> {
        let account = self.account_mut(address);
        if account.balance < amount {
            return Err(StateError::InsufficientBalance {
                have: account.balance,
                need: amount,
            });
        }
        account.balance -= amount;
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: &str) {
        self.account_mut(address).nonce += 1;
    }

    /// Drop an account outright. The transaction executor never calls
    /// this; accounts live forever once touched.
    pub fn remove_account(&mut self, address: &str) {
        self.accounts.remove(address);
    }

    fn account_mut(&mut self, address: &str) -> &mut Account {
        self.accounts.entry(address.to_string()).or_default()
    }

    /// Accounts with state, for the RPC accounts listing.
    pub fn account_entries(&self) -> Vec<(String, Account)> {
        let mut entries: Vec<(String, Account)> = self
            .accounts
            .iter()
            .filter(|(_, a)| !a.is_empty())
            .map(|(addr, a)| (addr.clone(), a.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn snapshot(&self) -> AccountsSnapshot {
        AccountsSnapshot(self.accounts.clone())
    }

    pub fn restore(&mut self, snapshot: AccountsSnapshot) {
        self.accounts = snapshot.0;
    }

    pub fn is_contract(&self, address: &str) -> bool {
        self.contracts.contains_key(address)
    }

    pub fn contract(&self, address: &str) -> Option<&Contract> {
        self.contracts.get(address)
    }

    pub fn contract_mut(&mut self, address: &str) -> Option<&mut Contract> {
        self.contracts.get_mut(address)
    }

    /// Deploy `code` for `owner`, deriving the address from owner, the
    /// owner's current nonce and the bytecode, so repeated identical
    /// deploys land at distinct addresses.
    pub fn deploy_contract(&mut self, owner: &str, owner_nonce: u64, code: Vec<u8>) -> String {
        let preimage = format!("{}:{}:{}", owner, owner_nonce, hex::encode(&code));
        let address = hex::encode(keccak(preimage.as_bytes()))[..40].to_string();
        self.contracts.insert(
            address.clone(),
            Contract {
                address: address.clone(),
                owner: owner.to_string(),
                code,
                storage: BTreeMap::new(),
                balance: 0.0,
            },
        );
        address
    }

    pub fn storage_snapshot(&self, address: &str) -> Option<StorageSnapshot> {
        self.contracts
            .get(address)
            .map(|c| StorageSnapshot(c.storage.clone()))
    }

    pub fn restore_storage(&mut self, address: &str, snapshot: StorageSnapshot) {
        if let Some(contract) = self.contracts.get_mut(address) {
            contract.storage = snapshot.0;
        }
    }

    /// Read a contract storage slot; missing slots read as zero.
    pub fn storage_value(&self, address: &str, slot: U256) -> U256 {
        self.contracts
            .get(address)
            .and_then(|c| c.storage.get(&slot).copied())
            .unwrap_or_default()
    }

    /// Commit the world into the state trie and return the root.
    ///
    /// Contract storage goes into per-contract secure sub-tries whose roots
    /// land in the account records; contract code is written to the code
    /// table under its Keccak hash.
    pub fn commit(&mut self) -> Result<H256, StateError> {
        let mut batch = self.db.transaction();
        let mut state = SecureTrie::new(TrieDb::new(self.db.clone(), COL_STATE));
        let empty_code_hash = keccak([]);
        let empty_storage_root = crate::trie::empty_root();

        for (address, account) in &self.accounts {
            if account.is_empty() || self.contracts.contains_key(address) {
                continue;
            }
            state.insert(
                address.as_bytes(),
                account_rlp(
                    account.nonce,
                    account.balance,
                    empty_storage_root,
                    empty_code_hash,
                ),
            )?;
        }

        for (address, contract) in &self.contracts {
            let mut storage = SecureTrie::new(TrieDb::new(self.db.clone(), COL_STATE));
            for (slot, value) in &contract.storage {
                if value.is_zero() {
                    continue;
                }
                let mut key = [0u8; 32];
                slot.to_big_endian(&mut key);
                storage.insert(&key, u256_to_minimal(*value))?;
            }
            let storage_root = storage.commit(&mut batch);

            let code_hash = keccak(&contract.code);
            let code_key = crate::chaindb::code_key(code_hash.as_bytes());
            batch.put(COL_STATE, &code_key, &contract.code);

            let balance = contract.balance
                + self.accounts.get(address).map(|a| a.balance).unwrap_or(0.0);
            state.insert(
                address.as_bytes(),
                account_rlp(0, balance, storage_root, code_hash),
            )?;
        }

        let root = state.commit(&mut batch);
        self.db
            .write(batch)
            .map_err(|e| StateError::Trie(TrieError::Database(e)))?;
        Ok(root)
    }
}

/// RLP account record: `[nonce, balance in micro-MTC, storage_root, code_hash]`.
fn account_rlp(nonce: u64, balance: f64, storage_root: H256, code_hash: H256) -> Vec<u8> {
    let micro = if balance > 0.0 {
        (balance * 1_000_000.0).round() as u64
    } else {
        0
    };
    let mut s = RlpStream::new_list(4);
    s.append(&nonce)
        .append(&micro)
        .append(&storage_root)
        .append(&code_hash);
    s.out()
}

/// Big-endian minimal bytes of a 256-bit value.
fn u256_to_minimal(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let skip = buf.iter().take_while(|b| **b == 0).count();
    buf[skip..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_world() -> World {
        World::new(Arc::new(kvdb_memorydb::create(1)))
    }

    #[test]
    fn fresh_address_is_zero_account() {
        let world = memory_world();
        assert_eq!(world.balance("nobody"), 0.0);
        assert_eq!(world.nonce("nobody"), 0);
    }

    #[test]
    fn balance_arithmetic() {
        let mut world = memory_world();
        world.add_balance("alice", 100.0);
        world.sub_balance("alice", 30.0).unwrap();
        assert_eq!(world.balance("alice"), 70.0);

        let err = world.sub_balance("alice", 1000.0).unwrap_err();
        assert!(matches!(err, StateError::InsufficientBalance { .. }));
        assert_eq!(world.balance("alice"), 70.0);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut world = memory_world();
        world.add_balance("alice", 50.0);
        world.increment_nonce("alice");

        let snapshot = world.snapshot();
        world.add_balance("bob", 10.0);
        world.sub_balance("alice", 20.0).unwrap();
        world.increment_nonce("alice");

        world.restore(snapshot);
        assert_eq!(world.balance("alice"), 50.0);
        assert_eq!(world.nonce("alice"), 1);
        assert_eq!(world.balance("bob"), 0.0);
    }

    #[test]
    fn removed_account_leaves_the_commitment() {
        let mut world = memory_world();
        world.add_balance("alice", 5.0);
        let root_with_alice = world.commit().unwrap();

        world.remove_account("alice");
        let root = world.commit().unwrap();
        assert_ne!(root, root_with_alice);
        assert_eq!(root, crate::trie::empty_root());
        assert_eq!(world.balance("alice"), 0.0);
    }

    #[test]
    fn contract_deploys_get_distinct_addresses() {
        let mut world = memory_world();
        let code = vec![0x60, 0x01, 0x00];
        let first = world.deploy_contract("alice", 0, code.clone());
        let second = world.deploy_contract("alice", 1, code);
        assert_ne!(first, second);
        assert_eq!(first.len(), 40);
        assert!(world.is_contract(&first));
        assert!(world.is_contract(&second));
    }

    #[test]
    fn storage_snapshot_is_per_contract() {
        let mut world = memory_world();
        let addr = world.deploy_contract("alice", 0, vec![0x00]);
        world
            .contract_mut(&addr)
            .unwrap()
            .storage
            .insert(U256::zero(), U256::from(7));

        let snapshot = world.storage_snapshot(&addr).unwrap();
        world
            .contract_mut(&addr)
            .unwrap()
            .storage
            .insert(U256::zero(), U256::from(9));

        world.restore_storage(&addr, snapshot);
        assert_eq!(world.storage_value(&addr, U256::zero()), U256::from(7));
    }

    #[test]
    fn empty_world_commits_to_empty_root() {
        let mut world = memory_world();
        assert_eq!(world.commit().unwrap(), crate::trie::empty_root());
    }

    #[test]
    fn commit_is_deterministic_across_worlds() {
        let mut a = memory_world();
        a.add_balance("alice", 10.0);
        a.add_balance("bob", 20.0);

        let mut b = memory_world();
        b.add_balance("bob", 20.0);
        b.add_balance("alice", 10.0);

        assert_eq!(a.commit().unwrap(), b.commit().unwrap());
    }

    #[test]
    fn untouched_reads_do_not_change_root() {
        let mut world = memory_world();
        world.add_balance("alice", 1.0);
        let root = world.commit().unwrap();

        // Reading a missing account materializes nothing in the commitment.
        assert_eq!(world.balance("ghost"), 0.0);
        assert_eq!(world.commit().unwrap(), root);
    }

    #[test]
    fn zero_storage_write_prunes_slot_from_root() {
        let mut a = memory_world();
        let addr_a = a.deploy_contract("alice", 0, vec![0x00]);
        a.contract_mut(&addr_a)
            .unwrap()
            .storage
            .insert(U256::from(1), U256::from(5));
        let root_with_value = a.commit().unwrap();

        a.contract_mut(&addr_a).unwrap().storage.remove(&U256::from(1));
        let root_without = a.commit().unwrap();
        assert_ne!(root_with_value, root_without);

        // A slot explicitly holding zero commits identically to an absent one.
        a.contract_mut(&addr_a)
            .unwrap()
            .storage
            .insert(U256::from(1), U256::zero());
        assert_eq!(a.commit().unwrap(), root_without);
    }
}
