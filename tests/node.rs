// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! End-to-end node behavior over an in-memory store: cold start, chain
//! persistence, replication between two clients, and contract execution
//! through mined blocks.

use std::sync::Arc;

use ethereum_types::U256;
use kvdb::KeyValueDB;

use microchain::client::{Client, ImportOutcome};
use microchain::crypto::KeyPair;
use microchain::miner;
use microchain::types::Transaction;

fn memory_db() -> Arc<dyn KeyValueDB> {
    Arc::new(kvdb_memorydb::create(1))
}

fn mine_next(client: &Client) {
    let mut candidate = client.prepare_candidate();
    assert!(miner::mine(
        &mut candidate.block,
        client.difficulty(),
        None
    ));
    assert!(client.seal_candidate(candidate));
}

#[test]
fn cold_start_mines_a_valid_genesis() {
    let client = Client::open(memory_db(), 1).unwrap();
    assert_eq!(client.chain_length(), 1);

    let genesis = client.block_at(0).unwrap();
    assert_eq!(genesis.index, 0);
    assert_eq!(genesis.parent_hash, "0");
    assert!(genesis.hash.starts_with('0'));
    assert!(genesis.is_valid(1));
}

#[test]
fn chain_reloads_identically_after_restart() {
    let db = memory_db();
    let saved;
    {
        let client = Client::open(db.clone(), 1).unwrap();
        mine_next(&client);
        mine_next(&client);
        mine_next(&client);
        saved = client.blocks();
    }

    let reopened = Client::open(db, 1).unwrap();
    let loaded = reopened.blocks();
    assert_eq!(loaded.len(), saved.len());
    for (a, b) in loaded.iter().zip(saved.iter()) {
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.parent_hash, b.parent_hash);
        assert_eq!(a.state_root, b.state_root);
        assert!(a.is_valid(1));
    }
}

#[test]
fn fresh_node_adopts_longer_chain_then_follows_head() {
    let n1 = Client::open(memory_db(), 1).unwrap();
    for _ in 0..4 {
        mine_next(&n1);
    }

    // First handshake: the fresh node requests and adopts the full chain.
    let n2 = Client::open(memory_db(), 1).unwrap();
    assert!(n2.replace_chain(n1.blocks()));
    assert_eq!(n2.chain_length(), n1.chain_length());
    assert_eq!(n2.head_info(), n1.head_info());

    // Steady state: the next mined block imports directly. A block that
    // passes local validation also passes on the remote.
    mine_next(&n1);
    let head = n1.block_at(n1.head_info().0).unwrap();
    assert!(head.is_valid(1));
    assert_eq!(n2.import_block(&head), ImportOutcome::Imported);
    assert_eq!(n2.head_info(), n1.head_info());

    // Replaying the same block is a no-op.
    assert_eq!(n2.import_block(&head), ImportOutcome::AlreadyKnown);
}

#[test]
fn value_transfer_executes_in_a_mined_block() {
    let client = Client::open(memory_db(), 0).unwrap();
    let pair = KeyPair::generate();
    let alice = pair.address();
    client.add_balance(&alice, 100.0);

    let mut tx = Transaction::new(&alice, "bob", 10.0, 0);
    tx.sign(&pair).unwrap();
    client.queue_transaction(tx).unwrap();

    mine_next(&client);
    assert_eq!(client.pending_count(), 0);

    let block = client.block_at(1).unwrap();
    assert_eq!(block.transactions.len(), 1);
    assert_eq!(block.transactions[0].gas_used, 21_000);

    let (alice_balance, alice_nonce) = client.balance(&alice);
    assert!((alice_balance - 89.979).abs() < 1e-9);
    assert_eq!(alice_nonce, 1);
    assert_eq!(client.balance("bob").0, 10.0);
}

#[test]
fn underfunded_transfer_never_reaches_a_block() {
    let client = Client::open(memory_db(), 0).unwrap();
    let pair = KeyPair::generate();
    let alice = pair.address();
    client.add_balance(&alice, 0.02);

    let mut tx = Transaction::new(&alice, "bob", 100.0, 0);
    tx.sign(&pair).unwrap();
    assert!(client.queue_transaction(tx).is_err());
    assert_eq!(client.pending_count(), 0);

    mine_next(&client);
    assert!(client.block_at(1).unwrap().transactions.is_empty());
    assert_eq!(client.balance(&alice).0, 0.02);
}

#[test]
fn counter_contract_deploy_and_two_calls() {
    let client = Client::open(memory_db(), 0).unwrap();
    let pair = KeyPair::generate();
    let alice = pair.address();
    client.add_balance(&alice, 100.0);

    // PUSH1 0, SLOAD, PUSH1 1, ADD, PUSH1 0, SSTORE, STOP
    let counter = vec![0x60, 0x00, 0x54, 0x60, 0x01, 0x01, 0x60, 0x00, 0x55, 0x00];
    let mut deploy = Transaction::deployment(&alice, counter, 0);
    deploy.sign(&pair).unwrap();
    client.queue_transaction(deploy).unwrap();
    mine_next(&client);

    let mined = client.block_at(1).unwrap();
    let address = mined.transactions[0]
        .contract_address
        .clone()
        .expect("deploy records a contract address");

    for expected in 1..=2u64 {
        let mut call = Transaction::call(&alice, &address, Vec::new(), expected);
        call.sign(&pair).unwrap();
        client.queue_transaction(call).unwrap();
        mine_next(&client);
        assert_eq!(
            client.contract_storage(&address, U256::zero()),
            U256::from(expected)
        );
    }
}

#[test]
fn state_roots_bind_execution_to_consensus() {
    let n1 = Client::open(memory_db(), 0).unwrap();
    mine_next(&n1);

    let n2 = Client::open(memory_db(), 0).unwrap();
    assert!(n2.replace_chain(n1.blocks()));

    // A block whose stamped state root does not match what executing its
    // transactions produces is rejected, even with a redone proof of work.
    let head = n1.block_at(1).unwrap();
    let mut tampered = head.clone();
    tampered.index = 2;
    tampered.parent_hash = head.hash.clone();
    tampered.state_root = "f".repeat(64);
    tampered.hash = tampered.compute_hash();
    assert!(matches!(
        n2.import_block(&tampered),
        ImportOutcome::Rejected(_)
    ));
}
