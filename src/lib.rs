// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! A small proof-of-work blockchain node.
//!
//! The crate is organised leaves-first: `rlp` and `trie` are the
//! consensus-critical codecs, `state` holds the world state and its trie
//! commitment, `vm` is the contract interpreter, `exec` the transaction
//! executor, `chaindb` the on-disk chain schema, and `client` ties chain,
//! state and mempool together behind a single lock. `net`, `miner` and
//! `rpc` are the services running on top of the client.

pub mod chaindb;
pub mod client;
pub mod crypto;
pub mod db;
pub mod exec;
pub mod miner;
pub mod net;
pub mod rlp;
pub mod rpc;
pub mod state;
pub mod trie;
pub mod types;
pub mod util;
pub mod vm;
