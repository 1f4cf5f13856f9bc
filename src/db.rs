// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Database access: one RocksDB key/value store per node.
//!
//! Everything (chain data, trie nodes, preimages, contract code) shares a
//! single column; the byte-prefix schema in `chaindb` keeps the namespaces
//! apart. Tests substitute `kvdb-memorydb`.

use std::io;
use std::sync::Arc;

use kvdb::KeyValueDB;
use kvdb_rocksdb::{Database, DatabaseConfig};

pub const NUM_COLUMNS: u32 = 1;
pub const COL_STATE: u32 = 0;
pub const COL_CHAIN: u32 = 0;

/// Open (or create) the node database under `path`.
pub fn open_database(path: &str) -> io::Result<Arc<dyn KeyValueDB>> {
    let config = DatabaseConfig::with_columns(NUM_COLUMNS);
    let db = Database::open(&config, path)?;
    Ok(Arc::new(db))
}
