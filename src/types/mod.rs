// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Chain data structures: transactions and blocks, together with their
//! wire (JSON) form and consensus hashing rules.

mod block;
mod transaction;

pub use self::block::{meets_target, Block, GENESIS_PARENT_HASH};
pub use self::transaction::Transaction;
