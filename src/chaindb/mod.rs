// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! On-disk chain schema over the key/value store.
//!
//! Keys are byte-packed: a one-byte prefix, an 8-byte big-endian block
//! number where applicable, and raw 32-byte hashes. Headers and bodies are
//! RLP; each body entry is the JSON wire encoding of one transaction kept
//! as an opaque byte string.
//!
//! | prefix | key                          | value            |
//! |--------|------------------------------|------------------|
//! | `h`    | prefix ‖ BE64(num) ‖ hash    | RLP(header)      |
//! | `b`    | prefix ‖ BE64(num) ‖ hash    | RLP(body)        |
//! | `H`    | prefix ‖ BE64(num)           | canonical hash   |
//! | `l`    | prefix ‖ hash                | BE64(num)        |
//! | `c`    | prefix ‖ code hash           | contract code    |
//! | (none) | `LastHeader` / `LastBlock`   | head hash        |

mod schema;

pub use self::schema::*;

use std::{error, fmt, io};

use kvdb::{DBTransaction, KeyValueDB};
use log::warn;

use crate::db::COL_CHAIN;
use crate::rlp::{self, Decodable, DecoderError, Encodable, Rlp, RlpStream};
use crate::types::{Block, Transaction};
use crate::util::{hash_from_disk, hash_to_disk};

#[derive(Debug)]
pub enum ChainDbError {
    Io(io::Error),
    Decoder(DecoderError),
    /// The canonical index names a block that is not stored.
    MissingBlock(u64),
}

impl fmt::Display for ChainDbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainDbError::Io(e) => write!(f, "chain database i/o error: {}", e),
            ChainDbError::Decoder(e) => write!(f, "chain database decode error: {}", e),
            ChainDbError::MissingBlock(n) => write!(f, "missing canonical block #{}", n),
        }
    }
}

impl error::Error for ChainDbError {}

impl From<io::Error> for ChainDbError {
    fn from(e: io::Error) -> Self {
        ChainDbError::Io(e)
    }
}

impl From<DecoderError> for ChainDbError {
    fn from(e: DecoderError) -> Self {
        ChainDbError::Decoder(e)
    }
}

/// The persisted header fields.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
    pub parent_hash: Vec<u8>,
    pub number: u64,
    pub state_root: Vec<u8>,
    pub tx_root: Vec<u8>,
    pub receipt_root: Vec<u8>,
    pub timestamp: u64,
    pub nonce: u64,
    pub hash: Vec<u8>,
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(8);
        s.append(&self.parent_hash)
            .append(&self.number)
            .append(&self.state_root)
            .append(&self.tx_root)
            .append(&self.receipt_root)
            .append(&self.timestamp)
            .append(&self.nonce)
            .append(&self.hash);
    }
}

impl Decodable for BlockHeader {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 8 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(BlockHeader {
            parent_hash: rlp.val_at(0)?,
            number: rlp.val_at(1)?,
            state_root: rlp.val_at(2)?,
            tx_root: rlp.val_at(3)?,
            receipt_root: rlp.val_at(4)?,
            timestamp: rlp.val_at(5)?,
            nonce: rlp.val_at(6)?,
            hash: rlp.val_at(7)?,
        })
    }
}

/// The persisted body: JSON-encoded transactions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockBody {
    pub transactions: Vec<Vec<u8>>,
}

impl Encodable for BlockBody {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(1);
        s.append_list(&self.transactions);
    }
}

impl Decodable for BlockBody {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 1 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(BlockBody {
            transactions: rlp.list_at(0)?,
        })
    }
}

pub fn read_canonical_hash(
    db: &dyn KeyValueDB,
    number: u64,
) -> Result<Option<Vec<u8>>, ChainDbError> {
    Ok(db.get(COL_CHAIN, &canonical_key(number))?.map(|v| v.to_vec()))
}

pub fn write_canonical_hash(tx: &mut DBTransaction, hash: &[u8], number: u64) {
    tx.put(COL_CHAIN, &canonical_key(number), hash);
}

pub fn read_header_number(db: &dyn KeyValueDB, hash: &[u8]) -> Result<Option<u64>, ChainDbError> {
    match db.get(COL_CHAIN, &number_key(hash))? {
        Some(raw) if raw.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&raw);
            Ok(Some(u64::from_be_bytes(buf)))
        }
        Some(_) => Err(ChainDbError::Decoder(DecoderError::RlpInvalidLength)),
        None => Ok(None),
    }
}

pub fn read_header(
    db: &dyn KeyValueDB,
    hash: &[u8],
    number: u64,
) -> Result<Option<BlockHeader>, ChainDbError> {
    match db.get(COL_CHAIN, &header_key(number, hash))? {
        Some(raw) => Ok(Some(rlp::decode(&raw)?)),
        None => Ok(None),
    }
}

pub fn read_body(
    db: &dyn KeyValueDB,
    hash: &[u8],
    number: u64,
) -> Result<Option<BlockBody>, ChainDbError> {
    match db.get(COL_CHAIN, &body_key(number, hash))? {
        Some(raw) => Ok(Some(rlp::decode(&raw)?)),
        None => Ok(None),
    }
}

/// Queue header, body and the hash→number lookup into one batch.
pub fn write_block(tx: &mut DBTransaction, header: &BlockHeader, body: &BlockBody) {
    tx.put(
        COL_CHAIN,
        &header_key(header.number, &header.hash),
        &rlp::encode(header),
    );
    tx.put(
        COL_CHAIN,
        &number_key(&header.hash),
        &header.number.to_be_bytes(),
    );
    tx.put(
        COL_CHAIN,
        &body_key(header.number, &header.hash),
        &rlp::encode(body),
    );
}

pub fn read_head_block_hash(db: &dyn KeyValueDB) -> Result<Option<Vec<u8>>, ChainDbError> {
    Ok(db.get(COL_CHAIN, HEAD_BLOCK_KEY)?.map(|v| v.to_vec()))
}

pub fn write_head_block_hash(tx: &mut DBTransaction, hash: &[u8]) {
    tx.put(COL_CHAIN, HEAD_BLOCK_KEY, hash);
}

pub fn write_head_header_hash(tx: &mut DBTransaction, hash: &[u8]) {
    tx.put(COL_CHAIN, HEAD_HEADER_KEY, hash);
}

/// Persist one accepted block: tables, canonical index and head pointers,
/// committed atomically.
pub fn persist_block(db: &dyn KeyValueDB, block: &Block) -> Result<(), ChainDbError> {
    let header = block_to_header(block);
    let body = block_to_body(block);
    let mut tx = db.transaction();
    write_block(&mut tx, &header, &body);
    write_canonical_hash(&mut tx, &header.hash, header.number);
    write_head_block_hash(&mut tx, &header.hash);
    write_head_header_hash(&mut tx, &header.hash);
    db.write(tx)?;
    Ok(())
}

/// Load the whole canonical chain, or `None` when the store is fresh.
pub fn load_chain(db: &dyn KeyValueDB) -> Result<Option<Vec<Block>>, ChainDbError> {
    let head = match read_head_block_hash(db)? {
        Some(hash) => hash,
        None => return Ok(None),
    };
    let head_number = read_header_number(db, &head)?
        .ok_or(ChainDbError::MissingBlock(0))?;

    let mut blocks = Vec::with_capacity(head_number as usize + 1);
    for number in 0..=head_number {
        let hash = read_canonical_hash(db, number)?
            .ok_or(ChainDbError::MissingBlock(number))?;
        let header = read_header(db, &hash, number)?
            .ok_or(ChainDbError::MissingBlock(number))?;
        let body = read_body(db, &hash, number)?
            .ok_or(ChainDbError::MissingBlock(number))?;
        blocks.push(block_from_parts(header, body));
    }
    Ok(Some(blocks))
}

pub fn block_to_header(block: &Block) -> BlockHeader {
    BlockHeader {
        parent_hash: hash_to_disk(&block.parent_hash),
        number: block.index,
        state_root: hash_to_disk(&block.state_root),
        tx_root: hash_to_disk(&block.tx_root),
        receipt_root: hash_to_disk(&block.receipt_root),
        timestamp: block.timestamp,
        nonce: block.nonce,
        hash: hash_to_disk(&block.hash),
    }
}

pub fn block_to_body(block: &Block) -> BlockBody {
    let transactions = block
        .transactions
        .iter()
        .filter_map(|tx| match serde_json::to_vec(tx) {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!("dropping unserializable transaction from body: {}", e);
                None
            }
        })
        .collect();
    BlockBody { transactions }
}

pub fn block_from_parts(header: BlockHeader, body: BlockBody) -> Block {
    let transactions: Vec<Transaction> = body
        .transactions
        .iter()
        .filter_map(|raw| match serde_json::from_slice(raw) {
            Ok(tx) => Some(tx),
            Err(e) => {
                warn!("dropping undecodable transaction from block #{}: {}", header.number, e);
                None
            }
        })
        .collect();
    Block {
        index: header.number,
        timestamp: header.timestamp,
        transactions,
        parent_hash: hash_from_disk(&header.parent_hash),
        hash: hash_from_disk(&header.hash),
        nonce: header.nonce,
        state_root: hash_from_disk(&header.state_root),
        tx_root: hash_from_disk(&header.tx_root),
        receipt_root: hash_from_disk(&header.receipt_root),
    }
}
