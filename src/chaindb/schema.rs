// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Key construction for the chain tables.

pub const HEADER_PREFIX: u8 = b'h';
pub const BODY_PREFIX: u8 = b'b';
pub const CANONICAL_PREFIX: u8 = b'H';
pub const NUMBER_PREFIX: u8 = b'l';
pub const CODE_PREFIX: u8 = b'c';

pub const HEAD_HEADER_KEY: &[u8] = b"LastHeader";
pub const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";

/// `h` ‖ BE64(number) ‖ hash
pub fn header_key(number: u64, hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + hash.len());
    key.push(HEADER_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// `b` ‖ BE64(number) ‖ hash
pub fn body_key(number: u64, hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + hash.len());
    key.push(BODY_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// `H` ‖ BE64(number)
pub fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(CANONICAL_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// `l` ‖ hash
pub fn number_key(hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + hash.len());
    key.push(NUMBER_PREFIX);
    key.extend_from_slice(hash);
    key
}

/// `c` ‖ code hash
pub fn code_key(code_hash: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + code_hash.len());
    key.push(CODE_PREFIX);
    key.extend_from_slice(code_hash);
    key
}
