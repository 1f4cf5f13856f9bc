// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Recursive length prefix encoding.
//!
//! Scalars encode as big-endian minimal byte strings (zero is the empty
//! string), strings carry `0x80`/`0xb7`-family prefixes and lists the
//! `0xc0`/`0xf7` family. The decoder rejects every non-canonical form:
//! long-form prefixes for short payloads, multi-byte lengths with leading
//! zeros, wrapped single bytes below `0x80`, integers with leading zeros,
//! and trailing bytes after the outermost item.

mod decoder;
mod error;
mod stream;

pub use self::decoder::Rlp;
pub use self::error::DecoderError;
pub use self::stream::RlpStream;

use ethereum_types::H256;

/// A type that can be written to an `RlpStream`.
pub trait Encodable {
    fn rlp_append(&self, s: &mut RlpStream);
}

/// A type decodable from an `Rlp` view.
pub trait Decodable: Sized {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError>;
}

/// Encode a single value.
pub fn encode<E: Encodable>(value: &E) -> Vec<u8> {
    let mut s = RlpStream::new();
    s.append(value);
    s.out()
}

/// Encode a slice of values as a list.
pub fn encode_list<E: Encodable>(values: &[E]) -> Vec<u8> {
    let mut s = RlpStream::new();
    s.append_list(values);
    s.out()
}

/// Decode a single value, rejecting trailing bytes.
pub fn decode<T: Decodable>(bytes: &[u8]) -> Result<T, DecoderError> {
    let rlp = Rlp::new(bytes);
    if rlp.encoded_len()? != bytes.len() {
        return Err(DecoderError::RlpIsTooBig);
    }
    rlp.as_val()
}

/// Decode a homogeneous list, rejecting trailing bytes.
pub fn decode_list<T: Decodable>(bytes: &[u8]) -> Result<Vec<T>, DecoderError> {
    let rlp = Rlp::new(bytes);
    if rlp.encoded_len()? != bytes.len() {
        return Err(DecoderError::RlpIsTooBig);
    }
    rlp.as_list()
}

impl Encodable for u64 {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder_put_bytes(&stream::to_be_minimal(*self));
    }
}

impl Decodable for u64 {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let bytes = rlp.data()?;
        if bytes.len() > 8 {
            return Err(DecoderError::RlpIsTooBig);
        }
        if !bytes.is_empty() && bytes[0] == 0 {
            return Err(DecoderError::RlpInvalidIntegerRepresentation);
        }
        let mut value = 0u64;
        for b in bytes {
            value = (value << 8) | *b as u64;
        }
        Ok(value)
    }
}

impl Encodable for u8 {
    fn rlp_append(&self, s: &mut RlpStream) {
        (*self as u64).rlp_append(s);
    }
}

impl Decodable for u8 {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let value = u64::decode(rlp)?;
        if value > u8::MAX as u64 {
            return Err(DecoderError::RlpIsTooBig);
        }
        Ok(value as u8)
    }
}

impl Encodable for Vec<u8> {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder_put_bytes(self);
    }
}

impl Decodable for Vec<u8> {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(rlp.data()?.to_vec())
    }
}

impl Encodable for [u8] {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder_put_bytes(self);
    }
}

impl Encodable for String {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder_put_bytes(self.as_bytes());
    }
}

impl Decodable for String {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        String::from_utf8(rlp.data()?.to_vec())
            .map_err(|_| DecoderError::Custom("invalid utf-8 string"))
    }
}

impl Encodable for H256 {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.encoder_put_bytes(self.as_bytes());
    }
}

impl Decodable for H256 {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let bytes = rlp.data()?;
        if bytes.len() != 32 {
            return Err(DecoderError::RlpInvalidLength);
        }
        Ok(H256::from_slice(bytes))
    }
}
