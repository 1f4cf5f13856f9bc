// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use super::{Decodable, DecoderError};

/// A decoded view into an RLP fragment.
///
/// The view borrows the underlying bytes; `at` returns sub-views into list
/// items without copying.
#[derive(Clone, Copy)]
pub struct Rlp<'a> {
    bytes: &'a [u8],
}

/// Shape and extent of one RLP item.
struct Prototype {
    /// Offset of the payload within the item.
    payload_start: usize,
    payload_len: usize,
    is_list: bool,
}

impl<'a> Rlp<'a> {
    pub fn new(bytes: &'a [u8]) -> Rlp<'a> {
        Rlp { bytes }
    }

    pub fn as_raw(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_list(&self) -> bool {
        !self.bytes.is_empty() && self.bytes[0] >= 0xc0
    }

    pub fn is_data(&self) -> bool {
        !self.bytes.is_empty() && self.bytes[0] < 0xc0
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Payload bytes of a data item.
    pub fn data(&self) -> Result<&'a [u8], DecoderError> {
        let proto = self.prototype()?;
        if proto.is_list {
            return Err(DecoderError::RlpExpectedToBeData);
        }
        Ok(&self.bytes[proto.payload_start..proto.payload_start + proto.payload_len])
    }

    /// Number of items in a list.
    pub fn item_count(&self) -> Result<usize, DecoderError> {
        let payload = self.list_payload()?;
        let mut count = 0;
        let mut rest = payload;
        while !rest.is_empty() {
            let consumed = item_extent(rest)?;
            rest = &rest[consumed..];
            count += 1;
        }
        Ok(count)
    }

    /// Sub-view of the `index`-th list item.
    pub fn at(&self, index: usize) -> Result<Rlp<'a>, DecoderError> {
        let payload = self.list_payload()?;
        let mut rest = payload;
        let mut current = 0;
        while !rest.is_empty() {
            let consumed = item_extent(rest)?;
            if current == index {
                return Ok(Rlp::new(&rest[..consumed]));
            }
            rest = &rest[consumed..];
            current += 1;
        }
        Err(DecoderError::RlpIncorrectListLen)
    }

    /// Decode this fragment as a value.
    pub fn as_val<T: Decodable>(&self) -> Result<T, DecoderError> {
        T::decode(self)
    }

    /// Decode the `index`-th list item as a value.
    pub fn val_at<T: Decodable>(&self, index: usize) -> Result<T, DecoderError> {
        self.at(index)?.as_val()
    }

    /// Decode the `index`-th list item as a homogeneous list.
    pub fn list_at<T: Decodable>(&self, index: usize) -> Result<Vec<T>, DecoderError> {
        self.at(index)?.as_list()
    }

    /// Decode this fragment as a homogeneous list.
    pub fn as_list<T: Decodable>(&self) -> Result<Vec<T>, DecoderError> {
        let count = self.item_count()?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.val_at(i)?);
        }
        Ok(out)
    }

    /// Total encoded length of the item at the head of this fragment.
    pub fn encoded_len(&self) -> Result<usize, DecoderError> {
        item_extent(self.bytes)
    }

    fn list_payload(&self) -> Result<&'a [u8], DecoderError> {
        let proto = self.prototype()?;
        if !proto.is_list {
            return Err(DecoderError::RlpExpectedToBeList);
        }
        Ok(&self.bytes[proto.payload_start..proto.payload_start + proto.payload_len])
    }

    fn prototype(&self) -> Result<Prototype, DecoderError> {
        decode_prototype(self.bytes)
    }
}

/// Parse the prefix of one item, enforcing canonical form.
fn decode_prototype(bytes: &[u8]) -> Result<Prototype, DecoderError> {
    let first = *bytes.first().ok_or(DecoderError::RlpIsTooShort)?;
    let proto = match first {
        0x00..=0x7f => Prototype {
            payload_start: 0,
            payload_len: 1,
            is_list: false,
        },
        0x80..=0xb7 => {
            let len = (first - 0x80) as usize;
            if bytes.len() < 1 + len {
                return Err(DecoderError::RlpIsTooShort);
            }
            // A single byte below 0x80 must encode as itself.
            if len == 1 && bytes[1] < 0x80 {
                return Err(DecoderError::RlpInvalidIndirection);
            }
            Prototype {
                payload_start: 1,
                payload_len: len,
                is_list: false,
            }
        }
        0xb8..=0xbf => {
            let len = decode_long_length(bytes, first - 0xb7, DecoderError::RlpDataLenWithZeroPrefix)?;
            Prototype {
                payload_start: 1 + (first - 0xb7) as usize,
                payload_len: len,
                is_list: false,
            }
        }
        0xc0..=0xf7 => {
            let len = (first - 0xc0) as usize;
            if bytes.len() < 1 + len {
                return Err(DecoderError::RlpIsTooShort);
            }
            Prototype {
                payload_start: 1,
                payload_len: len,
                is_list: true,
            }
        }
        0xf8..=0xff => {
            let len = decode_long_length(bytes, first - 0xf7, DecoderError::RlpListLenWithZeroPrefix)?;
            Prototype {
                payload_start: 1 + (first - 0xf7) as usize,
                payload_len: len,
                is_list: true,
            }
        }
    };
    Ok(proto)
}

/// Decode the big-endian length of a long-form item, rejecting leading
/// zeros and lengths below 56 (which must use the short form).
fn decode_long_length(
    bytes: &[u8],
    len_of_len: u8,
    zero_prefix_error: DecoderError,
) -> Result<usize, DecoderError> {
    let len_of_len = len_of_len as usize;
    if bytes.len() < 1 + len_of_len {
        return Err(DecoderError::RlpIsTooShort);
    }
    let len_bytes = &bytes[1..1 + len_of_len];
    if len_bytes[0] == 0 {
        return Err(zero_prefix_error);
    }
    if len_of_len > std::mem::size_of::<usize>() {
        return Err(DecoderError::RlpIsTooBig);
    }
    let mut len = 0usize;
    for b in len_bytes {
        len = (len << 8) | *b as usize;
    }
    if len < 56 {
        return Err(DecoderError::RlpInvalidIndirection);
    }
    if bytes.len() < 1 + len_of_len + len {
        return Err(DecoderError::RlpIsTooShort);
    }
    Ok(len)
}

/// Full encoded length (header + payload) of the item starting at `bytes`.
fn item_extent(bytes: &[u8]) -> Result<usize, DecoderError> {
    let proto = decode_prototype(bytes)?;
    Ok(proto.payload_start + proto.payload_len)
}
