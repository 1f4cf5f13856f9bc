// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use std::{error, fmt};

/// Error concerning the RLP decoder.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecoderError {
    /// Data has additional bytes at the end of the valid RLP fragment.
    RlpIsTooBig,
    /// Data has too few bytes for valid RLP.
    RlpIsTooShort,
    /// Expected a single byte or string, got a list.
    RlpExpectedToBeData,
    /// Expected a list, got a single byte or string.
    RlpExpectedToBeList,
    /// A list has a different number of items than expected.
    RlpIncorrectListLen,
    /// Non-canonical size prefix: a value below 56 used the long form,
    /// or a single byte below 0x80 was wrapped in a string prefix.
    RlpInvalidIndirection,
    /// A multi-byte length carries a leading zero byte.
    RlpDataLenWithZeroPrefix,
    /// A multi-byte list length carries a leading zero byte.
    RlpListLenWithZeroPrefix,
    /// Declared length does not match the decoded item.
    RlpInvalidLength,
    /// An integer payload carries a leading zero byte.
    RlpInvalidIntegerRepresentation,
    /// Custom rlp decoding error.
    Custom(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecoderError::RlpIsTooBig => write!(f, "rlp has trailing bytes"),
            DecoderError::RlpIsTooShort => write!(f, "rlp is too short"),
            DecoderError::RlpExpectedToBeData => write!(f, "expected rlp data"),
            DecoderError::RlpExpectedToBeList => write!(f, "expected rlp list"),
            DecoderError::RlpIncorrectListLen => write!(f, "incorrect rlp list length"),
            DecoderError::RlpInvalidIndirection => write!(f, "non-canonical rlp size prefix"),
            DecoderError::RlpDataLenWithZeroPrefix => {
                write!(f, "rlp data length with zero prefix")
            }
            DecoderError::RlpListLenWithZeroPrefix => {
                write!(f, "rlp list length with zero prefix")
            }
            DecoderError::RlpInvalidLength => write!(f, "rlp invalid length"),
            DecoderError::RlpInvalidIntegerRepresentation => {
                write!(f, "rlp integer with leading zero")
            }
            DecoderError::Custom(s) => write!(f, "rlp: {}", s),
        }
    }
}

impl error::Error for DecoderError {}
