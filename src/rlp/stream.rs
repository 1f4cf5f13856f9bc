// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use super::Encodable;

/// An RLP encoder.
///
/// Lists are declared with their item count up front; the header is patched
/// in once the declared number of items has been appended.
///
/// ```
/// use microchain::rlp::RlpStream;
///
/// let mut s = RlpStream::new_list(2);
/// s.append(&17u64).append(&"cat".as_bytes().to_vec());
/// let out = s.out();
/// assert_eq!(out[0], 0xc5);
/// ```
#[derive(Default)]
pub struct RlpStream {
    buffer: Vec<u8>,
    unfinished: Vec<ListInfo>,
    /// Set when the last write closed a list, so a wrapping `append` does
    /// not count that item twice.
    finished_list: bool,
}

struct ListInfo {
    /// Offset of the list payload in `buffer`.
    position: usize,
    /// Items still expected before the list closes.
    remaining: usize,
}

impl RlpStream {
    pub fn new() -> Self {
        RlpStream {
            buffer: Vec::new(),
            unfinished: Vec::new(),
            finished_list: false,
        }
    }

    pub fn new_list(len: usize) -> Self {
        let mut stream = RlpStream::new();
        stream.begin_list(len);
        stream
    }

    /// Declare a list of `len` items. An empty list closes immediately.
    pub fn begin_list(&mut self, len: usize) -> &mut Self {
        if len == 0 {
            self.buffer.push(0xc0);
            self.note_appended();
            self.finished_list = true;
        } else {
            self.unfinished.push(ListInfo {
                position: self.buffer.len(),
                remaining: len,
            });
        }
        self
    }

    /// Append a single encodable value.
    pub fn append<E: Encodable + ?Sized>(&mut self, value: &E) -> &mut Self {
        self.finished_list = false;
        value.rlp_append(self);
        // A value that closed its own list already counted itself through
        // the close; anything else counts here.
        if !self.finished_list {
            self.note_appended();
        }
        self
    }

    /// Append a slice of values as one nested list.
    pub fn append_list<E: Encodable>(&mut self, values: &[E]) -> &mut Self {
        self.begin_list(values.len());
        for value in values {
            self.append(value);
        }
        self
    }

    /// Append pre-encoded RLP counting as one item.
    pub fn append_raw(&mut self, raw: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(raw);
        self.note_appended();
        self
    }

    /// Append byte content with a string header. Used by `Encodable` impls.
    pub(crate) fn encoder_put_bytes(&mut self, bytes: &[u8]) {
        match bytes.len() {
            1 if bytes[0] < 0x80 => self.buffer.push(bytes[0]),
            len if len < 56 => {
                self.buffer.push(0x80 + len as u8);
                self.buffer.extend_from_slice(bytes);
            }
            len => {
                let len_bytes = to_be_minimal(len as u64);
                self.buffer.push(0xb7 + len_bytes.len() as u8);
                self.buffer.extend_from_slice(&len_bytes);
                self.buffer.extend_from_slice(bytes);
            }
        }
    }

    /// Is the stream finished (no open lists)?
    pub fn is_finished(&self) -> bool {
        self.unfinished.is_empty()
    }

    /// Consume the stream, returning the encoding.
    ///
    /// Panics when a declared list has not been filled; that is a programmer
    /// error at the call site, never a data-dependent condition.
    pub fn out(self) -> Vec<u8> {
        assert!(self.is_finished(), "rlp stream has unfinished lists");
        self.buffer
    }

    fn note_appended(&mut self) {
        while let Some(top) = self.unfinished.last_mut() {
            top.remaining -= 1;
            if top.remaining > 0 {
                return;
            }
            // The list is complete: wrap its payload with a header.
            let info = self.unfinished.pop().expect("last_mut returned Some; qed");
            let payload_len = self.buffer.len() - info.position;
            let header = list_header(payload_len);
            self.buffer
                .splice(info.position..info.position, header.into_iter());
            self.finished_list = true;
            // Closing a nested list counts as appending one item to its
            // parent, so continue up the stack.
        }
    }
}

fn list_header(payload_len: usize) -> Vec<u8> {
    if payload_len < 56 {
        vec![0xc0 + payload_len as u8]
    } else {
        let len_bytes = to_be_minimal(payload_len as u64);
        let mut header = Vec::with_capacity(1 + len_bytes.len());
        header.push(0xf7 + len_bytes.len() as u8);
        header.extend_from_slice(&len_bytes);
        header
    }
}

/// Big-endian bytes of `value` without leading zeros; empty for zero.
pub(crate) fn to_be_minimal(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}
