// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Wire framing and message payloads.
//!
//! A frame is one type byte, a 4-byte big-endian payload length and the
//! payload itself, capped at 10 MiB. Payloads are JSON.

use std::io::{self, Read};
use std::{error, fmt};

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Handshake,
    Ping,
    Pong,
    NewBlock,
    NewTransaction,
    GetBlocks,
    Blocks,
    GetBlockchain,
    Blockchain,
    GetPeers,
    Peers,
}

impl MsgType {
    pub fn from_u8(byte: u8) -> Option<MsgType> {
        match byte {
            0x00 => Some(MsgType::Handshake),
            0x01 => Some(MsgType::Ping),
            0x02 => Some(MsgType::Pong),
            0x10 => Some(MsgType::NewBlock),
            0x11 => Some(MsgType::NewTransaction),
            0x20 => Some(MsgType::GetBlocks),
            0x21 => Some(MsgType::Blocks),
            0x22 => Some(MsgType::GetBlockchain),
            0x23 => Some(MsgType::Blockchain),
            0x30 => Some(MsgType::GetPeers),
            0x31 => Some(MsgType::Peers),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MsgType::Handshake => 0x00,
            MsgType::Ping => 0x01,
            MsgType::Pong => 0x02,
            MsgType::NewBlock => 0x10,
            MsgType::NewTransaction => 0x11,
            MsgType::GetBlocks => 0x20,
            MsgType::Blocks => 0x21,
            MsgType::GetBlockchain => 0x22,
            MsgType::Blockchain => 0x23,
            MsgType::GetPeers => 0x30,
            MsgType::Peers => 0x31,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MsgType::Handshake => "Handshake",
            MsgType::Ping => "Ping",
            MsgType::Pong => "Pong",
            MsgType::NewBlock => "NewBlock",
            MsgType::NewTransaction => "NewTransaction",
            MsgType::GetBlocks => "GetBlocks",
            MsgType::Blocks => "Blocks",
            MsgType::GetBlockchain => "GetBlockchain",
            MsgType::Blockchain => "Blockchain",
            MsgType::GetPeers => "GetPeers",
            MsgType::Peers => "Peers",
        }
    }
}

#[derive(Debug)]
pub enum NetError {
    Io(io::Error),
    Json(serde_json::Error),
    UnknownType(u8),
    TooLarge(usize),
    UnexpectedMessage(&'static str),
    HandshakeMismatch(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NetError::Io(e) => write!(f, "network i/o error: {}", e),
            NetError::Json(e) => write!(f, "malformed payload: {}", e),
            NetError::UnknownType(b) => write!(f, "unknown message type 0x{:02x}", b),
            NetError::TooLarge(n) => {
                write!(f, "message too large: {} bytes (max {})", n, MAX_MESSAGE_SIZE)
            }
            NetError::UnexpectedMessage(s) => write!(f, "unexpected message: {}", s),
            NetError::HandshakeMismatch(s) => write!(f, "handshake rejected: {}", s),
        }
    }
}

impl error::Error for NetError {}

impl From<io::Error> for NetError {
    fn from(e: io::Error) -> Self {
        NetError::Io(e)
    }
}

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Json(e)
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MsgType,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MsgType, payload: Vec<u8>) -> Message {
        Message { kind, payload }
    }

    /// Frame for the wire: type, BE32 length, payload.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        if self.payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::TooLarge(self.payload.len()));
        }
        let mut out = Vec::with_capacity(5 + self.payload.len());
        out.push(self.kind.as_u8());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Read one frame. Blocks until a full frame or an error.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Message, NetError> {
        let mut kind_byte = [0u8; 1];
        reader.read_exact(&mut kind_byte)?;
        let kind = MsgType::from_u8(kind_byte[0]).ok_or(NetError::UnknownType(kind_byte[0]))?;

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(NetError::TooLarge(len));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Ok(Message { kind, payload })
    }
}

/// First frame in both directions on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub version: String,
    pub network_id: u64,
    pub best_block_index: u64,
    pub best_block_hash: String,
    pub node_id: String,
    pub listen_port: u16,
}

/// Chain summary exchanged on the 0x22/0x23 pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub height: u64,
    pub best_block_hash: String,
    pub best_block_index: u64,
    pub difficulty: u64,
}
