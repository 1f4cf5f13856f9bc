// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! A connected peer: the write half behind a send mutex, identity learned
//! from the handshake, and liveness bookkeeping.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::message::{Message, NetError};

/// A peer is considered dead after this long without a frame.
const LIVENESS_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    pub node_id: String,
    pub version: String,
    pub best_height: u64,
}

pub struct Peer {
    /// Write half; one frame in flight at a time.
    writer: Mutex<TcpStream>,
    pub address: String,
    pub incoming: bool,
    identity: RwLock<PeerIdentity>,
    last_seen: Mutex<Instant>,
    closed: AtomicBool,
}

impl Peer {
    pub fn new(stream: TcpStream, incoming: bool) -> std::io::Result<Peer> {
        let address = stream.peer_addr()?.to_string();
        Ok(Peer {
            writer: Mutex::new(stream),
            address,
            incoming,
            identity: RwLock::new(PeerIdentity::default()),
            last_seen: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
        })
    }

    /// A separate handle for the blocking read loop.
    pub fn reader(&self) -> std::io::Result<TcpStream> {
        self.writer.lock().try_clone()
    }

    pub fn send(&self, message: &Message) -> Result<(), NetError> {
        let framed = message.encode()?;
        let mut writer = self.writer.lock();
        writer.write_all(&framed)?;
        Ok(())
    }

    pub fn update_identity(&self, node_id: String, version: String, best_height: u64) {
        let mut identity = self.identity.write();
        identity.node_id = node_id;
        identity.version = version;
        identity.best_height = best_height;
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity.read().clone()
    }

    pub fn best_height(&self) -> u64 {
        self.identity.read().best_height
    }

    pub fn set_best_height(&self, height: u64) {
        self.identity.write().best_height = height;
    }

    pub fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn is_alive(&self) -> bool {
        self.last_seen.lock().elapsed() < LIVENESS_WINDOW
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.writer.lock().shutdown(Shutdown::Both);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let identity = self.identity.read();
        write!(
            f,
            "Peer{{addr={}, node={}, height={}, {}}}",
            self.address,
            crate::util::ellipsis(&identity.node_id, 8),
            identity.best_height,
            if self.incoming { "incoming" } else { "outgoing" }
        )
    }
}
