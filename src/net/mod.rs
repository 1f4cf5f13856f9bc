// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! The P2P service: accept loop, per-peer readers, handshake, gossip and
//! chain synchronization.
//!
//! Blocks and transactions re-gossip to every peer except their origin.
//! A bounded fingerprint cache suppresses duplicate transactions. On
//! handshake, the side with the shorter chain requests the longer one and
//! replaces its own if the replacement validates.

mod message;
mod peer;
mod seen;

pub use self::message::{
    BlockchainInfo, Handshake, Message, MsgType, NetError, MAX_MESSAGE_SIZE, PROTOCOL_VERSION,
};
pub use self::peer::{Peer, PeerIdentity};

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use self::seen::SeenCache;
use crate::client::{Client, ImportOutcome};
use crate::miner::Miner;
use crate::types::{Block, Transaction};
use crate::util::ellipsis;

const MAX_PEERS: usize = 25;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct Config {
    pub host: String,
    pub port: u16,
    pub network_id: u64,
}

pub struct Service {
    config: Config,
    node_id: String,
    client: Arc<Client>,
    miner: Arc<Miner>,
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    seen_txs: Mutex<SeenCache>,
    shutdown: Arc<AtomicBool>,
    local_addr: Mutex<Option<SocketAddr>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    pub fn new(config: Config, client: Arc<Client>, miner: Arc<Miner>) -> Arc<Service> {
        let node_id = hex::encode(rand::random::<[u8; 16]>());
        Arc::new(Service {
            config,
            node_id,
            client,
            miner,
            peers: RwLock::new(HashMap::new()),
            seen_txs: Mutex::new(SeenCache::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            local_addr: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Bind the listener and spawn the accept and keep-alive loops.
    pub fn start(self: Arc<Self>) -> io::Result<()> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr)?;
        listener.set_nonblocking(true)?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        info!(
            "p2p server listening on {} (node {})",
            bind_addr,
            ellipsis(&self.node_id, 16)
        );

        let service = self.clone();
        let accept = thread::Builder::new()
            .name("p2p-accept".into())
            .spawn(move || service.accept_loop(listener))
            .expect("thread spawn failed");

        let service = self.clone();
        let keepalive = thread::Builder::new()
            .name("p2p-keepalive".into())
            .spawn(move || service.keepalive_loop())
            .expect("thread spawn failed");

        let mut threads = self.threads.lock();
        threads.push(accept);
        threads.push(keepalive);
        Ok(())
    }

    /// Dial a remote peer; the connection is handled on its own thread.
    pub fn connect(self: Arc<Self>, address: &str) -> io::Result<()> {
        if self.peers.read().contains_key(address) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("already connected to {}", address),
            ));
        }
        let socket_addr = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))?;
        let stream = TcpStream::connect_timeout(&socket_addr, DIAL_TIMEOUT)?;
        info!("connected to peer {}", address);

        let service = self.clone();
        let handle = thread::Builder::new()
            .name(format!("peer-{}", address))
            .spawn(move || service.handle_connection(stream, false))
            .expect("thread spawn failed");
        self.threads.lock().push(handle);
        Ok(())
    }

    /// The bound listener address, once `start` has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// (address, best height) per connected peer, for the status printer.
    pub fn peer_summaries(&self) -> Vec<(String, u64)> {
        self.peers
            .read()
            .values()
            .map(|p| (p.address.clone(), p.best_height()))
            .collect()
    }

    /// Gossip a block to every peer except `except`.
    pub fn broadcast_block(&self, block: &Block, except: Option<&str>) {
        let payload = match serde_json::to_vec(block) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to serialize block #{}: {}", block.index, e);
                return;
            }
        };
        let message = Message::new(MsgType::NewBlock, payload);
        let mut sent = 0usize;
        for peer in self.peers.read().values() {
            if Some(peer.address.as_str()) == except {
                continue;
            }
            match peer.send(&message) {
                Ok(()) => sent += 1,
                Err(e) => warn!("failed to send block to {}: {}", peer.address, e),
            }
        }
        if sent > 0 {
            debug!("block #{} propagated to {} peers", block.index, sent);
        }
    }

    /// Gossip a transaction to every peer except `except`.
    pub fn broadcast_transaction(&self, tx: &Transaction, except: Option<&str>) {
        let payload = match serde_json::to_vec(tx) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to serialize transaction: {}", e);
                return;
            }
        };
        let message = Message::new(MsgType::NewTransaction, payload);
        let mut sent = 0usize;
        for peer in self.peers.read().values() {
            if Some(peer.address.as_str()) == except {
                continue;
            }
            match peer.send(&message) {
                Ok(()) => sent += 1,
                Err(e) => warn!("failed to send transaction to {}: {}", peer.address, e),
            }
        }
        if sent > 0 {
            debug!("transaction propagated to {} peers", sent);
        }
    }

    /// A locally injected transaction: mark it seen, then gossip everywhere.
    pub fn announce_transaction(&self, tx: &Transaction) {
        if !self.seen_txs.lock().insert(tx.fingerprint()) {
            return;
        }
        self.broadcast_transaction(tx, None);
    }

    /// Ask every peer for its chain summary (the 30 s solicitation tick).
    pub fn solicit_chain_info(&self) {
        let message = Message::new(MsgType::GetBlockchain, Vec::new());
        for peer in self.peers.read().values() {
            if let Err(e) = peer.send(&message) {
                warn!("failed to solicit chain info from {}: {}", peer.address, e);
            }
        }
    }

    /// Close everything and join the service threads.
    pub fn stop(&self) {
        info!("stopping p2p server");
        self.shutdown.store(true, Ordering::SeqCst);
        for peer in self.peers.write().drain().map(|(_, p)| p) {
            peer.close();
        }
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        info!("p2p server stopped");
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    if self.peer_count() >= MAX_PEERS {
                        warn!("peer limit reached, rejecting {}", addr);
                        drop(stream);
                        continue;
                    }
                    debug!("incoming connection from {}", addr);
                    if stream.set_nonblocking(false).is_err() {
                        continue;
                    }
                    let service = self.clone();
                    let handle = thread::Builder::new()
                        .name(format!("peer-{}", addr))
                        .spawn(move || service.handle_connection(stream, true))
                        .expect("thread spawn failed");
                    self.threads.lock().push(handle);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::SeqCst) {
                        warn!("accept failed: {}", e);
                    }
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }

    /// Handshake, register, then pump messages until the peer goes away.
    fn handle_connection(self: Arc<Self>, stream: TcpStream, incoming: bool) {
        let peer = match Peer::new(stream, incoming) {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                warn!("failed to set up peer: {}", e);
                return;
            }
        };
        let mut reader = match peer.reader() {
            Ok(reader) => reader,
            Err(e) => {
                warn!("failed to clone peer stream: {}", e);
                return;
            }
        };

        if let Err(e) = self.perform_handshake(&peer, &mut reader) {
            warn!("handshake with {} failed: {}", peer.address, e);
            peer.close();
            return;
        }

        self.peers.write().insert(peer.address.clone(), peer.clone());
        info!("peer connected: {}", peer);

        while !self.shutdown.load(Ordering::SeqCst) && !peer.is_closed() {
            match Message::read_from(&mut reader) {
                Ok(message) => {
                    peer.mark_seen();
                    if let Err(e) = self.handle_message(&peer, message) {
                        // Malformed payloads and failed replies both end
                        // the peer; the node itself carries on.
                        warn!("dropping peer {}: {}", peer.address, e);
                        break;
                    }
                }
                Err(e) => {
                    // Bad frames and dead sockets end the peer too.
                    if !peer.is_closed() && !self.shutdown.load(Ordering::SeqCst) {
                        debug!("read from {} failed: {}", peer.address, e);
                    }
                    break;
                }
            }
        }

        self.peers.write().remove(&peer.address);
        peer.close();
        info!("peer disconnected: {}", peer.address);
    }

    /// Exchange handshakes: ours goes out first, theirs must be the first
    /// frame back, within the deadline, on the same protocol and network.
    fn perform_handshake(&self, peer: &Arc<Peer>, reader: &mut TcpStream) -> Result<(), NetError> {
        let (best_index, best_hash) = self.client.head_info();
        let ours = Handshake {
            version: PROTOCOL_VERSION.to_string(),
            network_id: self.config.network_id,
            best_block_index: best_index,
            best_block_hash: best_hash,
            node_id: self.node_id.clone(),
            listen_port: self.config.port,
        };
        peer.send(&Message::new(MsgType::Handshake, serde_json::to_vec(&ours)?))?;

        reader.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let first = Message::read_from(reader)?;
        reader.set_read_timeout(None)?;

        if first.kind != MsgType::Handshake {
            return Err(NetError::UnexpectedMessage("expected handshake first"));
        }
        let theirs: Handshake = serde_json::from_slice(&first.payload)?;
        if theirs.version != PROTOCOL_VERSION {
            return Err(NetError::HandshakeMismatch(format!(
                "protocol version {} (ours {})",
                theirs.version, PROTOCOL_VERSION
            )));
        }
        if theirs.network_id != self.config.network_id {
            return Err(NetError::HandshakeMismatch(format!(
                "network id {} (ours {})",
                theirs.network_id, self.config.network_id
            )));
        }
        peer.update_identity(theirs.node_id, theirs.version, theirs.best_block_index);

        // First-handshake sync: the shorter side asks for the full chain.
        if theirs.best_block_index > best_index {
            info!(
                "peer {} is ahead ({} vs {}), requesting chain",
                ellipsis(&peer.address, 20),
                theirs.best_block_index,
                best_index
            );
            peer.send(&Message::new(MsgType::GetBlocks, Vec::new()))?;
        }
        Ok(())
    }

    fn handle_message(&self, peer: &Arc<Peer>, message: Message) -> Result<(), NetError> {
        match message.kind {
            MsgType::Ping => peer.send(&Message::new(MsgType::Pong, Vec::new())),
            MsgType::Pong => Ok(()),

            MsgType::GetBlocks => {
                let blocks = self.client.blocks();
                debug!(
                    "sending full chain to {} ({} blocks)",
                    ellipsis(&peer.address, 20),
                    blocks.len()
                );
                peer.send(&Message::new(MsgType::Blocks, serde_json::to_vec(&blocks)?))
            }

            MsgType::Blocks => {
                let blocks: Vec<Block> = serde_json::from_slice(&message.payload)?;
                debug!(
                    "received chain from {} ({} blocks)",
                    ellipsis(&peer.address, 20),
                    blocks.len()
                );
                if self.client.replace_chain(blocks) {
                    self.miner.cancel_current();
                }
                Ok(())
            }

            MsgType::GetBlockchain => {
                let (index, hash) = self.client.head_info();
                let info = BlockchainInfo {
                    height: self.client.chain_length() as u64,
                    best_block_hash: hash,
                    best_block_index: index,
                    difficulty: self.client.difficulty() as u64,
                };
                peer.send(&Message::new(MsgType::Blockchain, serde_json::to_vec(&info)?))
            }

            MsgType::Blockchain => {
                let info: BlockchainInfo = serde_json::from_slice(&message.payload)?;
                peer.set_best_height(info.best_block_index);
                let (ours, _) = self.client.head_info();
                if info.best_block_index > ours {
                    peer.send(&Message::new(MsgType::GetBlocks, Vec::new()))?;
                }
                Ok(())
            }

            MsgType::NewBlock => {
                let block: Block = serde_json::from_slice(&message.payload)?;
                debug!(
                    "new block #{} from {}",
                    block.index,
                    ellipsis(&peer.address, 20)
                );
                self.handle_new_block(peer, block);
                Ok(())
            }

            MsgType::NewTransaction => {
                let tx: Transaction = serde_json::from_slice(&message.payload)?;
                if !self.seen_txs.lock().insert(tx.fingerprint()) {
                    return Ok(());
                }
                let pending = self.client.queue_unchecked(tx.clone());
                debug!(
                    "transaction {} -> {} queued from gossip ({} pending)",
                    ellipsis(&tx.from, 16),
                    ellipsis(&tx.to, 16),
                    pending
                );
                self.broadcast_transaction(&tx, Some(&peer.address));
                Ok(())
            }

            MsgType::Handshake => {
                debug!("duplicate handshake from {}, ignored", peer.address);
                Ok(())
            }

            // Reserved pair; nothing to do yet.
            MsgType::GetPeers | MsgType::Peers => Ok(()),
        }
    }

    fn handle_new_block(&self, peer: &Arc<Peer>, block: Block) {
        match self.client.import_block(&block) {
            ImportOutcome::Imported => {
                // Whatever we were sealing is now stale.
                self.miner.cancel_current();
                info!(
                    "imported block #{} {} from {}",
                    block.index,
                    ellipsis(&block.hash, 16),
                    ellipsis(&peer.address, 20)
                );
                self.broadcast_block(&block, Some(&peer.address));
            }
            ImportOutcome::AlreadyKnown => {
                debug!("block #{} already known, ignored", block.index);
            }
            ImportOutcome::FutureBlock => {
                info!(
                    "peer {} is ahead (block #{}), requesting full chain",
                    ellipsis(&peer.address, 20),
                    block.index
                );
                if let Err(e) = peer.send(&Message::new(MsgType::GetBlocks, Vec::new())) {
                    warn!("failed to request chain from {}: {}", peer.address, e);
                }
            }
            ImportOutcome::Rejected(reason) => {
                warn!("rejected block #{} from {}: {}", block.index, peer.address, reason);
            }
        }
    }

    fn keepalive_loop(self: Arc<Self>) {
        let mut elapsed = Duration::ZERO;
        while !self.shutdown.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(250));
            elapsed += Duration::from_millis(250);
            if elapsed < KEEPALIVE_INTERVAL {
                continue;
            }
            elapsed = Duration::ZERO;

            let peers: Vec<Arc<Peer>> = self.peers.read().values().cloned().collect();
            for peer in peers {
                if !peer.is_alive() {
                    warn!("peer {} unresponsive, disconnecting", peer.address);
                    peer.close();
                    self.peers.write().remove(&peer.address);
                } else if let Err(e) = peer.send(&Message::new(MsgType::Ping, Vec::new())) {
                    debug!("ping to {} failed: {}", peer.address, e);
                }
            }
        }
    }
}
