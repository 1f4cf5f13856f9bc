// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Mining: the interruptible proof of work and the 1 Hz sealing loop.
//!
//! One attempt runs at a time. A single-capacity channel carries the
//! "a competing block arrived, abandon the attempt" signal; the worker
//! polls it every nonce and yields briefly every 10 000 attempts so the
//! signal stays responsive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use crate::client::Client;
use crate::types::{meets_target, Block};
use crate::util::ellipsis;

/// Nonce interval between cooperative yields.
const YIELD_INTERVAL: u64 = 10_000;

/// Search for a nonce whose hash meets the difficulty target.
///
/// Returns false when a cancellation signal arrives; the block is then left
/// with whatever nonce was being tried and no hash settled.
pub fn mine(block: &mut Block, difficulty: usize, cancel: Option<&Receiver<()>>) -> bool {
    block.nonce = 0;
    loop {
        if let Some(rx) = cancel {
            if rx.try_recv().is_ok() {
                return false;
            }
        }
        block.hash = block.compute_hash();
        if meets_target(&block.hash, difficulty) {
            return true;
        }
        block.nonce += 1;
        if block.nonce % YIELD_INTERVAL == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

type BlockListener = Box<dyn Fn(&Block) + Send + Sync>;

pub struct Miner {
    client: Arc<Client>,
    enabled: AtomicBool,
    shutdown: AtomicBool,
    cancel_tx: SyncSender<()>,
    cancel_rx: Mutex<Option<Receiver<()>>>,
    on_mined: Mutex<Option<BlockListener>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Miner {
    pub fn new(client: Arc<Client>) -> Arc<Miner> {
        let (cancel_tx, cancel_rx) = sync_channel(1);
        Arc::new(Miner {
            client,
            enabled: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            cancel_tx,
            cancel_rx: Mutex::new(Some(cancel_rx)),
            on_mined: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Called with every locally sealed block, after it is installed.
    pub fn set_block_listener<F: Fn(&Block) + Send + Sync + 'static>(&self, listener: F) {
        *self.on_mined.lock() = Some(Box::new(listener));
    }

    /// Enable mining and spawn the sealing loop if it is not running yet.
    pub fn start(self: Arc<Self>) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut worker = self.worker.lock();
        if worker.is_none() {
            let rx = self
                .cancel_rx
                .lock()
                .take()
                .expect("worker spawned once; qed");
            let miner = self.clone();
            *worker = Some(
                thread::Builder::new()
                    .name("miner".into())
                    .spawn(move || miner.sealing_loop(rx))
                    .expect("thread spawn failed"),
            );
        }
        info!("continuous mining started");
    }

    /// Disable mining; the current attempt is abandoned.
    pub fn stop(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            self.cancel_current();
            info!("continuous mining stopped");
        }
    }

    pub fn is_mining(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Signal the worker that a competing block arrived.
    pub fn cancel_current(&self) {
        // A full channel already carries a pending signal.
        let _ = self.cancel_tx.try_send(());
    }

    /// Stop mining and join the worker thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        self.cancel_current();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn sealing_loop(&self, cancel: Receiver<()>) {
        loop {
            // 1 Hz tick, polled in small steps for responsive shutdown.
            for _ in 0..10 {
                if self.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
            if !self.enabled.load(Ordering::SeqCst) {
                continue;
            }

            // Clear cancellations that arrived between attempts.
            while cancel.try_recv().is_ok() {}

            let mut candidate = self.client.prepare_candidate();
            let tx_count = candidate.block.transactions.len();
            debug!(
                "sealing block #{} ({} transactions)",
                candidate.block.index, tx_count
            );

            if !mine(&mut candidate.block, self.client.difficulty(), Some(&cancel)) {
                debug!("mining cancelled, a competing block arrived");
                continue;
            }

            let block = candidate.block.clone();
            if self.client.seal_candidate(candidate) {
                info!(
                    "mined block #{} {} ({} transactions)",
                    block.index,
                    ellipsis(&block.hash, 16),
                    tx_count
                );
                if let Some(listener) = &*self.on_mined.lock() {
                    listener(&block);
                }
            } else {
                debug!("sealed block #{} went stale before install", block.index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdb::KeyValueDB;

    #[test]
    fn mine_satisfies_target() {
        let mut block = Block::new(1, Vec::new(), "00aa");
        assert!(mine(&mut block, 1, None));
        assert!(block.hash.starts_with('0'));
        assert_eq!(block.hash, block.compute_hash());
        assert!(block.is_valid(1));
    }

    #[test]
    fn mine_aborts_on_cancellation() {
        let (tx, rx) = sync_channel(1);
        tx.send(()).unwrap();
        // A pre-signalled channel aborts on the very first poll, even with
        // an absurd difficulty.
        let mut block = Block::new(1, Vec::new(), "00aa");
        assert!(!mine(&mut block, 60, Some(&rx)));
    }

    #[test]
    fn cancelled_attempt_appends_nothing() {
        let db: Arc<dyn KeyValueDB> = Arc::new(kvdb_memorydb::create(1));
        let client = Client::open(db, 0).unwrap();
        let miner = Miner::new(client.clone());

        let length_before = client.chain_length();
        miner.cancel_current();

        let mut candidate = client.prepare_candidate();
        let (_tx, rx) = {
            let (tx, rx) = sync_channel(1);
            tx.send(()).unwrap();
            (tx, rx)
        };
        if !mine(&mut candidate.block, 60, Some(&rx)) {
            // Dropped candidate: nothing was installed.
            assert_eq!(client.chain_length(), length_before);
        }
    }
}
