// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! The node binary: open the store, load or create the chain, start the
//! P2P service, the RPC server and the miner, then run until a signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use structopt::StructOpt;

use microchain::client::Client;
use microchain::miner::Miner;
use microchain::net::{self, Service};
use microchain::types::Transaction;
use microchain::util::ellipsis;
use microchain::{db, rpc};

#[derive(StructOpt)]
#[structopt(name = "microchain", about = "A small proof-of-work blockchain node")]
struct Args {
    /// P2P listen port.
    #[structopt(long, default_value = "3000")]
    port: u16,

    /// Interface to listen on.
    #[structopt(long, default_value = "0.0.0.0")]
    host: String,

    /// HTTP RPC port.
    #[structopt(long = "rpc", default_value = "8545")]
    rpc: u16,

    /// Chain data directory.
    #[structopt(long, default_value = "./chaindata")]
    datadir: String,

    /// Mining difficulty: leading zero hex characters required of a hash.
    #[structopt(long, default_value = "2")]
    difficulty: usize,

    /// Continuous mining.
    #[structopt(long, parse(try_from_str), default_value = "true")]
    mine: bool,

    /// Generate periodic test transactions.
    #[structopt(long, parse(try_from_str), default_value = "false")]
    autotx: bool,

    /// Comma-separated bootstrap nodes (host:port,host:port).
    #[structopt(long, default_value = "")]
    bootstrap: String,
}

fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let args = Args::from_args();

    info!("starting microchain node, datadir {}", args.datadir);
    let database = match db::open_database(&args.datadir) {
        Ok(database) => database,
        Err(e) => {
            error!("cannot open database at {}: {}", args.datadir, e);
            std::process::exit(1);
        }
    };

    let client = match Client::open(database, args.difficulty) {
        Ok(client) => client,
        Err(e) => {
            error!("cannot load chain: {}", e);
            std::process::exit(1);
        }
    };

    let miner = Miner::new(client.clone());
    let service = Service::new(
        net::Config {
            host: args.host.clone(),
            port: args.port,
            network_id: 1,
        },
        client.clone(),
        miner.clone(),
    );
    if let Err(e) = service.clone().start() {
        error!("cannot bind p2p listener on {}:{}: {}", args.host, args.port, e);
        std::process::exit(1);
    }

    // Locally mined blocks go straight to every peer.
    {
        let service = service.clone();
        miner.set_block_listener(move |block| service.broadcast_block(block, None));
    }

    let rpc_handle = rpc::spawn(args.rpc, client.clone(), service.clone(), miner.clone());

    // Dial the bootstrap nodes after a short grace period.
    for node in args.bootstrap.split(',').map(str::trim) {
        if node.is_empty() {
            continue;
        }
        let service = service.clone();
        let address = node.to_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(2));
            if let Err(e) = service.connect(&address) {
                warn!("bootstrap connect to {} failed: {}", address, e);
            }
        });
    }

    if args.mine {
        miner.clone().start();
    }

    let running = Arc::new(AtomicBool::new(true));
    if let Err(e) = ctrlc::set_handler({
        let running = running.clone();
        move || {
            running.store(false, Ordering::SeqCst);
        }
    }) {
        error!("cannot install signal handler: {}", e);
        std::process::exit(1);
    }

    spawn_info_solicitor(running.clone(), service.clone());
    spawn_status_printer(running.clone(), client.clone(), service.clone(), miner.clone());
    if args.autotx {
        info!("auto-transaction generator enabled");
        spawn_autotx(running.clone(), client.clone());
    }

    info!("node up: p2p {}:{}, rpc http://localhost:{}", args.host, args.port, args.rpc);

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    info!("termination signal received, shutting down");
    miner.shutdown();
    service.stop();
    rpc_handle.stop();
    info!("node stopped");
}

/// Tick fn: sleep `secs` in short steps, false once shutdown begins.
fn interruptible_sleep(running: &AtomicBool, secs: u64) -> bool {
    for _ in 0..secs * 5 {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(Duration::from_millis(200));
    }
    true
}

/// Every 30 s, ask connected peers for their chain summary.
fn spawn_info_solicitor(running: Arc<AtomicBool>, service: Arc<Service>) {
    thread::spawn(move || {
        while interruptible_sleep(&running, 30) {
            if service.peer_count() > 0 {
                service.solicit_chain_info();
            }
        }
    });
}

/// Every 30 s, log a status line.
fn spawn_status_printer(
    running: Arc<AtomicBool>,
    client: Arc<Client>,
    service: Arc<Service>,
    miner: Arc<Miner>,
) {
    thread::spawn(move || {
        while interruptible_sleep(&running, 30) {
            let (height, head) = client.head_info();
            info!(
                "status: height {}, head {}, {} pending, {} peers, mining {}",
                height,
                ellipsis(&head, 16),
                client.pending_count(),
                service.peer_count(),
                if miner.is_mining() { "on" } else { "off" }
            );
            for (address, peer_height) in service.peer_summaries() {
                info!("  peer {} (height {})", address, peer_height);
            }
        }
    });
}

/// Every 20 s, inject an unvalidated test transaction into the mempool.
fn spawn_autotx(running: Arc<AtomicBool>, client: Arc<Client>) {
    thread::spawn(move || {
        let mut counter: u64 = 0;
        while interruptible_sleep(&running, 20) {
            let tx = Transaction::new(
                &format!("auto-node-{}", counter % 100),
                &format!("recipient-{}", counter % 100),
                (counter % 10 + 1) as f64,
                counter,
            );
            let pending = client.queue_unchecked(tx);
            counter += 1;
            info!("auto transaction #{} queued ({} pending)", counter, pending);
        }
    });
}
