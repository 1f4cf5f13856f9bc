// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! HTTP RPC ingress.
//!
//! REST endpoints over warp; the tokio runtime lives entirely inside the
//! RPC thread, the rest of the node stays on plain threads. Transactions
//! submitted here go through full admission and are then gossiped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info};
use serde::Serialize;
use tokio::sync::oneshot;
use warp::http::StatusCode;
use warp::Filter;

use crate::client::Client;
use crate::miner::Miner;
use crate::net::Service;
use crate::types::Transaction;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    blocks: usize,
    last_block_hash: String,
    pending_txs: usize,
    peers: usize,
    mining: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxResponse {
    status: &'static str,
    message: String,
    tx_count: usize,
}

#[derive(Serialize)]
struct BalanceResponse {
    address: String,
    balance: f64,
    nonce: u64,
}

#[derive(Serialize)]
struct AccountEntry {
    address: String,
    balance: f64,
    nonce: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
}

pub struct RpcHandle {
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RpcHandle {
    pub fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Start the RPC server on its own thread. Binding failure is fatal to the
/// node, matching the listener-bind exit contract.
pub fn spawn(port: u16, client: Arc<Client>, net: Arc<Service>, miner: Arc<Miner>) -> RpcHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let worker = thread::Builder::new()
        .name("rpc".into())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("failed to build RPC runtime");

            runtime.block_on(async move {
                let routes = routes(client, net, miner);
                let addr = SocketAddr::from(([0, 0, 0, 0], port));
                match warp::serve(routes).try_bind_with_graceful_shutdown(addr, async {
                    let _ = shutdown_rx.await;
                }) {
                    Ok((bound, server)) => {
                        info!("rpc server listening on http://{}", bound);
                        server.await;
                        info!("rpc server stopped");
                    }
                    Err(e) => {
                        error!("failed to bind rpc server on port {}: {}", port, e);
                        std::process::exit(1);
                    }
                }
            });
        })
        .expect("thread spawn failed");

    RpcHandle {
        shutdown: Some(shutdown_tx),
        worker: Some(worker),
    }
}

fn routes(
    client: Arc<Client>,
    net: Arc<Service>,
    miner: Arc<Miner>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let status = {
        let client = client.clone();
        let net = net.clone();
        let miner = miner.clone();
        warp::path!("status").and(warp::get()).map(move || {
            let (_, head_hash) = client.head_info();
            warp::reply::json(&StatusResponse {
                blocks: client.chain_length(),
                last_block_hash: head_hash,
                pending_txs: client.pending_count(),
                peers: net.peer_count(),
                mining: miner.is_mining(),
            })
        })
    };

    let submit_tx = {
        let client = client.clone();
        let net = net.clone();
        warp::path!("tx")
            .and(warp::post())
            .and(warp::body::json())
            .map(move |tx: Transaction| {
                if tx.from.is_empty() {
                    return warp::reply::with_status(
                        warp::reply::json(&ErrorResponse {
                            status: "error",
                            message: "field 'from' is required".into(),
                        }),
                        StatusCode::BAD_REQUEST,
                    );
                }
                match client.queue_transaction(tx.clone()) {
                    Ok(count) => {
                        info!(
                            "rpc transaction accepted: {} -> {} ({:.2} MTC)",
                            crate::util::ellipsis(&tx.from, 16),
                            crate::util::ellipsis(&tx.to, 16),
                            tx.amount
                        );
                        net.announce_transaction(&tx);
                        warp::reply::with_status(
                            warp::reply::json(&TxResponse {
                                status: "success",
                                message: "transaction accepted into the mempool".into(),
                                tx_count: count,
                            }),
                            StatusCode::OK,
                        )
                    }
                    Err(e) => warp::reply::with_status(
                        warp::reply::json(&ErrorResponse {
                            status: "error",
                            message: e.to_string(),
                        }),
                        StatusCode::BAD_REQUEST,
                    ),
                }
            })
    };

    let balance = {
        let client = client.clone();
        warp::path!("balance" / String)
            .and(warp::get())
            .map(move |address: String| {
                let (balance, nonce) = client.balance(&address);
                warp::reply::json(&BalanceResponse {
                    address,
                    balance,
                    nonce,
                })
            })
    };

    let blocks = {
        let client = client.clone();
        warp::path!("api" / "blocks")
            .and(warp::get())
            .map(move || warp::reply::json(&client.blocks()))
    };

    let block = {
        let client = client.clone();
        warp::path!("api" / "block" / u64)
            .and(warp::get())
            .map(move |index: u64| match client.block_at(index) {
                Some(block) => {
                    warp::reply::with_status(warp::reply::json(&block), StatusCode::OK)
                }
                None => warp::reply::with_status(
                    warp::reply::json(&ErrorResponse {
                        status: "error",
                        message: format!("no block at index {}", index),
                    }),
                    StatusCode::NOT_FOUND,
                ),
            })
    };

    let accounts = {
        let client = client.clone();
        warp::path!("api" / "accounts").and(warp::get()).map(move || {
            let entries: Vec<AccountEntry> = client
                .accounts()
                .into_iter()
                .map(|(address, account)| AccountEntry {
                    address,
                    balance: account.balance,
                    nonce: account.nonce,
                })
                .collect();
            warp::reply::json(&entries)
        })
    };

    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    status
        .or(submit_tx)
        .or(balance)
        .or(blocks)
        .or(block)
        .or(accounts)
        .or(health)
}
