// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Wallet utility: key generation and offline transaction signing.
//!
//! The signed transaction prints as JSON ready for `POST /tx` on a node's
//! RPC port.

use serde_json::json;
use structopt::StructOpt;

use microchain::crypto::KeyPair;
use microchain::types::Transaction;

#[derive(StructOpt)]
#[structopt(name = "microchain-wallet", about = "Key and transaction tooling")]
enum Command {
    /// Generate a new key pair.
    New,
    /// Show the address for a secret key.
    Address {
        /// Secret key (hex).
        #[structopt(long)]
        secret: String,
    },
    /// Sign a transaction and print its JSON.
    Sign {
        /// Secret key (hex).
        #[structopt(long)]
        secret: String,
        /// Recipient address; leave empty together with --data to deploy.
        #[structopt(long, default_value = "")]
        to: String,
        /// Amount in MTC.
        #[structopt(long, default_value = "0")]
        amount: f64,
        /// Sender nonce (the account's current nonce).
        #[structopt(long)]
        nonce: u64,
        /// Contract bytecode or calldata (hex).
        #[structopt(long, default_value = "")]
        data: String,
    },
}

fn main() {
    let command = Command::from_args();
    match run(command) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(command: Command) -> Result<String, Box<dyn std::error::Error>> {
    match command {
        Command::New => {
            let pair = KeyPair::generate();
            Ok(serde_json::to_string_pretty(&json!({
                "address": pair.address(),
                "secret": pair.secret_hex(),
            }))?)
        }
        Command::Address { secret } => {
            let pair = KeyPair::from_secret_hex(&secret)?;
            Ok(pair.address())
        }
        Command::Sign {
            secret,
            to,
            amount,
            nonce,
            data,
        } => {
            let pair = KeyPair::from_secret_hex(&secret)?;
            let mut tx = Transaction::new(&pair.address(), &to, amount, nonce);
            if !data.is_empty() {
                tx.data = hex::decode(&data)?;
            }
            tx.sign(&pair)?;
            Ok(serde_json::to_string_pretty(&tx)?)
        }
    }
}
