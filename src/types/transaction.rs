// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, CryptoError, KeyPair};

/// A value transfer, contract deployment or contract call.
///
/// `to` empty with non-empty `data` means "deploy"; `to` naming a known
/// contract means "call"; anything else is a plain transfer.
/// `contract_address` and `gas_used` are filled in by execution and are not
/// part of the signed payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub nonce: u64,
    /// Bytecode for a deploy, calldata for a call; hex on the wire.
    #[serde(default, with = "hex_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub pubkey_x: String,
    #[serde(default)]
    pub pubkey_y: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub gas_used: u64,
}

impl Transaction {
    pub fn new(from: &str, to: &str, amount: f64, nonce: u64) -> Transaction {
        Transaction {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            nonce,
            ..Default::default()
        }
    }

    pub fn deployment(from: &str, bytecode: Vec<u8>, nonce: u64) -> Transaction {
        Transaction {
            from: from.to_string(),
            data: bytecode,
            nonce,
            ..Default::default()
        }
    }

    pub fn call(from: &str, contract: &str, calldata: Vec<u8>, nonce: u64) -> Transaction {
        Transaction {
            from: from.to_string(),
            to: contract.to_string(),
            data: calldata,
            nonce,
            ..Default::default()
        }
    }

    pub fn is_deploy(&self) -> bool {
        self.to.is_empty() && !self.data.is_empty()
    }

    /// The string the sender signs. The signature itself is excluded.
    pub fn signing_data(&self) -> String {
        format!("{}:{}:{:.2}:{}", self.from, self.to, self.amount, self.nonce)
    }

    /// Gossip deduplication fingerprint.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.signing_data())
    }

    /// The transaction's slot in the block hash preimage.
    pub fn digest_entry(&self) -> String {
        format!(
            "from={}|to={}|amount={:.2}|nonce={}|data={}|sig={}",
            self.from,
            self.to,
            self.amount,
            self.nonce,
            hex::encode(&self.data),
            self.signature
        )
    }

    /// Sign with `pair`, storing the signature and public key coordinates.
    pub fn sign(&mut self, pair: &KeyPair) -> Result<(), CryptoError> {
        if self.from != pair.address() {
            return Err(CryptoError::InvalidPublicKey);
        }
        let (x, y) = pair.public_xy();
        self.pubkey_x = x;
        self.pubkey_y = y;
        self.signature = pair.sign(self.signing_data().as_bytes());
        Ok(())
    }

    pub fn verify_signature(&self) -> bool {
        if self.signature.is_empty() || self.pubkey_x.is_empty() || self.pubkey_y.is_empty() {
            return false;
        }
        crypto::verify(
            &self.pubkey_x,
            &self.pubkey_y,
            self.signing_data().as_bytes(),
            &self.signature,
        )
    }
}

/// Byte payloads rendered as hex strings in JSON.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_data_uses_two_decimals() {
        let tx = Transaction::new("alice", "bob", 10.0, 3);
        assert_eq!(tx.signing_data(), "alice:bob:10.00:3");
        assert_eq!(tx.fingerprint(), hex::encode("alice:bob:10.00:3"));
    }

    #[test]
    fn sign_rejects_foreign_sender() {
        let pair = KeyPair::generate();
        let mut tx = Transaction::new("someone-else", "bob", 1.0, 0);
        assert!(tx.sign(&pair).is_err());
    }

    #[test]
    fn signed_transaction_verifies() {
        let pair = KeyPair::generate();
        let mut tx = Transaction::new(&pair.address(), "bob", 5.5, 0);
        tx.sign(&pair).unwrap();
        assert!(tx.verify_signature());

        tx.amount = 6.5;
        assert!(!tx.verify_signature());
    }

    #[test]
    fn unsigned_transaction_does_not_verify() {
        let tx = Transaction::new("alice", "bob", 1.0, 0);
        assert!(!tx.verify_signature());
    }

    #[test]
    fn json_round_trip_keeps_data_hex() {
        let mut tx = Transaction::deployment("alice", vec![0x60, 0x00, 0x55], 2);
        tx.gas_used = 42;
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"600055\""));

        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, vec![0x60, 0x00, 0x55]);
        assert_eq!(back.nonce, 2);
        assert!(back.is_deploy());
        assert!(back.contract_address.is_none());
    }

    #[test]
    fn digest_entry_is_stable() {
        let tx = Transaction::call("a", "b", vec![0x01], 1);
        assert_eq!(tx.digest_entry(), "from=a|to=b|amount=0.00|nonce=1|data=01|sig=");
    }
}
