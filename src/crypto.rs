// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Key pairs and transaction signatures.
//!
//! Signatures are ECDSA over P-256 with a SHA-256 prehash. A signature is
//! the 64-byte `r ‖ s` pair rendered as hex; the public key travels beside
//! it as decimal affine coordinates. Addresses are the first 40 hex chars
//! of the SHA-256 of the concatenated 32-byte coordinates.

use std::{error, fmt};

use ethereum_types::U256;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::EncodedPoint;
use sha2::{Digest, Sha256};

#[derive(Debug, PartialEq, Eq)]
pub enum CryptoError {
    InvalidSecret,
    InvalidPublicKey,
    InvalidSignature,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::InvalidSecret => write!(f, "invalid secret key"),
            CryptoError::InvalidPublicKey => write!(f, "invalid public key coordinates"),
            CryptoError::InvalidSignature => write!(f, "malformed signature"),
        }
    }
}

impl error::Error for CryptoError {}

/// A P-256 key pair.
pub struct KeyPair {
    secret: SigningKey,
}

impl KeyPair {
    pub fn generate() -> KeyPair {
        KeyPair {
            secret: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    pub fn from_secret_hex(secret: &str) -> Result<KeyPair, CryptoError> {
        let raw = hex::decode(secret).map_err(|_| CryptoError::InvalidSecret)?;
        let secret = SigningKey::from_slice(&raw).map_err(|_| CryptoError::InvalidSecret)?;
        Ok(KeyPair { secret })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// Decimal affine coordinates of the public key.
    pub fn public_xy(&self) -> (String, String) {
        let point = VerifyingKey::from(&self.secret).to_encoded_point(false);
        let x = U256::from_big_endian(point.x().expect("non-identity public key; qed").as_slice());
        let y = U256::from_big_endian(point.y().expect("non-identity public key; qed").as_slice());
        (x.to_string(), y.to_string())
    }

    /// The account address derived from the public key.
    pub fn address(&self) -> String {
        let point = VerifyingKey::from(&self.secret).to_encoded_point(false);
        let mut hasher = Sha256::new();
        hasher.update(point.x().expect("non-identity public key; qed"));
        hasher.update(point.y().expect("non-identity public key; qed"));
        let digest = hasher.finalize();
        hex::encode(digest)[..40].to_string()
    }

    /// Sign a message, returning `hex(r ‖ s)`.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: Signature = self.secret.sign(message);
        hex::encode(signature.to_bytes())
    }
}

/// Verify `signature` over `message` under the decimal public key
/// coordinates. Any malformed input verifies as false.
pub fn verify(pubkey_x: &str, pubkey_y: &str, message: &[u8], signature: &str) -> bool {
    let key = match verifying_key(pubkey_x, pubkey_y) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let raw = match hex::decode(signature) {
        Ok(raw) if raw.len() >= 64 => raw,
        _ => return false,
    };
    let signature = match Signature::from_slice(&raw[..64]) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    key.verify(message, &signature).is_ok()
}

fn verifying_key(pubkey_x: &str, pubkey_y: &str) -> Result<VerifyingKey, CryptoError> {
    let x = U256::from_dec_str(pubkey_x).map_err(|_| CryptoError::InvalidPublicKey)?;
    let y = U256::from_dec_str(pubkey_y).map_err(|_| CryptoError::InvalidPublicKey)?;
    let mut x_bytes = [0u8; 32];
    let mut y_bytes = [0u8; 32];
    x.to_big_endian(&mut x_bytes);
    y.to_big_endian(&mut y_bytes);
    let point = EncodedPoint::from_affine_coordinates(
        p256::FieldBytes::from_slice(&x_bytes),
        p256::FieldBytes::from_slice(&y_bytes),
        false,
    );
    VerifyingKey::from_encoded_point(&point).map_err(|_| CryptoError::InvalidPublicKey)
}
