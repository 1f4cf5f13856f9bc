// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Small helpers shared across the node.

use std::time::{SystemTime, UNIX_EPOCH};

/// Truncate an identifier for logging, appending an ellipsis.
/// Identifiers shorter than the cut are returned unchanged.
pub fn ellipsis(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Render a hash for disk storage: 64-hex-char strings become raw 32 bytes,
/// anything else (the genesis parent marker "0") is stored verbatim.
pub fn hash_to_disk(hash: &str) -> Vec<u8> {
    if hash.len() == 64 {
        if let Ok(raw) = hex::decode(hash) {
            return raw;
        }
    }
    hash.as_bytes().to_vec()
}

/// Inverse of `hash_to_disk`.
pub fn hash_from_disk(raw: &[u8]) -> String {
    if raw.len() == 32 {
        hex::encode(raw)
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipsis_handles_short_input() {
        assert_eq!(ellipsis("abc", 16), "abc");
        assert_eq!(ellipsis("abcdef", 4), "abcd...");
        assert_eq!(ellipsis("", 8), "");
    }

    #[test]
    fn disk_hash_round_trip() {
        let h = "a".repeat(64);
        assert_eq!(hash_to_disk(&h).len(), 32);
        assert_eq!(hash_from_disk(&hash_to_disk(&h)), h);

        // The genesis parent marker is not hex and survives verbatim.
        assert_eq!(hash_to_disk("0"), b"0".to_vec());
        assert_eq!(hash_from_disk(b"0"), "0");
    }
}
