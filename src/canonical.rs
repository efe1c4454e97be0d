//! Canonical JSON encoding and content digests
//!
//! Canonical form: object keys sorted ascending, no insignificant
//! whitespace, UTF-8, arrays preserving supplied order. `serde_json`'s
//! default map is ordered by key, so routing any `Serialize` value through
//! a [`serde_json::Value`] yields the canonical encoding directly.
//!
//! Fingerprints and entry metadata both depend on this representation
//! being byte-stable across hosts and runs.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encode a value as canonical JSON
pub fn to_canonical_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// SHA-256 of raw bytes as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical JSON encoding of a value, as lowercase hex
pub fn canonical_sha256<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(sha256_hex(to_canonical_string(value)?.as_bytes()))
}

/// Streaming SHA-256 of a file's contents as lowercase hex
pub fn file_sha256_hex(path: &std::path::Path) -> std::io::Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
