//! Deterministic content digests
//!
//! Digests identify resource content across scans and restarts:
//! - Change detection for watched resources
//! - Idempotence checks in processors
//! - Stable hashing of property-only nodes

use std::collections::BTreeMap;

/// Compute the digest of raw bytes.
///
/// Output: blake3 hex string (64 characters).
pub fn digest_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Compute the digest of a structured node.
///
/// # Algorithm
/// - Properties are visited in key order (`BTreeMap`)
/// - Hash format: `key || 0x00 || json(value) || 0xFF` per property
/// - Node data, if any, follows after a `0x01` marker
pub fn digest_node(properties: &BTreeMap<String, serde_json::Value>, data: Option<&[u8]>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (key, value) in properties {
        hasher.update(key.as_bytes());
        hasher.update(&[0x00]);
        hasher.update(value.to_string().as_bytes());
        hasher.update(&[0xFF]);
    }
    if let Some(data) = data {
        hasher.update(&[0x01]);
        hasher.update(data);
    }
    hasher.finalize().to_hex().to_string()
}
