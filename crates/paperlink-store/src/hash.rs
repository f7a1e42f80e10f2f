//! Blake3 hashing utilities for checkpoint integrity digests

use std::fs::File;
use std::io;
use std::path::Path;

use serde_json::Value;

/// Hash a file's contents with blake3.
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Hash raw bytes with blake3.
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

/// Integrity digest of a JSON payload (hex).
///
/// Computed over the compact serialization of the parsed value, so the
/// digest survives re-indentation of the file but not a changed value.
pub fn digest_json(value: &Value) -> String {
    // Serializing a Value cannot fail
    let canonical = serde_json::to_string(value).unwrap_or_default();
    hash_bytes(canonical.as_bytes()).to_hex().to_string()
}

/// Return the first 8 hex characters of a blake3 hash.
pub fn short_hash(hash: &blake3::Hash) -> String {
    hash.to_hex()[..8].to_string()
}
