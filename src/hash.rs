use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serializes a value to canonical JSON: map keys sorted lexicographically,
/// no insignificant whitespace. Two requests with the same logical content
/// produce the same string regardless of field order on the wire.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    // serde_json::Value maps are BTreeMap-backed, so re-serializing through
    // Value yields sorted keys at every nesting level.
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

/// Computes Base64(SHA-256(canonical_json(value))), the stable fingerprint
/// stored with the idempotency record.
pub fn request_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = canonical_json(value)?;
    let digest = Sha256::digest(json.as_bytes());
    Ok(STANDARD.encode(digest))
}

/// Derives the 64-bit advisory lock id for a `(scope, key)` pair: the first
/// 8 bytes of SHA-256(scope || "|" || key) as a signed big-endian integer.
pub fn advisory_lock_id(scope: &str, key: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}
