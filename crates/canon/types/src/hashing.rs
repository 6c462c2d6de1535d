//! Canonical JSON encoding and SHA-256 digests.
//!
//! Object keys are sorted recursively and array order is preserved, so two
//! structurally equal values always encode to the same bytes regardless of
//! field declaration order or map insertion order.

use crate::error::TypesResult;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonical_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonical_value(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonical_value).collect()),
        other => other,
    }
}

/// Encode any serializable value as canonical JSON text.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> TypesResult<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonical_value(value))?)
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of the canonical encoding of `value`.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> TypesResult<String> {
    Ok(sha256_hex(canonicalize(value)?))
}
