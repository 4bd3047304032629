//! Canonical-JSON hashing for drift detection.

use sha2::{Digest, Sha256};
use serde_json::Value;

/// Recursively sort JSON object keys so map-field ordering never affects the
/// hash. Numbers keep serde_json's default formatting (integers stay
/// integers, floats keep their shortest round-trip form).
pub fn canonicalize(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// SHA-256 hex digest of the canonical serialization of a desired config.
/// Carried in execution metadata and on the tenant as `workflow_config_hash`.
pub fn config_hash(value: &Value) -> String {
    let canonical = canonicalize(value.clone());
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}
