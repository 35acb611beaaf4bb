//! Deterministic message digest.
//!
//! Each JSON node is fed to SHA-256 with a one-byte type tag and, for
//! strings and containers, a length prefix, so distinct structures cannot
//! collide by concatenation.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};

/// Top-level field excluded from the digest.
pub const AUTH_FIELD: &str = "auth";

/// Digest of any serializable message, ignoring its `auth` field.
pub fn message_digest<T: Serialize>(msg: &T) -> AuthResult<[u8; 32]> {
    let value = serde_json::to_value(msg).map_err(|e| AuthError::Serialize(e.to_string()))?;
    Ok(canonical_digest(&value))
}

/// Digest of a JSON value, ignoring a top-level `auth` field.
pub fn canonical_digest(value: &Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| *k != AUTH_FIELD).collect();
            keys.sort();
            hasher.update(b"{");
            hasher.update((keys.len() as u64).to_le_bytes());
            for key in keys {
                feed_str(&mut hasher, key);
                feed(&mut hasher, &map[key]);
            }
            hasher.update(b"}");
        }
        other => feed(&mut hasher, other),
    }
    hasher.finalize().into()
}

fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(n) => {
            hasher.update(b"#");
            feed_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update(b"s");
            feed_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                feed(hasher, item);
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            hasher.update((keys.len() as u64).to_le_bytes());
            for key in keys {
                feed_str(hasher, key);
                feed(hasher, &map[key]);
            }
            hasher.update(b"}");
        }
    }
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
