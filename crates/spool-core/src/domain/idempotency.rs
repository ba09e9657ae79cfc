//! Idempotency key derivation.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Marker used in place of a submitter identity for anonymous submissions.
pub const ANONYMOUS_SUBMITTER: &str = "anonymous";

/// Hex-encoded SHA-256 of (submitter, payload).
///
/// Payload is hashed in its compact JSON form. `serde_json::Map` keeps keys
/// sorted, so `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(submitter: Option<&str>, payload: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(submitter.unwrap_or(ANONYMOUS_SUBMITTER).as_bytes());
        hasher.update(b"\n");
        hasher.update(payload.to_string().as_bytes());

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap a key read back from storage.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_input_same_key() {
        let a = IdempotencyKey::derive(Some("alice"), &json!({"n": 1}));
        let b = IdempotencyKey::derive(Some("alice"), &json!({"n": 1}));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn key_is_lowercase_hex_sha256() {
        let key = IdempotencyKey::derive(None, &json!({"n": 1}));
        assert_eq!(
            key.as_str(),
            "77fa0bc812ba5a26e4fb99f4e977aeb9862ee90f6d86d99447d46d8ac44a9719"
        );
    }

    #[test]
    fn key_order_in_payload_does_not_matter() {
        let a = IdempotencyKey::derive(None, &json!({"a": 1, "b": 2}));
        let b = IdempotencyKey::derive(None, &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn submitter_is_part_of_the_key() {
        let payload = json!("X");
        let alice = IdempotencyKey::derive(Some("alice"), &payload);
        let bob = IdempotencyKey::derive(Some("bob"), &payload);
        let anon = IdempotencyKey::derive(None, &payload);

        assert_ne!(alice, bob);
        assert_ne!(alice, anon);
        assert_eq!(anon, IdempotencyKey::derive(Some(ANONYMOUS_SUBMITTER), &payload));
    }
}
