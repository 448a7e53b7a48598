//! The wire-level `Message` type and content-based fingerprinting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Opaque string-to-string header bag carried alongside a message.
pub type Headers = HashMap<String, String>;

/// Field names stripped before fingerprinting because they are mutable,
/// time-valued, or purely correlational.
const MUTABLE_FIELDS: &[&str] = &[
    "timestamp",
    "createdAt",
    "updatedAt",
    "processedAt",
    "requestId",
    "correlationId",
];

/// A message flowing through the facade.
///
/// `id` is stable across serialization round-trips: if not supplied it is
/// derived deterministically from the fingerprinted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stable message id.
    pub id: String,
    /// Opaque application payload.
    pub payload: Value,
    /// Optional string headers.
    #[serde(default)]
    pub headers: Headers,
    /// Optional routing key (topic/queue specific meaning).
    pub routing_key: Option<String>,
    /// Tenant that owns this message, if any.
    pub tenant_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message with a freshly generated id.
    pub fn new(payload: Value) -> Self {
        let created_at = Utc::now();
        let id = generate_message_id(&payload, &Headers::new(), None, None);
        Self {
            id,
            payload,
            headers: Headers::new(),
            routing_key: None,
            tenant_id: None,
            created_at,
        }
    }

    /// Override the generated id with a caller-supplied one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a routing key.
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// Attach a tenant id.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// The fingerprint used by the deduplication gate.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_of(&self.payload, &self.headers, self.routing_key.as_deref())
    }
}

/// A content hash over a message's immutable fields.
///
/// Equal logical messages (differing only in mutable/time/correlation
/// fields) always produce an equal fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the fingerprint of a payload plus the headers/routing key that
/// participate in deduplication identity.
pub fn fingerprint_of(payload: &Value, headers: &Headers, routing_key: Option<&str>) -> Fingerprint {
    let stripped = strip_mutable_fields(payload);
    let mut hasher = Sha256::new();
    // serde_json::Value serializes object keys in sorted order as long as
    // the `preserve_order` feature is not enabled, which satisfies the
    // "remaining keys serialized in sorted order" requirement directly.
    let canonical = serde_json::to_vec(&stripped).unwrap_or_default();
    hasher.update(&canonical);
    if let Some(rk) = routing_key {
        hasher.update(b"\0rk:");
        hasher.update(rk.as_bytes());
    }
    let mut header_keys: Vec<&String> = headers.keys().collect();
    header_keys.sort();
    for key in header_keys {
        if MUTABLE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        hasher.update(b"\0h:");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(headers[key].as_bytes());
    }
    let digest = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    Fingerprint(u64::from_be_bytes(buf))
}

fn generate_message_id(
    payload: &Value,
    headers: &Headers,
    routing_key: Option<&str>,
    tenant_id: Option<&str>,
) -> String {
    let fp = fingerprint_of(payload, headers, routing_key);
    match tenant_id {
        Some(t) => format!("msg_{t}_{fp}"),
        None => format!("msg_{fp}"),
    }
}

/// Recursively strip the mutable/time/correlation fields named in
/// `MUTABLE_FIELDS` from a JSON value.
pub fn strip_mutable_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if MUTABLE_FIELDS.contains(&k.as_str()) {
                    continue;
                }
                out.insert(k.clone(), strip_mutable_fields(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_mutable_fields).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_nested_mutable_fields() {
        let value = json!({
            "id": "u1",
            "data": "x",
            "timestamp": "2024-01-01T00:00:00Z",
            "nested": {
                "requestId": "abc",
                "value": 1,
            }
        });
        let stripped = strip_mutable_fields(&value);
        assert_eq!(
            stripped,
            json!({"id": "u1", "data": "x", "nested": {"value": 1}})
        );
    }

    #[test]
    fn fingerprint_ignores_mutable_fields() {
        let a = json!({"id": "u1", "data": "x", "timestamp": "t1", "requestId": "r1"});
        let b = json!({"id": "u1", "data": "x", "timestamp": "t2", "requestId": "r2"});
        assert_eq!(
            fingerprint_of(&a, &Headers::new(), None),
            fingerprint_of(&b, &Headers::new(), None)
        );
    }

    #[test]
    fn fingerprint_differs_on_real_change() {
        let a = json!({"id": "u1", "data": "x"});
        let b = json!({"id": "u1", "data": "y"});
        assert_ne!(
            fingerprint_of(&a, &Headers::new(), None),
            fingerprint_of(&b, &Headers::new(), None)
        );
    }

    #[test]
    fn message_id_stable_across_round_trip() {
        let msg = Message::new(json!({"id": "u1", "data": "x"}));
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(msg.id, decoded.id);
    }
}
