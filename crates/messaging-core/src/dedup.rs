//! Deduplication Gate.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::message::{Fingerprint, Message};

/// Default dedup TTL, matching `cache_ttl.message_dedup`.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(300);

/// Decides whether an outbound message is a duplicate and records
/// fingerprints of messages already processed.
pub struct DedupGate<C: Cache> {
    cache: Arc<C>,
    key_prefix: String,
    ttl: Duration,
}

impl<C: Cache> DedupGate<C> {
    /// Build a gate backed by `cache`, namespacing keys under `key_prefix`.
    pub fn new(cache: Arc<C>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            ttl: DEFAULT_DEDUP_TTL,
        }
    }

    /// Override the default TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key_for(&self, tenant: &str, fingerprint: Fingerprint) -> String {
        format!("{}cache:dedup:{}:{}", self.key_prefix, tenant, fingerprint)
    }

    /// `is_duplicate(msg)`: a cache miss or a cache error both read as "not
    /// seen" (false), a fail-open policy for deduplication — a false
    /// positive here would wrongly suppress a real message.
    pub async fn is_duplicate(&self, msg: &Message) -> bool {
        let tenant = msg.tenant_id.as_deref().unwrap_or("default");
        let key = self.key_for(tenant, msg.fingerprint());
        match self.cache.get::<bool>(&key).await {
            Some(seen) => seen,
            None => false,
        }
    }

    /// Record `msg`'s fingerprint as processed, with an optional TTL override.
    pub async fn mark_processed(&self, msg: &Message, ttl: Option<Duration>) {
        let tenant = msg.tenant_id.as_deref().unwrap_or("default");
        let key = self.key_for(tenant, msg.fingerprint());
        self.cache.set(&key, &true, Some(ttl.unwrap_or(self.ttl))).await;
    }

    /// Batch form of `is_duplicate`: returns the indices of `msgs` that are
    /// duplicates.
    pub async fn check_batch(&self, msgs: &[Message]) -> Vec<usize> {
        let mut dupes = Vec::new();
        for (idx, msg) in msgs.iter().enumerate() {
            if self.is_duplicate(msg).await {
                dupes.push(idx);
            }
        }
        dupes
    }

    /// Batch form of `mark_processed`.
    pub async fn mark_batch(&self, msgs: &[Message], ttl: Option<Duration>) {
        for msg in msgs {
            self.mark_processed(msg, ttl).await;
        }
    }
}

impl<C: Cache> std::fmt::Debug for DedupGate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupGate")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;

    fn msg(payload: serde_json::Value, tenant: &str) -> Message {
        Message::new(payload).with_tenant(tenant)
    }

    #[tokio::test]
    async fn first_publish_is_not_duplicate() {
        let cache = Arc::new(MemoryCache::new());
        let gate = DedupGate::new(cache, "hl8:messaging:");
        let m = msg(json!({"id": "u1"}), "acme");
        assert!(!gate.is_duplicate(&m).await);
    }

    #[tokio::test]
    async fn marked_message_is_duplicate() {
        let cache = Arc::new(MemoryCache::new());
        let gate = DedupGate::new(cache, "hl8:messaging:");
        let m = msg(json!({"id": "u1"}), "acme");
        gate.mark_processed(&m, None).await;
        assert!(gate.is_duplicate(&m).await);
    }

    #[tokio::test]
    async fn dedup_is_tenant_scoped() {
        let cache = Arc::new(MemoryCache::new());
        let gate = DedupGate::new(cache, "hl8:messaging:");
        let a = msg(json!({"id": "u1"}), "acme");
        let b = msg(json!({"id": "u1"}), "globex");
        gate.mark_processed(&a, None).await;
        assert!(gate.is_duplicate(&a).await);
        assert!(!gate.is_duplicate(&b).await);
    }

    #[tokio::test]
    async fn batch_forms_round_trip() {
        let cache = Arc::new(MemoryCache::new());
        let gate = DedupGate::new(cache, "hl8:messaging:");
        let msgs = vec![
            msg(json!({"id": "u1"}), "acme"),
            msg(json!({"id": "u2"}), "acme"),
        ];
        gate.mark_batch(&msgs[..1], None).await;
        let dupes = gate.check_batch(&msgs).await;
        assert_eq!(dupes, vec![0]);
    }
}
