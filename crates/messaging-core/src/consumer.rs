//! Consumer State Tracker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Cache;

/// Default consumer-state TTL.
pub const DEFAULT_CONSUMER_STATE_TTL: Duration = Duration::from_secs(3600);

/// Lifecycle status of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerStatus {
    /// Actively consuming, last handler invocation succeeded (or none yet).
    Active,
    /// Consumption is paused by the caller.
    Paused,
    /// Consumption has been stopped and the consumer is eligible for cleanup.
    Stopped,
    /// The last handler invocation failed.
    Error,
}

/// Durable per-consumer progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerState {
    /// Synthetic consumer id (`consumer:<tenant>:<queue>:<ts>:<rand>`).
    pub consumer_id: String,
    /// Physical or logical queue name this consumer reads from.
    pub queue_name: String,
    /// Id of the last successfully processed message, if any.
    pub last_processed_message_id: Option<String>,
    /// When the last message was successfully processed.
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Running count of successfully processed messages.
    pub total_processed: u64,
    /// Last error message recorded against this consumer, if any.
    pub last_error: Option<String>,
    /// Current lifecycle status.
    pub status: ConsumerStatus,
    /// When this record was first created.
    pub created_at: DateTime<Utc>,
    /// When this record was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Owning tenant, if any.
    pub tenant_id: Option<String>,
}

impl ConsumerState {
    fn new(consumer_id: impl Into<String>, queue_name: impl Into<String>, tenant_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            consumer_id: consumer_id.into(),
            queue_name: queue_name.into(),
            last_processed_message_id: None,
            last_processed_at: None,
            total_processed: 0,
            last_error: None,
            status: ConsumerStatus::Active,
            created_at: now,
            updated_at: now,
            tenant_id,
        }
    }
}

/// Generates a synthetic consumer id: `consumer:<tenant|default>:<queue>:<ts>:<rand6>`.
pub fn generate_consumer_id(tenant_id: Option<&str>, queue: &str) -> String {
    use rand::Rng;
    let tenant = tenant_id.unwrap_or("default");
    let ts = Utc::now().timestamp_millis();
    let rand_suffix: String = {
        let mut rng = rand::thread_rng();
        (0..6)
            .map(|_| {
                let idx = rng.gen_range(0..36);
                std::char::from_digit(idx, 36).unwrap_or('0')
            })
            .collect()
    };
    format!("consumer:{tenant}:{queue}:{ts}:{rand_suffix}")
}

/// Persists and mutates `ConsumerState` records, write-through to a cache.
pub struct ConsumerStateTracker<C: Cache> {
    cache: Arc<C>,
    key_prefix: String,
    ttl: Duration,
}

impl<C: Cache> ConsumerStateTracker<C> {
    /// Build a tracker backed by `cache`.
    pub fn new(cache: Arc<C>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            ttl: DEFAULT_CONSUMER_STATE_TTL,
        }
    }

    /// Override the default TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key_for(&self, tenant: &str, consumer_id: &str) -> String {
        format!("{}consumer:{}:{}", self.key_prefix, tenant, consumer_id)
    }

    fn tenant_of(tenant_id: Option<&str>) -> &str {
        tenant_id.unwrap_or("default")
    }

    async fn write_through(&self, state: &ConsumerState) {
        let tenant = Self::tenant_of(state.tenant_id.as_deref());
        let key = self.key_for(tenant, &state.consumer_id);
        self.cache.set(&key, state, Some(self.ttl)).await;
    }

    /// Create a new, empty `ConsumerState` for `consumer_id`/`queue_name`.
    pub async fn create(
        &self,
        consumer_id: &str,
        queue_name: &str,
        tenant_id: Option<String>,
    ) -> ConsumerState {
        let state = ConsumerState::new(consumer_id, queue_name, tenant_id);
        self.write_through(&state).await;
        state
    }

    /// Load the current state for `consumer_id`, if any.
    ///
    /// Cache failures are fail-closed here: returning `None` makes the
    /// caller start fresh rather than risk acting on stale state.
    pub async fn get(&self, consumer_id: &str, tenant_id: Option<&str>) -> Option<ConsumerState> {
        let tenant = Self::tenant_of(tenant_id);
        let key = self.key_for(tenant, consumer_id);
        self.cache.get::<ConsumerState>(&key).await
    }

    /// Record a successful handler invocation. Creates the state first if
    /// none existed yet.
    pub async fn update_processed(
        &self,
        consumer_id: &str,
        queue_name: &str,
        message_id: &str,
        tenant_id: Option<&str>,
    ) -> ConsumerState {
        let mut state = match self.get(consumer_id, tenant_id).await {
            Some(s) => s,
            None => {
                self.create(consumer_id, queue_name, tenant_id.map(str::to_string))
                    .await
            }
        };
        state.last_processed_message_id = Some(message_id.to_string());
        state.last_processed_at = Some(Utc::now());
        state.total_processed += 1;
        state.status = ConsumerStatus::Active;
        state.updated_at = Utc::now();
        self.write_through(&state).await;
        state
    }

    /// Record a handler failure.
    pub async fn update_error(
        &self,
        consumer_id: &str,
        queue_name: &str,
        error_message: &str,
        tenant_id: Option<&str>,
    ) -> ConsumerState {
        let mut state = match self.get(consumer_id, tenant_id).await {
            Some(s) => s,
            None => {
                self.create(consumer_id, queue_name, tenant_id.map(str::to_string))
                    .await
            }
        };
        state.last_error = Some(error_message.to_string());
        state.status = ConsumerStatus::Error;
        state.updated_at = Utc::now();
        self.write_through(&state).await;
        state
    }

    /// Transition a consumer's status without touching processing counters.
    pub async fn update_status(
        &self,
        consumer_id: &str,
        tenant_id: Option<&str>,
        status: ConsumerStatus,
    ) -> Option<ConsumerState> {
        let mut state = self.get(consumer_id, tenant_id).await?;
        state.status = status;
        state.updated_at = Utc::now();
        self.write_through(&state).await;
        Some(state)
    }

    /// Remove the consumer's state entirely.
    pub async fn delete(&self, consumer_id: &str, tenant_id: Option<&str>) -> bool {
        let tenant = Self::tenant_of(tenant_id);
        let key = self.key_for(tenant, consumer_id);
        self.cache.delete(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn consumer_id_has_expected_shape() {
        let id = generate_consumer_id(Some("acme"), "orders");
        let parts: Vec<&str> = id.split(':').collect();
        assert_eq!(parts[0], "consumer");
        assert_eq!(parts[1], "acme");
        assert_eq!(parts[2], "orders");
        assert_eq!(parts.len(), 5);
    }

    #[tokio::test]
    async fn update_processed_creates_state_if_missing() {
        let tracker = ConsumerStateTracker::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let state = tracker
            .update_processed("c1", "orders", "m1", Some("acme"))
            .await;
        assert_eq!(state.total_processed, 1);
        assert_eq!(state.last_processed_message_id.as_deref(), Some("m1"));
        assert_eq!(state.status, ConsumerStatus::Active);
    }

    #[tokio::test]
    async fn consume_resumes_from_last_processed() {
        let tracker = ConsumerStateTracker::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        tracker
            .update_processed("c1", "orders", "m1", Some("acme"))
            .await;
        let reloaded = tracker.get("c1", Some("acme")).await.unwrap();
        assert_eq!(reloaded.last_processed_message_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn error_then_success_returns_to_active() {
        let tracker = ConsumerStateTracker::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        tracker
            .update_error("c1", "orders", "boom", Some("acme"))
            .await;
        let errored = tracker.get("c1", Some("acme")).await.unwrap();
        assert_eq!(errored.status, ConsumerStatus::Error);

        let recovered = tracker
            .update_processed("c1", "orders", "m2", Some("acme"))
            .await;
        assert_eq!(recovered.status, ConsumerStatus::Active);
    }

    #[tokio::test]
    async fn delete_removes_state() {
        let tracker = ConsumerStateTracker::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        tracker.create("c1", "orders", Some("acme".to_string())).await;
        assert!(tracker.delete("c1", Some("acme")).await);
        assert!(tracker.get("c1", Some("acme")).await.is_none());
    }
}
