//! Dead-Letter Store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::message::Message;

/// Error names the retry classifier treats as permanent.
const NON_RETRYABLE_ERRORS: &[&str] = &[
    "ValidationError",
    "AuthenticationError",
    "AuthorizationError",
    "NotFoundError",
    "InvalidInputError",
];

/// Backoff schedule in seconds, indexed by `min(retry_count, 5)`.
const BACKOFF_SCHEDULE_SECS: [i64; 6] = [60, 120, 240, 480, 960, 1800];

/// Default dead-letter TTL.
pub const DEFAULT_DEAD_LETTER_TTL: Duration = Duration::from_secs(86_400);

/// Structured error detail attached to a dead-letter record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error kind/name used for retryable classification.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Optional stack trace or backtrace text.
    pub stack: Option<String>,
}

impl ErrorDetail {
    /// Build an error detail with no stack trace.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

/// A retained failed message plus retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Id of the failed message.
    pub message_id: String,
    /// The original message, retained so it can be retried verbatim.
    pub original_message: Message,
    /// The error that caused the failure.
    pub error: ErrorDetail,
    /// Number of retry attempts made so far.
    pub retry_count: u32,
    /// Owning tenant, if any.
    pub tenant_id: Option<String>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Whether this record is eligible for retry at all.
    pub retryable: bool,
    /// When the next retry is due.
    pub next_retry_at: DateTime<Utc>,
    /// When the last retry attempt happened, if any.
    pub last_retry_at: Option<DateTime<Utc>>,
    /// The error message from the last retry attempt, if any.
    pub last_retry_error: Option<String>,
}

/// Outcome of a single retry attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOutcome {
    /// Whether the retry succeeded.
    pub success: bool,
    /// Human-readable result message.
    pub message: String,
}

/// Aggregate counters for a tenant's dead-letter activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeadLetterStats {
    /// Count of retries that ultimately succeeded.
    pub retried_success: u64,
    /// Count of retries that failed again.
    pub retried_failed: u64,
    /// Number of records currently retained for the tenant.
    pub current_count: u64,
}

fn classify_retryable(error_name: &str) -> bool {
    !NON_RETRYABLE_ERRORS.contains(&error_name)
}

fn next_retry_delay(retry_count: u32) -> Duration {
    let idx = (retry_count as usize).min(BACKOFF_SCHEDULE_SECS.len() - 1);
    Duration::from_secs(BACKOFF_SCHEDULE_SECS[idx] as u64)
}

/// Retains failed messages, classifies retryability, and schedules retries.
///
/// The backing `Cache` has no key-scan operation, so `cleanup` sweeps a
/// secondary per-tenant index of `(created_at, message_id)` kept in memory.
pub struct DeadLetterStore<C: Cache> {
    cache: Arc<C>,
    key_prefix: String,
    ttl: Duration,
    index: DashMap<String, BTreeSet<(DateTime<Utc>, String)>>,
    stats: DashMap<String, DeadLetterStats>,
}

impl<C: Cache> DeadLetterStore<C> {
    /// Build a store backed by `cache`.
    pub fn new(cache: Arc<C>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            ttl: DEFAULT_DEAD_LETTER_TTL,
            index: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Override the default TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn tenant_of(tenant: Option<&str>) -> &str {
        tenant.unwrap_or("default")
    }

    fn key_for(&self, tenant: &str, message_id: &str) -> String {
        format!("{}cache:dead-letter:{}:{}", self.key_prefix, tenant, message_id)
    }

    /// Create and persist a dead-letter record for `message`.
    pub async fn store(
        &self,
        message: Message,
        error: ErrorDetail,
        retry_count: u32,
        tenant: Option<String>,
    ) -> DeadLetterRecord {
        let now = Utc::now();
        let retryable = classify_retryable(&error.name);
        let next_retry_at = now + chrono::Duration::from_std(next_retry_delay(retry_count)).unwrap();
        let record = DeadLetterRecord {
            message_id: message.id.clone(),
            original_message: message,
            error,
            retry_count,
            tenant_id: tenant.clone(),
            created_at: now,
            retryable,
            next_retry_at,
            last_retry_at: None,
            last_retry_error: None,
        };
        self.persist(&record).await;
        self.stats
            .entry(Self::tenant_of(record.tenant_id.as_deref()).to_string())
            .or_default()
            .current_count += 1;
        record
    }

    /// Write `record` to the cache and index. Does not touch `current_count`:
    /// callers that insert a record for the first time bump it themselves;
    /// in-place updates to an already-retained record (e.g. a failed retry's
    /// reschedule) must not inflate the count.
    async fn persist(&self, record: &DeadLetterRecord) {
        let tenant = Self::tenant_of(record.tenant_id.as_deref()).to_string();
        let key = self.key_for(&tenant, &record.message_id);
        self.cache.set(&key, record, Some(self.ttl)).await;
        self.index
            .entry(tenant)
            .or_default()
            .insert((record.created_at, record.message_id.clone()));
    }

    /// Load a record by message id.
    pub async fn get(&self, message_id: &str, tenant: Option<&str>) -> Option<DeadLetterRecord> {
        let tenant = Self::tenant_of(tenant);
        let key = self.key_for(tenant, message_id);
        self.cache.get::<DeadLetterRecord>(&key).await
    }

    /// Attempt to retry `message_id` with `handler`.
    ///
    /// Returns a negative outcome without invoking `handler` if the record is
    /// missing, not retryable, or not yet due.
    pub async fn retry<F, Fut>(
        &self,
        message_id: &str,
        tenant: Option<&str>,
        handler: F,
    ) -> RetryOutcome
    where
        F: FnOnce(Message) -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let Some(mut record) = self.get(message_id, tenant).await else {
            return RetryOutcome {
                success: false,
                message: "not found".to_string(),
            };
        };
        if !record.retryable {
            return RetryOutcome {
                success: false,
                message: "not retryable".to_string(),
            };
        }
        if Utc::now() < record.next_retry_at {
            return RetryOutcome {
                success: false,
                message: "not yet due".to_string(),
            };
        }

        let tenant_key = Self::tenant_of(record.tenant_id.as_deref()).to_string();
        match handler(record.original_message.clone()).await {
            Ok(()) => {
                self.delete(message_id, Some(&tenant_key)).await;
                self.stats.entry(tenant_key).or_default().retried_success += 1;
                RetryOutcome {
                    success: true,
                    message: "retried successfully".to_string(),
                }
            }
            Err(err) => {
                record.retry_count += 1;
                record.last_retry_at = Some(Utc::now());
                record.last_retry_error = Some(err.clone());
                record.next_retry_at =
                    Utc::now() + chrono::Duration::from_std(next_retry_delay(record.retry_count)).unwrap();
                self.persist(&record).await;
                self.stats.entry(tenant_key).or_default().retried_failed += 1;
                RetryOutcome {
                    success: false,
                    message: err,
                }
            }
        }
    }

    /// Concurrently retry a batch of message ids, surfacing per-item results.
    pub async fn batch_retry<F, Fut>(
        &self,
        message_ids: &[String],
        tenant: Option<&str>,
        handler: F,
    ) -> Vec<(String, RetryOutcome)>
    where
        F: Fn(Message) -> Fut + Clone,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        let mut futures = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            let handler = handler.clone();
            futures.push(async move {
                let outcome = self.retry(id, tenant, handler).await;
                (id.clone(), outcome)
            });
        }
        futures::future::join_all(futures).await
    }

    /// Delete a record.
    pub async fn delete(&self, message_id: &str, tenant: Option<&str>) -> bool {
        let tenant = Self::tenant_of(tenant);
        let key = self.key_for(tenant, message_id);
        let deleted = self.cache.delete(&key).await;
        if deleted {
            if let Some(mut set) = self.index.get_mut(tenant) {
                set.retain(|(_, id)| id != message_id);
            }
            if let Some(mut stats) = self.stats.get_mut(tenant) {
                stats.current_count = stats.current_count.saturating_sub(1);
            }
        }
        deleted
    }

    /// Delete all records older than `before` (default: now minus the TTL).
    pub async fn cleanup(&self, tenant: &str, before: Option<DateTime<Utc>>) -> usize {
        let cutoff = before.unwrap_or_else(|| Utc::now() - chrono::Duration::from_std(self.ttl).unwrap());
        let to_delete: Vec<String> = match self.index.get(tenant) {
            Some(set) => set
                .iter()
                .take_while(|(created_at, _)| *created_at < cutoff)
                .map(|(_, id)| id.clone())
                .collect(),
            None => Vec::new(),
        };
        let mut cleaned = 0;
        for id in to_delete {
            if self.delete(&id, Some(tenant)).await {
                cleaned += 1;
            }
        }
        cleaned
    }

    /// Aggregate stats for `tenant`.
    pub fn stats(&self, tenant: &str) -> DeadLetterStats {
        self.stats.get(tenant).map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;

    fn sample_message() -> Message {
        Message::new(json!({"id": "u1"})).with_tenant("acme")
    }

    #[tokio::test]
    async fn backoff_schedule_matches_expected_table() {
        let store = DeadLetterStore::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        for (k, expected) in BACKOFF_SCHEDULE_SECS.iter().enumerate() {
            let record = store
                .store(
                    sample_message(),
                    ErrorDetail::new("TransientError", "boom"),
                    k as u32,
                    Some("acme".to_string()),
                )
                .await;
            let delta = (record.next_retry_at - record.created_at).num_seconds();
            assert_eq!(delta, *expected);
        }
        // retry_count beyond the table clamps at the last entry.
        let record = store
            .store(sample_message(), ErrorDetail::new("TransientError", "boom"), 99, Some("acme".to_string()))
            .await;
        let delta = (record.next_retry_at - record.created_at).num_seconds();
        assert_eq!(delta, 1800);
    }

    #[tokio::test]
    async fn validation_error_is_not_retryable() {
        let store = DeadLetterStore::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let record = store
            .store(
                sample_message(),
                ErrorDetail::new("ValidationError", "bad input"),
                0,
                Some("acme".to_string()),
            )
            .await;
        assert!(!record.retryable);

        let mut invoked = false;
        let outcome = store
            .retry(&record.message_id, Some("acme"), |_| async {
                invoked = true;
                Ok(())
            })
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "not retryable");
        assert!(!invoked);
    }

    #[tokio::test]
    async fn retry_not_yet_due_is_rejected() {
        let store = DeadLetterStore::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let record = store
            .store(sample_message(), ErrorDetail::new("TransientError", "boom"), 0, Some("acme".to_string()))
            .await;
        let outcome = store
            .retry(&record.message_id, Some("acme"), |_| async { Ok(()) })
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "not yet due");
    }

    #[tokio::test]
    async fn successful_retry_deletes_record() {
        let store = DeadLetterStore::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let record = store
            .store(sample_message(), ErrorDetail::new("TransientError", "boom"), 0, Some("acme".to_string()))
            .await;
        // simulate "due" by constructing a record whose next_retry_at is past.
        let mut due_record = record.clone();
        due_record.next_retry_at = Utc::now() - chrono::Duration::seconds(1);
        store.persist(&due_record).await;

        let outcome = store
            .retry(&due_record.message_id, Some("acme"), |_| async { Ok(()) })
            .await;
        assert!(outcome.success);
        assert!(store.get(&due_record.message_id, Some("acme")).await.is_none());
        assert_eq!(store.stats("acme").retried_success, 1);
    }

    #[tokio::test]
    async fn failed_retry_increments_count_and_reschedules() {
        let store = DeadLetterStore::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let record = store
            .store(sample_message(), ErrorDetail::new("TransientError", "boom"), 0, Some("acme".to_string()))
            .await;
        let mut due_record = record.clone();
        due_record.next_retry_at = Utc::now() - chrono::Duration::seconds(1);
        store.persist(&due_record).await;

        let outcome = store
            .retry(&due_record.message_id, Some("acme"), |_| async {
                Err("still broken".to_string())
            })
            .await;
        assert!(!outcome.success);
        let reloaded = store.get(&due_record.message_id, Some("acme")).await.unwrap();
        assert_eq!(reloaded.retry_count, 1);
        assert_eq!(store.stats("acme").retried_failed, 1);
    }

    #[tokio::test]
    async fn cleanup_removes_old_records_only() {
        let store = DeadLetterStore::new(Arc::new(MemoryCache::new()), "hl8:messaging:");
        let record = store
            .store(sample_message(), ErrorDetail::new("TransientError", "boom"), 0, Some("acme".to_string()))
            .await;
        let mut old_record = record.clone();
        old_record.created_at = Utc::now() - chrono::Duration::days(2);
        store.persist(&old_record).await;

        let cleaned = store.cleanup("acme", Some(Utc::now() - chrono::Duration::hours(1))).await;
        assert_eq!(cleaned, 1);
    }
}
