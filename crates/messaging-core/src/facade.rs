//! Messaging Facade — the application-facing entry point
//! that orchestrates every other component over a registry of broker
//! adapters.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::adapter::{BrokerAdapter, MessageHandler, PublishOptions, QueueInfo};
use crate::cache::Cache;
use crate::consumer::{generate_consumer_id, ConsumerStateTracker};
use crate::deadletter::DeadLetterStore;
use crate::dedup::DedupGate;
use crate::error::{MessagingError, MessagingResult};
use crate::message::Message;
use crate::monitoring::{MonitoringCore, ProcessStatus};
use crate::tenant::TenantKeyResolver;
use crate::tenant_config::TenantConfigCache;

#[cfg(feature = "resilience")]
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerManager, KeyedRateLimiter};

/// The set of adapters registered once at startup.
pub struct AdapterRegistry {
    adapters: std::collections::HashMap<String, Arc<dyn BrokerAdapter>>,
    default_name: String,
}

impl AdapterRegistry {
    /// Build a registry whose default adapter is `default_name`.
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            adapters: std::collections::HashMap::new(),
            default_name: default_name.into(),
        }
    }

    /// Register an adapter under `name`.
    pub fn register(mut self, name: impl Into<String>, adapter: Arc<dyn BrokerAdapter>) -> Self {
        self.adapters.insert(name.into(), adapter);
        self
    }

    fn get(&self, name: Option<&str>) -> MessagingResult<Arc<dyn BrokerAdapter>> {
        let name = name.unwrap_or(&self.default_name);
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| MessagingError::AdapterNotFound(name.to_string()))
    }
}

/// Builds a `MessagingFacade` from its collaborators.
pub struct MessagingFacadeBuilder<C: Cache> {
    cache: Arc<C>,
    key_prefix: String,
    adapters: AdapterRegistry,
    enable_dedup: bool,
    enable_consumer_state: bool,
    enable_tenant_isolation: bool,
}

impl<C: Cache> MessagingFacadeBuilder<C> {
    /// Start building a facade over `cache`, keyed under `key_prefix`.
    pub fn new(cache: Arc<C>, key_prefix: impl Into<String>, adapters: AdapterRegistry) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
            adapters,
            enable_dedup: true,
            enable_consumer_state: true,
            enable_tenant_isolation: true,
        }
    }

    /// Toggle deduplication.
    pub fn enable_dedup(mut self, enabled: bool) -> Self {
        self.enable_dedup = enabled;
        self
    }

    /// Toggle consumer-state tracking.
    pub fn enable_consumer_state(mut self, enabled: bool) -> Self {
        self.enable_consumer_state = enabled;
        self
    }

    /// Toggle tenant isolation.
    pub fn enable_tenant_isolation(mut self, enabled: bool) -> Self {
        self.enable_tenant_isolation = enabled;
        self
    }

    /// Build the facade.
    pub fn build(self) -> MessagingFacade<C> {
        let resolver = TenantKeyResolver::new(
            self.enable_tenant_isolation,
            Box::new(crate::tenant::PrefixIsolation::default()),
        );
        MessagingFacade {
            adapters: self.adapters,
            resolver,
            dedup: self.enable_dedup.then(|| DedupGate::new(self.cache.clone(), self.key_prefix.clone())),
            consumer_state: self
                .enable_consumer_state
                .then(|| Arc::new(ConsumerStateTracker::new(self.cache.clone(), self.key_prefix.clone()))),
            dead_letter: Arc::new(DeadLetterStore::new(self.cache.clone(), self.key_prefix.clone())),
            tenant_config: Arc::new(TenantConfigCache::new(self.cache.clone(), self.key_prefix.clone())),
            monitoring: Arc::new(MonitoringCore::new()),
            #[cfg(feature = "resilience")]
            circuit_breakers: CircuitBreakerManager::new(CircuitBreakerConfig::default()),
            #[cfg(feature = "resilience")]
            rate_limiters: KeyedRateLimiter::new(1_000, 100),
        }
    }
}

/// Publish/subscribe/send/consume entry points, orchestrating
/// tenant resolution, deduplication, consumer state, and monitoring over a
/// registry of broker adapters.
pub struct MessagingFacade<C: Cache> {
    adapters: AdapterRegistry,
    resolver: TenantKeyResolver,
    dedup: Option<DedupGate<C>>,
    consumer_state: Option<Arc<ConsumerStateTracker<C>>>,
    dead_letter: Arc<DeadLetterStore<C>>,
    tenant_config: Arc<TenantConfigCache<C>>,
    monitoring: Arc<MonitoringCore>,
    #[cfg(feature = "resilience")]
    circuit_breakers: CircuitBreakerManager,
    #[cfg(feature = "resilience")]
    rate_limiters: KeyedRateLimiter<String>,
}

impl<C: Cache> MessagingFacade<C> {
    /// Start building a facade.
    pub fn builder(cache: Arc<C>, key_prefix: impl Into<String>, adapters: AdapterRegistry) -> MessagingFacadeBuilder<C> {
        MessagingFacadeBuilder::new(cache, key_prefix, adapters)
    }

    /// The dead-letter store; callers explicitly store failures here.
    pub fn dead_letter(&self) -> &Arc<DeadLetterStore<C>> {
        &self.dead_letter
    }

    /// The tenant config cache.
    pub fn tenant_config(&self) -> &Arc<TenantConfigCache<C>> {
        &self.tenant_config
    }

    /// The monitoring core.
    pub fn monitoring(&self) -> &Arc<MonitoringCore> {
        &self.monitoring
    }

    fn tenant_key(tenant: Option<&str>) -> &str {
        tenant.unwrap_or("default")
    }

    #[cfg(feature = "resilience")]
    async fn guarded_call<F, Fut, T>(&self, adapter_name: &str, op: F) -> MessagingResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = MessagingResult<T>>,
    {
        let breaker = self.circuit_breakers.get_or_create(adapter_name);
        breaker
            .check()
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        match op().await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                breaker.record_failure();
                Err(err)
            }
        }
    }

    #[cfg(not(feature = "resilience"))]
    async fn guarded_call<F, Fut, T>(&self, _adapter_name: &str, op: F) -> MessagingResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = MessagingResult<T>>,
    {
        op().await
    }

    #[cfg(feature = "resilience")]
    fn check_tenant_rate_limit(&self, tenant: &str) -> MessagingResult<()> {
        self.rate_limiters
            .check(&tenant.to_string())
            .map_err(|e| MessagingError::ConfigError(format!("tenant '{tenant}' rate limited: {e}")))
    }

    #[cfg(not(feature = "resilience"))]
    fn check_tenant_rate_limit(&self, _tenant: &str) -> MessagingResult<()> {
        Ok(())
    }

    /// Publish `msg` to the logical `topic`, resolving tenant isolation,
    /// deduplication, rate limiting, and monitoring along the way.
    pub async fn publish(&self, topic: &str, msg: Message, opts: PublishOptions) -> MessagingResult<()> {
        let tenant = msg.tenant_id.clone();

        if let Some(dedup) = &self.dedup {
            if dedup.is_duplicate(&msg).await {
                info!(message_id = %msg.id, "duplicate skipped");
                return Ok(());
            }
        }

        self.check_tenant_rate_limit(Self::tenant_key(tenant.as_deref()))?;

        let physical_topic = self.resolver.resolve(topic, tenant.as_deref());
        let adapter_name = opts.adapter.clone();
        let adapter = self.adapters.get(adapter_name.as_deref())?;
        let payload = serde_json::to_vec(&msg)?;

        let started = std::time::Instant::now();
        let result = self
            .guarded_call(adapter_name.as_deref().unwrap_or("default"), || {
                adapter.publish(&physical_topic, &payload, &opts)
            })
            .await;

        match result {
            Ok(()) => {
                if let Some(dedup) = &self.dedup {
                    dedup.mark_processed(&msg, None).await;
                }
                self.monitoring.record_processed(
                    &msg.id,
                    started.elapsed().as_millis() as u64,
                    payload.len() as u64,
                    ProcessStatus::Success,
                    Self::tenant_key(tenant.as_deref()),
                );
                Ok(())
            }
            Err(err) => {
                warn!(topic = %physical_topic, error = %err, "publish failed");
                self.monitoring
                    .record_error(&err.to_string(), "publish", Self::tenant_key(tenant.as_deref()));
                Err(MessagingError::publish(physical_topic, tenant, err.to_string()))
            }
        }
    }

    /// Subscribe `handler` to `topic`: resolves the physical topic through
    /// tenant isolation and hands the raw handler to the adapter.
    pub async fn subscribe(
        &self,
        topic: &str,
        tenant: Option<&str>,
        handler: MessageHandler,
    ) -> MessagingResult<()> {
        let physical_topic = self.resolver.resolve(topic, tenant);
        let adapter = self.adapters.get(None)?;
        adapter.subscribe(&physical_topic, handler).await
    }

    /// `send_to_queue` mirrors `publish` without deduplication by default.
    pub async fn send_to_queue(&self, queue: &str, msg: Message, opts: PublishOptions) -> MessagingResult<()> {
        let tenant = msg.tenant_id.clone();
        self.check_tenant_rate_limit(Self::tenant_key(tenant.as_deref()))?;
        let physical_queue = self.resolver.resolve(queue, tenant.as_deref());
        let adapter_name = opts.adapter.clone();
        let adapter = self.adapters.get(adapter_name.as_deref())?;
        let payload = serde_json::to_vec(&msg)?;

        let result = self
            .guarded_call(adapter_name.as_deref().unwrap_or("default"), || {
                adapter.send_to_queue(&physical_queue, &payload, &opts)
            })
            .await;

        result.map_err(|err| MessagingError::publish(physical_queue, tenant, err.to_string()))
    }

    /// Begin consuming `queue`, resuming from any previously tracked
    /// consumer state and wrapping `handler` so progress and monitoring are
    /// recorded on every invocation.
    pub async fn consume(
        &self,
        queue: &str,
        tenant: Option<&str>,
        handler: MessageHandler,
    ) -> MessagingResult<String> {
        let consumer_id = generate_consumer_id(tenant, queue);

        if let Some(tracker) = &self.consumer_state {
            match tracker.get(&consumer_id, tenant).await {
                Some(existing) => {
                    debug!(
                        consumer_id = %consumer_id,
                        last_processed = ?existing.last_processed_message_id,
                        "resuming consumer"
                    );
                }
                None => {
                    tracker.create(&consumer_id, queue, tenant.map(str::to_string)).await;
                }
            }
        }

        let physical_queue = self.resolver.resolve(queue, tenant);
        let adapter = self.adapters.get(None)?;

        let tracker = self.consumer_state.clone();
        let consumer_id_for_wrapper = consumer_id.clone();
        let queue_for_wrapper = queue.to_string();
        let tenant_for_wrapper = tenant.map(str::to_string);
        let monitoring = self.monitoring.clone();

        let wrapped: MessageHandler = Arc::new(move |message: Message| {
            let handler = handler.clone();
            let tracker = tracker.clone();
            let consumer_id = consumer_id_for_wrapper.clone();
            let queue_name = queue_for_wrapper.clone();
            let tenant = tenant_for_wrapper.clone();
            let monitoring = monitoring.clone();
            Box::pin(async move {
                let started = std::time::Instant::now();
                let message_id = message.id.clone();
                let result = handler(message).await;
                match &result {
                    Ok(()) => {
                        if let Some(tracker) = &tracker {
                            tracker
                                .update_processed(&consumer_id, &queue_name, &message_id, tenant.as_deref())
                                .await;
                        }
                        monitoring.record_processed(
                            &message_id,
                            started.elapsed().as_millis() as u64,
                            0,
                            ProcessStatus::Success,
                            tenant.as_deref().unwrap_or("default"),
                        );
                    }
                    Err(err) => {
                        if let Some(tracker) = &tracker {
                            tracker
                                .update_error(&consumer_id, &queue_name, &err.to_string(), tenant.as_deref())
                                .await;
                        }
                        monitoring.record_error(&err.to_string(), "consume", tenant.as_deref().unwrap_or("default"));
                    }
                }
                result
            })
        });

        adapter.consume(&physical_queue, wrapped).await?;
        Ok(consumer_id)
    }

    /// Declare a queue, resolving the physical name through tenant isolation.
    pub async fn create_queue(&self, queue: &str, tenant: Option<&str>) -> MessagingResult<()> {
        let physical = self.resolver.resolve(queue, tenant);
        self.adapters.get(None)?.create_queue(&physical).await
    }

    /// Delete a queue, resolving the physical name through tenant isolation.
    pub async fn delete_queue(&self, queue: &str, tenant: Option<&str>) -> MessagingResult<()> {
        let physical = self.resolver.resolve(queue, tenant);
        self.adapters.get(None)?.delete_queue(&physical).await
    }

    /// Purge a queue, resolving the physical name through tenant isolation.
    pub async fn purge_queue(&self, queue: &str, tenant: Option<&str>) -> MessagingResult<()> {
        let physical = self.resolver.resolve(queue, tenant);
        self.adapters.get(None)?.purge_queue(&physical).await
    }

    /// Query a queue's stats, resolving the physical name through tenant isolation.
    pub async fn queue_info(&self, queue: &str, tenant: Option<&str>) -> MessagingResult<QueueInfo> {
        let physical = self.resolver.resolve(queue, tenant);
        self.adapters.get(None)?.queue_info(&physical).await
    }
}

/// Shared adapter registry handle, so application code can register adapters
/// once at startup independent of the facade.
pub type SharedAdapters = DashMap<String, Arc<dyn BrokerAdapter>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::cache::MemoryCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn build_facade() -> (MessagingFacade<MemoryCache>, Arc<MemoryAdapter>) {
        let adapter = Arc::new(MemoryAdapter::new());
        let registry = AdapterRegistry::new("default").register("default", adapter.clone());
        let facade = MessagingFacade::builder(Arc::new(MemoryCache::new()), "hl8:messaging:", registry).build();
        (facade, adapter)
    }

    #[tokio::test]
    async fn publish_routes_through_tenant_isolation() {
        let (facade, adapter) = build_facade();
        adapter.connect().await.unwrap();
        let mut msg = Message::new(json!({"a": 1}));
        msg.tenant_id = Some("acme".to_string());
        facade.publish("orders", msg, PublishOptions::default()).await.unwrap();
        assert_eq!(adapter.publish_count("acme:orders"), 1);
    }

    #[tokio::test]
    async fn duplicate_publish_is_skipped() {
        let (facade, adapter) = build_facade();
        adapter.connect().await.unwrap();
        let msg = Message::new(json!({"a": 1}));
        facade.publish("orders", msg.clone(), PublishOptions::default()).await.unwrap();
        facade.publish("orders", msg, PublishOptions::default()).await.unwrap();
        assert_eq!(adapter.publish_count("default:orders"), 1);
    }

    #[tokio::test]
    async fn consume_tracks_progress_and_resumes() {
        let (facade, adapter) = build_facade();
        adapter.connect().await.unwrap();
        adapter.create_queue("work").await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let handler: MessageHandler = Arc::new(move |_msg| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                seen.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            })
        });

        let msg = Message::new(json!({"a": 1}));
        let payload = serde_json::to_vec(&msg).unwrap();
        adapter.send_to_queue("default:work", &payload, &PublishOptions::default()).await.unwrap();

        let consumer_id = facade.consume("work", None, handler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);

        let state = facade
            .consumer_state
            .as_ref()
            .unwrap()
            .get(&consumer_id, None)
            .await
            .unwrap();
        assert_eq!(state.total_processed, 1);
    }
}
