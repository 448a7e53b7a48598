//! # messaging-core
//!
//! A multi-tenant messaging facade over pluggable broker adapters.
//!
//! The facade sits in front of RabbitMQ, Kafka, Redis Streams, or an
//! in-memory broker and gives every caller the same tenant-aware surface:
//! namespaced topics/queues, content-based deduplication, durable consumer
//! offsets, dead-letter retry with backoff, per-tenant config, and rolling
//! metrics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use messaging_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(MemoryAdapter::new());
//!     adapter.connect().await?;
//!     let adapters = AdapterRegistry::new("memory").register("memory", adapter);
//!     let cache = Arc::new(MemoryCache::new());
//!     let facade = MessagingFacade::builder(cache, "hl8:messaging:", adapters).build();
//!
//!     facade
//!         .publish("orders", Message::new(serde_json::json!({"order_id": 1})), PublishOptions::default())
//!         .await?;
//!     Ok(())
//! }
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

/// The wire-level `Message` type and content-based fingerprinting.
pub mod message;

/// Error kinds surfaced by the facade and its components.
pub mod error;

/// Tenant key resolution (logical name → physical topic/queue name).
pub mod tenant;

/// Cache abstraction backing every stateful component below.
pub mod cache;

/// Deduplication Gate.
pub mod dedup;

/// Consumer State Tracker.
pub mod consumer;

/// Dead-Letter Store.
pub mod deadletter;

/// Typed bootstrap configuration.
pub mod config;

/// Tenant Config Cache.
pub mod tenant_config;

/// Monitoring Core.
pub mod monitoring;

/// Broker adapter interface and concrete adapters.
pub mod adapter;

/// Messaging Facade: publish/subscribe/send/consume orchestration.
pub mod facade;

/// Event Facade: named emit/on/once/off layered over the Messaging Facade.
pub mod event;

/// Task Facade and scheduler: named background jobs and their dispatch.
pub mod task;

/// Health check infrastructure.
#[cfg(feature = "health")]
pub mod health;

/// Resilience patterns (circuit breaker, keyed rate limiting) around broker
/// adapter calls.
#[cfg(feature = "resilience")]
pub mod resilience;

/// Graceful shutdown utilities.
pub mod shutdown;

// ============================================================================
// Re-exported dependencies
// ============================================================================
// These re-exports let consumers use the crates the facade's own public API
// is built from (e.g. constructing a `PublishOptions` or a `serde_json::Value`
// payload) without adding them explicitly to their Cargo.toml.

/// Re-export async_trait, used by the `BrokerAdapter` trait.
pub use async_trait;
/// Re-export chrono, used throughout the data model's timestamps.
pub use chrono;
/// Re-export dashmap, used by the in-memory cache and adapter registries.
pub use dashmap;
/// Re-export governor, backing rate limiting and the circuit breaker.
#[cfg(feature = "resilience")]
pub use governor;
/// Re-export moka, backing the in-memory cache.
#[cfg(feature = "cache-memory")]
pub use moka;
/// Re-export parking_lot for efficient synchronization primitives.
pub use parking_lot;
/// Re-export rand, used for jitter and consumer id generation.
pub use rand;
/// Re-export redis, used by the Redis broker adapter and cache backend.
#[cfg(any(feature = "cache-redis", feature = "adapter-redis"))]
pub use redis;
/// Re-export serde for serialization.
pub use serde;
/// Re-export serde_json for JSON message payloads.
pub use serde_json;
/// Re-export tokio for async runtime.
pub use tokio;
/// Re-export tracing for observability.
pub use tracing;

/// Prelude module for convenient imports.
///
/// Commonly used types when embedding the messaging facade in an
/// application.
pub mod prelude {
    /// Re-export broker adapter types.
    pub use crate::adapter::{
        AdapterInfo, AdapterType, BrokerAdapter, ConnectionInfo, MemoryAdapter, MessageHandler,
        PublishOptions, QueueInfo,
    };
    #[cfg(feature = "adapter-kafka")]
    pub use crate::adapter::KafkaAdapter;
    #[cfg(feature = "adapter-rabbitmq")]
    pub use crate::adapter::RabbitMqAdapter;
    #[cfg(feature = "adapter-redis")]
    pub use crate::adapter::RedisAdapter;
    /// Re-export cache utilities.
    pub use crate::cache::{Cache, CacheConfig, CacheKey, MemoryCache};
    /// Re-export bootstrap configuration.
    pub use crate::config::{AdapterKind, MessagingConfig};
    /// Re-export error types.
    pub use crate::error::{MessagingError, MessagingResult};
    /// Re-export the Event Facade.
    pub use crate::event::{EventFacade, SubscriptionId};
    /// Re-export the Messaging Facade and its collaborators.
    pub use crate::facade::{AdapterRegistry, MessagingFacade, MessagingFacadeBuilder};
    /// Re-export health check utilities.
    #[cfg(feature = "health")]
    pub use crate::health::{
        BrokerAdapterDependency, Dependency, DependencyStatus, HealthCheck, HealthReport,
        MonitoringHealthDependency, OverallStatus, SimpleHealthCheck,
    };
    /// Re-export the wire-level message type.
    pub use crate::message::{Fingerprint, Headers, Message};
    /// Re-export monitoring types.
    pub use crate::monitoring::{AlertReport, AlertThresholds, MonitoringCore, ProcessStatus};
    /// Re-export resilience primitives.
    #[cfg(feature = "resilience")]
    pub use crate::resilience::{CircuitBreakerConfig, CircuitBreakerManager, KeyedRateLimiter};
    /// Re-export shutdown utilities.
    pub use crate::shutdown::{
        GracefulShutdown, GracefulShutdownExt, ShutdownAwareTaskSpawner, ShutdownSignal,
        ShutdownToken,
    };
    /// Re-export the Task Facade and scheduler.
    pub use crate::task::{Schedule, ScheduledTask, Scheduler, TaskFacade, TaskOptions, TaskRecord, TaskStatus};
    /// Re-export tenant isolation and per-tenant config types.
    pub use crate::tenant::{PrefixIsolation, TenantIsolation, TenantKeyResolver};
    pub use crate::tenant_config::{TenantConfigCache, TenantConfigPatch, TenantMessagingConfig};
}

#[cfg(test)]
mod tests {
    #[test]
    fn crate_compiles() {
        assert!(true);
    }
}
