//! # TenantFlow
//!
//! **Multi-tenant messaging facade over pluggable broker adapters**
//!
//! TenantFlow sits in front of RabbitMQ, Kafka, Redis Streams, or an
//! in-memory broker and gives every caller the same tenant-aware surface:
//! namespaced keys, content-based deduplication, durable consumer offsets,
//! dead-letter retry with backoff, per-tenant config, and rolling metrics.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! tenantflow = "0.1"
//! ```
//!
//! ```rust,ignore
//! use tenantflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let facade = MessagingFacade::builder()
//!         .adapter("memory", std::sync::Arc::new(MemoryAdapter::new()))
//!         .build()?;
//!
//!     facade.publish("orders", "tenant-a", serde_json::json!({"order_id": 1})).await?;
//!     Ok(())
//! }
//! ```
//!
//! See the [messaging-core](../messaging_core/index.html) crate for the full API.

// Re-export everything from messaging-core
pub use messaging_core::*;
