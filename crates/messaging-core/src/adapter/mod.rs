//! Broker Adapter Interface — the collaborator surface the
//! facade drives. Concrete adapters translate the uniform contract below
//! onto one backing broker's wire format; their internal wire handling is
//! deliberately narrow and not further specified.

mod memory;
#[cfg(feature = "adapter-kafka")]
mod kafka;
#[cfg(feature = "adapter-rabbitmq")]
mod rabbitmq;
#[cfg(feature = "adapter-redis")]
mod redis_adapter;

pub use memory::MemoryAdapter;
#[cfg(feature = "adapter-kafka")]
pub use kafka::KafkaAdapter;
#[cfg(feature = "adapter-rabbitmq")]
pub use rabbitmq::RabbitMqAdapter;
#[cfg(feature = "adapter-redis")]
pub use redis_adapter::RedisAdapter;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MessagingResult;
use crate::message::Message;

/// A boxed, 'static future, for trait-object-held handler closures.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Result of one handler invocation, used by adapters to decide ack/nack.
pub type HandlerResult = MessagingResult<()>;

/// A subscribe/consume callback. Invoked with the deserialized `Message`;
/// adapters ack on `Ok`, nack-with-redelivery on `Err`.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<HandlerResult> + Send + Sync>;

/// Which concrete broker an adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    /// A durable, exchange/routing-key broker.
    Rabbitmq,
    /// A key-value store with pub/sub and streams.
    Redis,
    /// A partitioned streaming log.
    Kafka,
    /// An in-process, test-friendly broker.
    Memory,
}

/// Static descriptive info about an adapter, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Which broker this adapter drives.
    pub adapter_type: AdapterType,
    /// Human-readable version/build string.
    pub version: String,
}

/// Point-in-time connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Whether the adapter currently holds a live connection.
    pub connected: bool,
    /// Opaque endpoint description (host:port, broker list, ...).
    pub endpoint: String,
}

/// Per-publish/send options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Override which registered adapter handles this call.
    pub adapter: Option<String>,
    /// Optional message headers, forwarded to the adapter's native envelope.
    pub headers: std::collections::HashMap<String, String>,
    /// Optional partition/routing hint (partition key for a streaming-log
    /// broker, routing key override for an exchange-based broker).
    pub routing_hint: Option<String>,
}

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    /// The physical queue name.
    pub name: String,
    /// Approximate number of ready messages.
    pub message_count: u64,
    /// Approximate number of active consumers.
    pub consumer_count: u64,
}

/// Uniform contract every broker adapter implements.
///
/// Handlers are invoked with the deserialized payload; acknowledgement (for
/// brokers that support it) happens inside the adapter after the handler
/// returns without error, and is a negative-acknowledgement with
/// redelivery on handler error.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Establish the broker connection.
    async fn connect(&self) -> MessagingResult<()>;
    /// Tear down the broker connection.
    async fn disconnect(&self) -> MessagingResult<()>;
    /// Whether the adapter currently holds a live connection.
    fn is_connected(&self) -> bool;
    /// Point-in-time connection diagnostics.
    fn connection_info(&self) -> ConnectionInfo;

    /// Publish to a topic (pub/sub semantics).
    async fn publish(&self, topic: &str, payload: &[u8], opts: &PublishOptions) -> MessagingResult<()>;
    /// Subscribe to a topic; the handler fires once per delivered message.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> MessagingResult<()>;
    /// Cancel a topic subscription.
    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()>;

    /// Send to a queue (point-to-point semantics).
    async fn send_to_queue(&self, queue: &str, payload: &[u8], opts: &PublishOptions) -> MessagingResult<()>;
    /// Begin consuming a queue; the handler fires once per delivered message.
    async fn consume(&self, queue: &str, handler: MessageHandler) -> MessagingResult<()>;
    /// Cancel an active consumer on a queue.
    async fn cancel_consumer(&self, queue: &str) -> MessagingResult<()>;

    /// Declare a queue, creating it if absent.
    async fn create_queue(&self, queue: &str) -> MessagingResult<()>;
    /// Delete a queue and its contents.
    async fn delete_queue(&self, queue: &str) -> MessagingResult<()>;
    /// Remove all messages from a queue without deleting it.
    async fn purge_queue(&self, queue: &str) -> MessagingResult<()>;
    /// Point-in-time queue statistics.
    async fn queue_info(&self, queue: &str) -> MessagingResult<QueueInfo>;

    /// Which broker this adapter drives.
    fn adapter_type(&self) -> AdapterType;
    /// Static descriptive info.
    fn adapter_info(&self) -> AdapterInfo;
}
