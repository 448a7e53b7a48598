//! Pub/sub-and-streams adapter backed by the `redis` crate. Topics use native
//! pub/sub; queues use a stream named `<stream_prefix><queue>` so consumers
//! can resume from a last-delivered id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::task::JoinHandle;

use super::{AdapterInfo, AdapterType, BrokerAdapter, ConnectionInfo, MessageHandler, PublishOptions, QueueInfo};
use crate::error::{MessagingError, MessagingResult};
use crate::message::Message;

/// Configuration for the Redis adapter.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis server host.
    pub host: String,
    /// Redis server port.
    pub port: u16,
    /// Optional auth password.
    pub password: Option<String>,
    /// Optional logical database index.
    pub db: Option<i64>,
    /// Prefix applied to stream (queue) names.
    pub stream_prefix: String,
}

impl RedisConfig {
    fn connection_url(&self) -> String {
        let auth = self
            .password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        let db = self.db.unwrap_or(0);
        format!("redis://{auth}{}:{}/{db}", self.host, self.port)
    }
}

/// A `BrokerAdapter` driving a key-value store with pub/sub and streams.
pub struct RedisAdapter {
    config: RedisConfig,
    client: redis::Client,
    manager: tokio::sync::Mutex<Option<ConnectionManager>>,
    connected: AtomicBool,
    subscriptions: DashMap<String, JoinHandle<()>>,
    consumers: DashMap<String, JoinHandle<()>>,
}

impl RedisAdapter {
    /// Build a disconnected adapter for the given config.
    pub fn new(config: RedisConfig) -> MessagingResult<Self> {
        let client = redis::Client::open(config.connection_url())
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        Ok(Self {
            config,
            client,
            manager: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            subscriptions: DashMap::new(),
            consumers: DashMap::new(),
        })
    }

    fn channel_name(&self, topic: &str) -> String {
        format!("{}{}", self.config.stream_prefix, topic)
    }

    fn stream_name(&self, queue: &str) -> String {
        format!("{}{}", self.config.stream_prefix, queue)
    }

    async fn manager(&self) -> MessagingResult<ConnectionManager> {
        self.manager
            .lock()
            .await
            .clone()
            .ok_or_else(|| MessagingError::connection("not connected"))
    }
}

#[async_trait]
impl BrokerAdapter for RedisAdapter {
    async fn connect(&self) -> MessagingResult<()> {
        let manager = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        *self.manager.lock().await = Some(manager);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
        for entry in self.consumers.iter() {
            entry.value().abort();
        }
        *self.manager.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connected: self.is_connected(),
            endpoint: format!("{}:{}", self.config.host, self.config.port),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8], _opts: &PublishOptions) -> MessagingResult<()> {
        let mut manager = self.manager().await?;
        let channel = self.channel_name(topic);
        manager
            .publish::<_, _, ()>(&channel, payload)
            .await
            .map_err(|e| MessagingError::publish(channel, None, e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> MessagingResult<()> {
        let channel = self.channel_name(topic);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| MessagingError::consume(&channel, None, e.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| MessagingError::consume(&channel, None, e.to_string()))?;

        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if let Ok(message) = serde_json::from_slice::<Message>(&payload) {
                    let _ = handler(message).await;
                }
            }
        });
        self.subscriptions.insert(topic.to_string(), task);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        if let Some((_, task)) = self.subscriptions.remove(topic) {
            task.abort();
        }
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: &[u8], _opts: &PublishOptions) -> MessagingResult<()> {
        let mut manager = self.manager().await?;
        let stream = self.stream_name(queue);
        manager
            .xadd::<_, _, _, _, ()>(&stream, "*", &[("payload", payload)])
            .await
            .map_err(|e| MessagingError::publish(stream, None, e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, handler: MessageHandler) -> MessagingResult<()> {
        let mut manager = self.manager().await?;
        let stream = self.stream_name(queue);
        let task = tokio::spawn(async move {
            let mut last_id = "0".to_string();
            loop {
                let opts = StreamReadOptions::default().block(2000).count(10);
                let reply: Result<StreamReadReply, _> =
                    manager.xread_options(&[&stream], &[&last_id], &opts).await;
                let Ok(reply) = reply else {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                };
                for stream_key in reply.keys {
                    for stream_id in stream_key.ids {
                        last_id = stream_id.id.clone();
                        if let Some(redis::Value::BulkString(bytes)) = stream_id.map.get("payload") {
                            if let Ok(message) = serde_json::from_slice::<Message>(bytes) {
                                let _ = handler(message).await;
                            }
                        }
                    }
                }
            }
        });
        self.consumers.insert(queue.to_string(), task);
        Ok(())
    }

    async fn cancel_consumer(&self, queue: &str) -> MessagingResult<()> {
        if let Some((_, task)) = self.consumers.remove(queue) {
            task.abort();
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> MessagingResult<()> {
        // Streams are created implicitly by the first XADD; nothing to do
        // until a message is actually sent.
        let _ = queue;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> MessagingResult<()> {
        self.cancel_consumer(queue).await?;
        let mut manager = self.manager().await?;
        let stream = self.stream_name(queue);
        let _: () = manager
            .del(&stream)
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> MessagingResult<()> {
        let mut manager = self.manager().await?;
        let stream = self.stream_name(queue);
        let _: Result<i64, _> = manager.xtrim(&stream, redis::streams::StreamMaxlen::Equals(0)).await;
        Ok(())
    }

    async fn queue_info(&self, queue: &str) -> MessagingResult<QueueInfo> {
        let mut manager = self.manager().await?;
        let stream = self.stream_name(queue);
        let len: i64 = manager.xlen(&stream).await.unwrap_or(0);
        Ok(QueueInfo {
            name: stream,
            message_count: len.max(0) as u64,
            consumer_count: if self.consumers.contains_key(queue) { 1 } else { 0 },
        })
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Redis
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            adapter_type: AdapterType::Redis,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
