//! Streaming-log adapter backed by `rdkafka`. The partition key defaults to the message id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message as _;
use tokio::task::JoinHandle;

use super::{AdapterInfo, AdapterType, BrokerAdapter, ConnectionInfo, MessageHandler, PublishOptions, QueueInfo};
use crate::error::{MessagingError, MessagingResult};
use crate::message::Message;

/// Configuration for the Kafka adapter.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Client id reported to the broker.
    pub client_id: String,
    /// Bootstrap broker list.
    pub brokers: Vec<String>,
    /// Prefix applied to logical topic/queue names.
    pub topic_prefix: String,
}

/// A `BrokerAdapter` driving a partitioned streaming-log broker.
pub struct KafkaAdapter {
    config: KafkaConfig,
    producer: tokio::sync::Mutex<Option<FutureProducer>>,
    admin: tokio::sync::Mutex<Option<AdminClient<DefaultClientContext>>>,
    connected: AtomicBool,
    consumers: DashMap<String, JoinHandle<()>>,
}

impl KafkaAdapter {
    /// Build a disconnected adapter for the given config.
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            producer: tokio::sync::Mutex::new(None),
            admin: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            consumers: DashMap::new(),
        }
    }

    fn topic_name(&self, name: &str) -> String {
        format!("{}{}", self.config.topic_prefix, name)
    }

    fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", self.config.brokers.join(","));
        cfg.set("client.id", &self.config.client_id);
        cfg
    }

    async fn producer(&self) -> MessagingResult<FutureProducer> {
        self.producer
            .lock()
            .await
            .clone()
            .ok_or_else(|| MessagingError::connection("not connected"))
    }

    async fn spawn_consumer(&self, topic: &str, handler: MessageHandler) -> MessagingResult<()> {
        let consumer: StreamConsumer = self
            .client_config()
            .set("group.id", format!("{}-{}", self.config.client_id, topic))
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| MessagingError::consume(topic, None, e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| MessagingError::consume(topic, None, e.to_string()))?;

        let task = tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(borrowed) => {
                        let payload = borrowed.payload().unwrap_or_default();
                        let decoded: Result<Message, _> = serde_json::from_slice(payload);
                        if let Ok(message) = decoded {
                            if handler(message).await.is_ok() {
                                let _ = consumer.store_offset_from_message(&borrowed);
                            }
                        }
                    }
                    Err(_) => {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        });
        self.consumers.insert(topic.to_string(), task);
        Ok(())
    }
}

#[async_trait]
impl BrokerAdapter for KafkaAdapter {
    async fn connect(&self) -> MessagingResult<()> {
        let producer: FutureProducer = self
            .client_config()
            .create()
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        let admin: AdminClient<DefaultClientContext> = self
            .client_config()
            .create()
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        *self.producer.lock().await = Some(producer);
        *self.admin.lock().await = Some(admin);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        for entry in self.consumers.iter() {
            entry.value().abort();
        }
        *self.producer.lock().await = None;
        *self.admin.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connected: self.is_connected(),
            endpoint: self.config.brokers.join(","),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8], opts: &PublishOptions) -> MessagingResult<()> {
        let producer = self.producer().await?;
        let topic_name = self.topic_name(topic);
        let key = opts.routing_hint.clone().unwrap_or_default();
        let record = FutureRecord::to(&topic_name).payload(payload).key(&key);
        producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| MessagingError::publish(topic_name, None, e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> MessagingResult<()> {
        self.spawn_consumer(&self.topic_name(topic), handler).await
    }

    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        self.cancel_consumer(topic).await
    }

    async fn send_to_queue(&self, queue: &str, payload: &[u8], opts: &PublishOptions) -> MessagingResult<()> {
        self.publish(queue, payload, opts).await
    }

    async fn consume(&self, queue: &str, handler: MessageHandler) -> MessagingResult<()> {
        self.spawn_consumer(&self.topic_name(queue), handler).await
    }

    async fn cancel_consumer(&self, queue: &str) -> MessagingResult<()> {
        let topic_name = self.topic_name(queue);
        if let Some((_, task)) = self.consumers.remove(&topic_name) {
            task.abort();
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> MessagingResult<()> {
        let admin = self.admin.lock().await;
        let admin = admin.as_ref().ok_or_else(|| MessagingError::connection("not connected"))?;
        let topic_name = self.topic_name(queue);
        let topic = NewTopic::new(&topic_name, 1, TopicReplication::Fixed(1));
        admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> MessagingResult<()> {
        self.cancel_consumer(queue).await?;
        let admin = self.admin.lock().await;
        let admin = admin.as_ref().ok_or_else(|| MessagingError::connection("not connected"))?;
        let topic_name = self.topic_name(queue);
        admin
            .delete_topics(&[&topic_name], &AdminOptions::new())
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> MessagingResult<()> {
        // Kafka has no truncate primitive short of deleting and recreating
        // the topic; any in-flight consumer will need to resubscribe.
        self.delete_queue(queue).await?;
        self.create_queue(queue).await
    }

    async fn queue_info(&self, queue: &str) -> MessagingResult<QueueInfo> {
        // message_count would require a watermark-offset query per partition;
        // left at 0 until a caller needs it badly enough to justify the cost.
        Ok(QueueInfo {
            name: self.topic_name(queue),
            message_count: 0,
            consumer_count: if self.consumers.contains_key(&self.topic_name(queue)) { 1 } else { 0 },
        })
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Kafka
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            adapter_type: AdapterType::Kafka,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
