//! Durable-broker adapter backed by `lapin`. Publish goes to the configured
//! exchange with the routing key equal to the topic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueDeclareOptions, QueueDeleteOptions, QueuePurgeOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::task::JoinHandle;

use super::{AdapterInfo, AdapterType, BrokerAdapter, ConnectionInfo, MessageHandler, PublishOptions, QueueInfo};
use crate::error::{MessagingError, MessagingResult};
use crate::message::Message;

/// Configuration for the RabbitMQ adapter.
#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    /// AMQP connection URL.
    pub url: String,
    /// Exchange all topic publishes are routed through.
    pub exchange: String,
    /// Prefix applied to all declared queue names.
    pub queue_prefix: String,
    /// Requested heartbeat interval in seconds, passed as an AMQP URI query
    /// parameter. `None` leaves the server's default in place.
    pub heartbeat: Option<u16>,
}

impl RabbitMqConfig {
    fn connection_url(&self) -> String {
        match self.heartbeat {
            Some(secs) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{separator}heartbeat={secs}", self.url)
            }
            None => self.url.clone(),
        }
    }
}

/// A `BrokerAdapter` driving a durable, exchange/routing-key broker.
pub struct RabbitMqAdapter {
    config: RabbitMqConfig,
    connection: tokio::sync::Mutex<Option<Connection>>,
    channel: tokio::sync::Mutex<Option<Channel>>,
    connected: AtomicBool,
    consumers: DashMap<String, JoinHandle<()>>,
}

impl RabbitMqAdapter {
    /// Build a disconnected adapter for the given config.
    pub fn new(config: RabbitMqConfig) -> Self {
        Self {
            config,
            connection: tokio::sync::Mutex::new(None),
            channel: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            consumers: DashMap::new(),
        }
    }

    fn queue_name(&self, queue: &str) -> String {
        format!("{}{}", self.config.queue_prefix, queue)
    }

    async fn channel(&self) -> MessagingResult<Channel> {
        self.channel
            .lock()
            .await
            .clone()
            .ok_or_else(|| MessagingError::connection("not connected"))
    }
}

#[async_trait]
impl BrokerAdapter for RabbitMqAdapter {
    async fn connect(&self) -> MessagingResult<()> {
        let connection = Connection::connect(&self.config.connection_url(), ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        *self.connection.lock().await = Some(connection);
        *self.channel.lock().await = Some(channel);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        for entry in self.consumers.iter() {
            entry.value().abort();
        }
        if let Some(connection) = self.connection.lock().await.take() {
            let _ = connection.close(200, "shutdown").await;
        }
        *self.channel.lock().await = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connected: self.is_connected(),
            endpoint: self.config.url.clone(),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8], _opts: &PublishOptions) -> MessagingResult<()> {
        let channel = self.channel().await?;
        channel
            .basic_publish(
                &self.config.exchange,
                topic,
                BasicPublishOptions::default(),
                payload,
                lapin::BasicProperties::default(),
            )
            .await
            .map_err(|e| MessagingError::PublishError {
                topic: topic.to_string(),
                tenant: None,
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let queue_name = format!("sub.{topic}");
        channel
            .queue_declare(&queue_name, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::ConsumeError {
                queue: queue_name.clone(),
                tenant: None,
                message: e.to_string(),
            })?;
        channel
            .queue_bind(
                &queue_name,
                &self.config.exchange,
                topic,
                Default::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::ConsumeError {
                queue: queue_name.clone(),
                tenant: None,
                message: e.to_string(),
            })?;
        self.spawn_consumer(&queue_name, handler).await
    }

    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        let queue_name = format!("sub.{topic}");
        self.cancel_consumer(&queue_name).await
    }

    async fn send_to_queue(&self, queue: &str, payload: &[u8], _opts: &PublishOptions) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let queue_name = self.queue_name(queue);
        channel
            .queue_declare(&queue_name, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::PublishError {
                topic: queue_name.clone(),
                tenant: None,
                message: e.to_string(),
            })?;
        channel
            .basic_publish(
                "",
                &queue_name,
                BasicPublishOptions::default(),
                payload,
                lapin::BasicProperties::default(),
            )
            .await
            .map_err(|e| MessagingError::PublishError {
                topic: queue_name,
                tenant: None,
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn consume(&self, queue: &str, handler: MessageHandler) -> MessagingResult<()> {
        let queue_name = self.queue_name(queue);
        self.spawn_consumer(&queue_name, handler).await
    }

    async fn cancel_consumer(&self, queue: &str) -> MessagingResult<()> {
        let queue_name = self.queue_name(queue);
        if let Some((_, task)) = self.consumers.remove(&queue_name) {
            task.abort();
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> MessagingResult<()> {
        let channel = self.channel().await?;
        channel
            .queue_declare(&self.queue_name(queue), QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> MessagingResult<()> {
        self.cancel_consumer(queue).await?;
        let channel = self.channel().await?;
        channel
            .queue_delete(&self.queue_name(queue), QueueDeleteOptions::default())
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> MessagingResult<()> {
        let channel = self.channel().await?;
        channel
            .queue_purge(&self.queue_name(queue), QueuePurgeOptions::default())
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(())
    }

    async fn queue_info(&self, queue: &str) -> MessagingResult<QueueInfo> {
        let channel = self.channel().await?;
        let declared = channel
            .queue_declare(&self.queue_name(queue), QueueDeclareOptions { passive: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| MessagingError::ConfigError(e.to_string()))?;
        Ok(QueueInfo {
            name: self.queue_name(queue),
            message_count: declared.message_count() as u64,
            consumer_count: declared.consumer_count() as u64,
        })
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Rabbitmq
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            adapter_type: AdapterType::Rabbitmq,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RabbitMqAdapter {
    async fn spawn_consumer(&self, queue_name: &str, handler: MessageHandler) -> MessagingResult<()> {
        let channel = self.channel().await?;
        let mut consumer = channel
            .basic_consume(
                queue_name,
                &format!("consumer-{queue_name}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::ConsumeError {
                queue: queue_name.to_string(),
                tenant: None,
                message: e.to_string(),
            })?;

        let task = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { continue };
                let decoded: Result<Message, _> = serde_json::from_slice(&delivery.data);
                match decoded {
                    Ok(message) => match handler(message).await {
                        Ok(()) => {
                            let _ = delivery.ack(BasicAckOptions::default()).await;
                        }
                        Err(_) => {
                            let _ = delivery
                                .nack(BasicNackOptions {
                                    requeue: true,
                                    ..Default::default()
                                })
                                .await;
                        }
                    },
                    Err(_) => {
                        let _ = delivery.nack(BasicNackOptions::default()).await;
                    }
                }
            }
        });
        self.consumers.insert(queue_name.to_string(), task);
        Ok(())
    }
}
