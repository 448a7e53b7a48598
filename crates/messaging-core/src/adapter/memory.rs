//! An in-process adapter used for tests and the default bootstrap. Topics are
//! broadcast channels; queues are FIFO buffers drained by a single
//! background task per queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use super::{AdapterInfo, AdapterType, BrokerAdapter, ConnectionInfo, MessageHandler, PublishOptions, QueueInfo};
use crate::error::{MessagingError, MessagingResult};
use crate::message::Message;

struct QueueState {
    buffer: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl QueueState {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

/// An in-process, test-friendly broker adapter.
///
/// Publish counts are tracked per topic/queue for assertions in tests that
/// exercise the dedup gate end to end.
pub struct MemoryAdapter {
    connected: AtomicBool,
    topics: DashMap<String, broadcast::Sender<Arc<Message>>>,
    subscriptions: DashMap<String, JoinHandle<()>>,
    queues: DashMap<String, Arc<QueueState>>,
    consumers: DashMap<String, JoinHandle<()>>,
    publish_counts: DashMap<String, AtomicU64>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// Build a disconnected in-memory adapter.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            queues: DashMap::new(),
            consumers: DashMap::new(),
            publish_counts: DashMap::new(),
        }
    }

    /// Number of times `publish`/`send_to_queue` has been called for `name`.
    /// Exposed for test assertions; not part of `BrokerAdapter`.
    pub fn publish_count(&self, name: &str) -> u64 {
        self.publish_counts
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn bump_count(&self, name: &str) {
        self.publish_counts
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new()))
            .clone()
    }
}

#[async_trait]
impl BrokerAdapter for MemoryAdapter {
    async fn connect(&self) -> MessagingResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
        for entry in self.consumers.iter() {
            entry.value().abort();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connected: self.is_connected(),
            endpoint: "memory://local".to_string(),
        }
    }

    async fn publish(&self, topic: &str, payload: &[u8], _opts: &PublishOptions) -> MessagingResult<()> {
        let message: Message = serde_json::from_slice(payload)
            .map_err(|e| MessagingError::SerializationError(e.to_string()))?;
        self.bump_count(topic);
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone();
        // No subscribers is not an error for pub/sub; the message is dropped.
        let _ = sender.send(Arc::new(message));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> MessagingResult<()> {
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(1024).0)
            .clone();
        let mut receiver = sender.subscribe();
        let task = tokio::spawn(async move {
            while let Ok(message) = receiver.recv().await {
                let _ = handler((*message).clone()).await;
            }
        });
        if let Some(old) = self.subscriptions.insert(topic.to_string(), task) {
            old.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> MessagingResult<()> {
        if let Some((_, task)) = self.subscriptions.remove(topic) {
            task.abort();
        }
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: &[u8], _opts: &PublishOptions) -> MessagingResult<()> {
        let message: Message = serde_json::from_slice(payload)
            .map_err(|e| MessagingError::SerializationError(e.to_string()))?;
        self.bump_count(queue);
        let state = self.queue(queue);
        state.buffer.lock().push_back(message);
        state.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, queue: &str, handler: MessageHandler) -> MessagingResult<()> {
        let state = self.queue(queue);
        let task = tokio::spawn(async move {
            loop {
                let next = state.buffer.lock().pop_front();
                match next {
                    Some(message) => {
                        if handler(message.clone()).await.is_err() {
                            // Nack-with-redelivery: put it back at the front
                            // and back off so a stuck message doesn't spin
                            // the task hot while blocking the rest of the
                            // queue behind it.
                            state.buffer.lock().push_front(message);
                            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        }
                    }
                    None => state.notify.notified().await,
                }
            }
        });
        if let Some(old) = self.consumers.insert(queue.to_string(), task) {
            old.abort();
        }
        Ok(())
    }

    async fn cancel_consumer(&self, queue: &str) -> MessagingResult<()> {
        if let Some((_, task)) = self.consumers.remove(queue) {
            task.abort();
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> MessagingResult<()> {
        self.queue(queue);
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> MessagingResult<()> {
        if let Some((_, task)) = self.consumers.remove(queue) {
            task.abort();
        }
        self.queues.remove(queue);
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> MessagingResult<()> {
        if let Some(state) = self.queues.get(queue) {
            state.buffer.lock().clear();
        }
        Ok(())
    }

    async fn queue_info(&self, queue: &str) -> MessagingResult<QueueInfo> {
        let message_count = self
            .queues
            .get(queue)
            .map(|s| s.buffer.lock().len() as u64)
            .unwrap_or(0);
        let consumer_count = if self.consumers.contains_key(queue) { 1 } else { 0 };
        Ok(QueueInfo {
            name: queue.to_string(),
            message_count,
            consumer_count,
        })
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Memory
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            adapter_type: AdapterType::Memory,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn opts() -> PublishOptions {
        PublishOptions::default()
    }

    #[tokio::test]
    async fn publish_without_subscriber_does_not_error() {
        let adapter = MemoryAdapter::new();
        adapter.connect().await.unwrap();
        let msg = Message::new(json!({"a": 1}));
        let payload = serde_json::to_vec(&msg).unwrap();
        adapter.publish("topic.a", &payload, &opts()).await.unwrap();
        assert_eq!(adapter.publish_count("topic.a"), 1);
    }

    #[tokio::test]
    async fn subscribe_receives_published_message() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.connect().await.unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let handler: MessageHandler = Arc::new(move |_msg| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        adapter.subscribe("topic.b", handler).await.unwrap();
        let msg = Message::new(json!({"a": 1}));
        let payload = serde_json::to_vec(&msg).unwrap();
        adapter.publish("topic.b", &payload, &opts()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consume_drains_queued_messages() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.connect().await.unwrap();
        adapter.create_queue("q1").await.unwrap();
        for i in 0..3 {
            let msg = Message::new(json!({"i": i}));
            let payload = serde_json::to_vec(&msg).unwrap();
            adapter.send_to_queue("q1", &payload, &opts()).await.unwrap();
        }
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let handler: MessageHandler = Arc::new(move |_msg| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        adapter.consume("q1", handler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 3);
        let info = adapter.queue_info("q1").await.unwrap();
        assert_eq!(info.message_count, 0);
    }

    #[tokio::test]
    async fn purge_queue_clears_buffered_messages() {
        let adapter = MemoryAdapter::new();
        adapter.create_queue("q2").await.unwrap();
        let msg = Message::new(json!({"a": 1}));
        let payload = serde_json::to_vec(&msg).unwrap();
        adapter.send_to_queue("q2", &payload, &opts()).await.unwrap();
        adapter.purge_queue("q2").await.unwrap();
        let info = adapter.queue_info("q2").await.unwrap();
        assert_eq!(info.message_count, 0);
    }
}
