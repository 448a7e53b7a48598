//! Event Facade — named event emit/on/once/off layered over
//! the Messaging Facade.
//!
//! `on`/`once` register directly against this facade's own handler registry
//! rather than the adapter: the adapter only supports one active subscriber
//! per physical topic, while an event name can have many independent
//! listeners. A single adapter subscription per topic fans out to the
//! registry under a short-lived lock; all handler I/O runs
//! outside that lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::adapter::{HandlerResult, MessageHandler, PublishOptions};
use crate::cache::Cache;
use crate::error::MessagingResult;
use crate::facade::MessagingFacade;
use crate::message::Message;

/// Handle returned by `on`/`once`, passed back to `off` to remove a single
/// listener.
pub type SubscriptionId = u64;

struct HandlerEntry {
    id: SubscriptionId,
    handler: MessageHandler,
    once: bool,
}

/// Named event emit/on/once/off layered over a `MessagingFacade`.
pub struct EventFacade<C: Cache> {
    facade: Arc<MessagingFacade<C>>,
    handlers: DashMap<String, Arc<Mutex<Vec<HandlerEntry>>>>,
    next_id: AtomicU64,
}

impl<C: Cache + 'static> EventFacade<C> {
    /// Build an event facade over `facade`.
    pub fn new(facade: Arc<MessagingFacade<C>>) -> Self {
        Self {
            facade,
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn topic_for(name: &str, tenant: Option<&str>) -> String {
        match tenant {
            Some(t) => format!("tenant.{t}.event.{name}"),
            None => format!("event.{name}"),
        }
    }

    /// `emit(name, data, opts)`: publishes to `event.<name>`, or
    /// `tenant.<tenant>.event.<name>` if `tenant` is present.
    pub async fn emit(
        &self,
        name: &str,
        tenant: Option<&str>,
        data: Value,
        opts: PublishOptions,
    ) -> MessagingResult<()> {
        let topic = Self::topic_for(name, tenant);
        let mut msg = Message::new(data);
        if let Some(t) = tenant {
            msg = msg.with_tenant(t);
        }
        self.facade.publish(&topic, msg, opts).await
    }

    /// `emit_tenant_event(tenant, name, data)`: always targets the explicit
    /// tenant namespace, regardless of the caller's own context.
    pub async fn emit_tenant_event(&self, tenant: &str, name: &str, data: Value) -> MessagingResult<()> {
        self.emit(name, Some(tenant), data, PublishOptions::default()).await
    }

    async fn ensure_subscribed(&self, topic: &str, tenant: Option<&str>) -> MessagingResult<()> {
        if self.handlers.contains_key(topic) {
            return Ok(());
        }
        let registry = self
            .handlers
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();
        let dispatch: MessageHandler = Arc::new(move |message: Message| {
            let registry = registry.clone();
            Box::pin(async move {
                let snapshot: Vec<(SubscriptionId, MessageHandler)> = registry
                    .lock()
                    .iter()
                    .map(|e| (e.id, e.handler.clone()))
                    .collect();
                let mut fired_once = Vec::new();
                for (id, handler) in snapshot {
                    if let Err(err) = handler(message.clone()).await {
                        warn!(event_id = id, error = %err, "event handler failed");
                    }
                    fired_once.push(id);
                }
                if !fired_once.is_empty() {
                    let mut guard = registry.lock();
                    guard.retain(|e| !(e.once && fired_once.contains(&e.id)));
                }
                Ok(()) as HandlerResult
            })
        });
        self.facade.subscribe(topic, tenant, dispatch).await
    }

    async fn register(&self, name: &str, tenant: Option<&str>, handler: MessageHandler, once: bool) -> MessagingResult<SubscriptionId> {
        let topic = Self::topic_for(name, tenant);
        self.ensure_subscribed(&topic, tenant).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = self.handlers.get(&topic).expect("just inserted").clone();
        registry.lock().push(HandlerEntry { id, handler, once });
        Ok(id)
    }

    /// `on(name, handler)`: subscribes to `event.<name>`. Handler errors are
    /// logged, never propagated.
    pub async fn on(&self, name: &str, handler: MessageHandler) -> MessagingResult<SubscriptionId> {
        self.register(name, None, handler, false).await
    }

    /// `once(name, handler)`: like `on`, but the listener removes itself
    /// after its first delivery.
    pub async fn once(&self, name: &str, handler: MessageHandler) -> MessagingResult<SubscriptionId> {
        self.register(name, None, handler, true).await
    }

    /// `on_tenant_event(tenant, name, handler)`: subscribes explicitly to
    /// `tenant.<tenant>.event.<name>`.
    pub async fn on_tenant_event(
        &self,
        tenant: &str,
        name: &str,
        handler: MessageHandler,
    ) -> MessagingResult<SubscriptionId> {
        self.register(name, Some(tenant), handler, false).await
    }

    /// `off(name, id)`: remove one listener by the id returned from
    /// `on`/`once`/`on_tenant_event`. Unsubscribes from the adapter once no
    /// listeners remain for the event.
    pub async fn off(&self, name: &str, tenant: Option<&str>, id: SubscriptionId) -> MessagingResult<()> {
        let topic = Self::topic_for(name, tenant);
        let Some(registry) = self.handlers.get(&topic).map(|r| r.clone()) else {
            return Ok(());
        };
        let empty = {
            let mut guard = registry.lock();
            guard.retain(|e| e.id != id);
            guard.is_empty()
        };
        if empty {
            self.handlers.remove(&topic);
        }
        Ok(())
    }

    /// `off_all(name)`: remove every listener for `name` and unsubscribe
    /// from the adapter.
    pub async fn off_all(&self, name: &str, tenant: Option<&str>) -> MessagingResult<()> {
        let topic = Self::topic_for(name, tenant);
        self.handlers.remove(&topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterType;
    use crate::cache::MemoryCache;
    use crate::facade::{AdapterRegistry, MessagingFacade};
    use crate::adapter::MemoryAdapter;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use serde_json::json;

    async fn test_facade() -> Arc<MessagingFacade<MemoryCache>> {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.connect().await.unwrap();
        assert_eq!(adapter.adapter_type(), AdapterType::Memory);
        let registry = AdapterRegistry::new("memory").register("memory", adapter);
        Arc::new(
            MessagingFacade::builder(Arc::new(MemoryCache::new()), "hl8:messaging:", registry)
                .build(),
        )
    }

    #[tokio::test]
    async fn on_receives_emitted_event() {
        let facade = test_facade().await;
        let events = Arc::new(EventFacade::new(facade));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler: MessageHandler = Arc::new(move |_msg| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        events.on("user.created", handler).await.unwrap();
        events
            .emit("user.created", None, json!({"id": "u1"}), PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_fires_only_once() {
        let facade = test_facade().await;
        let events = Arc::new(EventFacade::new(facade));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler: MessageHandler = Arc::new(move |_msg| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        events.once("user.created", handler).await.unwrap();
        events
            .emit("user.created", None, json!({"id": "u1"}), PublishOptions::default())
            .await
            .unwrap();
        events
            .emit("user.created", None, json!({"id": "u2"}), PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tenant_events_are_isolated() {
        let facade = test_facade().await;
        let events = Arc::new(EventFacade::new(facade));
        let acme_count = Arc::new(AtomicUsize::new(0));
        let acme_clone = acme_count.clone();
        let acme_handler: MessageHandler = Arc::new(move |_msg| {
            let count = acme_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        events
            .on_tenant_event("acme", "order.placed", acme_handler)
            .await
            .unwrap();
        events
            .emit_tenant_event("globex", "order.placed", json!({"id": "o1"}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(acme_count.load(Ordering::SeqCst), 0);

        events
            .emit_tenant_event("acme", "order.placed", json!({"id": "o2"}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(acme_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_stops_further_delivery() {
        let facade = test_facade().await;
        let events = Arc::new(EventFacade::new(facade));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handler: MessageHandler = Arc::new(move |_msg| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let id = events.on("user.created", handler).await.unwrap();
        events.off("user.created", None, id).await.unwrap();
        events
            .emit("user.created", None, json!({"id": "u1"}), PublishOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
