//! Task Facade — named background jobs layered over the
//! Messaging Facade's queue primitives.
//!
//! `process_task` wraps the caller's handler the same way
//! [`crate::facade::MessagingFacade::consume`] wraps a raw consumer: status
//! transitions and history are recorded around the handler call, never
//! inside it.

mod scheduler;

pub use scheduler::{Schedule, ScheduledTask, Scheduler};

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::adapter::{HandlerResult, MessageHandler, PublishOptions};
use crate::cache::Cache;
use crate::error::{MessagingError, MessagingResult};
use crate::facade::MessagingFacade;
use crate::message::Message;

/// How many history entries are retained per tenant.
const MAX_HISTORY_PER_TENANT: usize = 200;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Enqueued, not yet picked up by a worker.
    Pending,
    /// A worker has started the handler.
    Running,
    /// The handler returned successfully.
    Completed,
    /// The handler returned an error.
    Failed,
}

/// A background job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Stable task id.
    pub task_id: String,
    /// Task name; also the suffix of the queue it is enqueued on (`task.<name>`).
    pub name: String,
    /// Opaque job payload.
    pub data: Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Dispatch priority; `retry_task` re-enqueues at priority 1.
    pub priority: u32,
    /// Number of times this task has been submitted (including the original).
    pub attempt: u32,
    /// Owning tenant, if any.
    pub tenant_id: Option<String>,
    /// Error message from the last failed attempt, if any.
    pub error: Option<String>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn new(task_id: impl Into<String>, name: impl Into<String>, data: Value, tenant_id: Option<String>, priority: u32) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            name: name.into(),
            data,
            status: TaskStatus::Pending,
            priority,
            attempt: 1,
            tenant_id,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Options accepted by `add_task`.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Owning tenant, if any.
    pub tenant_id: Option<String>,
    /// Dispatch priority; higher runs first where the adapter honors it.
    pub priority: u32,
}

fn tenant_key(tenant: Option<&str>) -> &str {
    tenant.unwrap_or("default")
}

fn push_history(
    latest: &DashMap<String, TaskRecord>,
    history: &DashMap<String, Mutex<VecDeque<TaskRecord>>>,
    record: TaskRecord,
) {
    let tenant = tenant_key(record.tenant_id.as_deref()).to_string();
    latest.insert(record.task_id.clone(), record.clone());
    let entry = history.entry(tenant).or_insert_with(|| Mutex::new(VecDeque::new()));
    let mut queue = entry.lock();
    queue.push_back(record);
    while queue.len() > MAX_HISTORY_PER_TENANT {
        queue.pop_front();
    }
}

/// Named background jobs layered over a `MessagingFacade`'s queues.
pub struct TaskFacade<C: Cache> {
    facade: Arc<MessagingFacade<C>>,
    /// Latest known record per task id, used by `retry_task`.
    latest: Arc<DashMap<String, TaskRecord>>,
    /// Bounded per-tenant history, most recent last.
    history: Arc<DashMap<String, Mutex<VecDeque<TaskRecord>>>>,
}

impl<C: Cache + 'static> TaskFacade<C> {
    /// Build a task facade over `facade`.
    pub fn new(facade: Arc<MessagingFacade<C>>) -> Self {
        Self {
            facade,
            latest: Arc::new(DashMap::new()),
            history: Arc::new(DashMap::new()),
        }
    }

    fn queue_for(name: &str) -> String {
        format!("task.{name}")
    }

    /// `add_task(name, data, opts)`: enqueue a `TaskRecord{pending}` onto
    /// `task.<name>` via `send_to_queue`.
    pub async fn add_task(&self, name: &str, data: Value, opts: TaskOptions) -> MessagingResult<String> {
        let task_id = format!("task_{}", uuid::Uuid::new_v4());
        let record = TaskRecord::new(task_id.clone(), name, data, opts.tenant_id.clone(), opts.priority);
        push_history(&self.latest, &self.history, record.clone());

        let mut msg = Message::new(serde_json::to_value(&record)?);
        if let Some(t) = &opts.tenant_id {
            msg = msg.with_tenant(t.clone());
        }
        self.facade
            .send_to_queue(&Self::queue_for(name), msg, PublishOptions::default())
            .await?;
        Ok(task_id)
    }

    /// `process_task(name, handler)`: consume `task.<name>`, running `handler`
    /// against each record's `data` and recording the resulting status
    /// transition. Handler errors are recorded on the task, never
    /// propagated back to the consumer.
    pub async fn process_task<F, Fut>(&self, name: &str, handler: F) -> MessagingResult<String>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let latest = self.latest.clone();
        let history = self.history.clone();

        let wrapped: MessageHandler = Arc::new(move |message: Message| {
            let handler = handler.clone();
            let latest = latest.clone();
            let history = history.clone();
            Box::pin(async move {
                let mut record: TaskRecord = serde_json::from_value(message.payload.clone())
                    .map_err(|e| MessagingError::SerializationError(e.to_string()))?;
                record.status = TaskStatus::Running;
                record.updated_at = Utc::now();
                push_history(&latest, &history, record.clone());

                match handler(record.data.clone()).await {
                    Ok(()) => {
                        record.status = TaskStatus::Completed;
                        record.error = None;
                    }
                    Err(err) => {
                        warn!(task_id = %record.task_id, error = %err, "task handler failed");
                        record.status = TaskStatus::Failed;
                        record.error = Some(err);
                    }
                }
                record.updated_at = Utc::now();
                push_history(&latest, &history, record);
                Ok(()) as HandlerResult
            })
        });

        self.facade.consume(&Self::queue_for(name), None, wrapped).await
    }

    /// `retry_task(task_id)`: look up the last record and re-enqueue with
    /// `priority=1`. Fails if the task is unknown.
    pub async fn retry_task(&self, task_id: &str) -> MessagingResult<String> {
        let Some(previous) = self.latest.get(task_id).map(|r| r.clone()) else {
            return Err(MessagingError::ConfigError(format!("unknown task '{task_id}'")));
        };
        let mut record = previous;
        record.priority = 1;
        record.attempt += 1;
        record.status = TaskStatus::Pending;
        record.error = None;
        record.updated_at = Utc::now();
        push_history(&self.latest, &self.history, record.clone());

        let mut msg = Message::new(serde_json::to_value(&record)?).with_id(record.task_id.clone());
        if let Some(t) = &record.tenant_id {
            msg = msg.with_tenant(t.clone());
        }
        self.facade
            .send_to_queue(&Self::queue_for(&record.name), msg, PublishOptions::default())
            .await?;
        Ok(record.task_id)
    }

    /// The last known record for `task_id`, if any.
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.latest.get(task_id).map(|r| r.clone())
    }

    /// The last (up to) `limit` records for `tenant`, oldest first.
    pub fn history(&self, tenant: Option<&str>, limit: usize) -> Vec<TaskRecord> {
        let tenant = tenant_key(tenant);
        match self.history.get(tenant) {
            Some(entry) => {
                let queue = entry.lock();
                queue.iter().rev().take(limit).rev().cloned().collect()
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterType, MemoryAdapter};
    use crate::cache::MemoryCache;
    use crate::facade::AdapterRegistry;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn test_facade() -> Arc<MessagingFacade<MemoryCache>> {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.connect().await.unwrap();
        assert_eq!(adapter.adapter_type(), AdapterType::Memory);
        let registry = AdapterRegistry::new("memory").register("memory", adapter);
        Arc::new(MessagingFacade::builder(Arc::new(MemoryCache::new()), "hl8:messaging:", registry).build())
    }

    #[tokio::test]
    async fn add_task_then_process_marks_completed() {
        let facade = test_facade().await;
        let tasks = Arc::new(TaskFacade::new(facade));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        tasks
            .process_task("send-email", move |_data| {
                let seen = seen_clone.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        let task_id = tasks
            .add_task("send-email", json!({"to": "a@example.com"}), TaskOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let record = tasks.get(&task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_handler_marks_task_failed() {
        let facade = test_facade().await;
        let tasks = Arc::new(TaskFacade::new(facade));
        tasks
            .process_task("flaky", |_data| async { Err("boom".to_string()) })
            .await
            .unwrap();

        let task_id = tasks
            .add_task("flaky", json!({}), TaskOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let record = tasks.get(&task_id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn retry_task_bumps_priority_and_attempt() {
        let facade = test_facade().await;
        let tasks = Arc::new(TaskFacade::new(facade));
        let task_id = tasks
            .add_task("send-email", json!({}), TaskOptions::default())
            .await
            .unwrap();

        tasks.retry_task(&task_id).await.unwrap();
        let record = tasks.get(&task_id).unwrap();
        assert_eq!(record.priority, 1);
        assert_eq!(record.attempt, 2);
        assert_eq!(record.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn retry_unknown_task_fails() {
        let facade = test_facade().await;
        let tasks = TaskFacade::new(facade);
        let result = tasks.retry_task("no-such-task").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn history_is_bounded_and_ordered() {
        let facade = test_facade().await;
        let tasks = TaskFacade::new(facade);
        for i in 0..5 {
            tasks
                .add_task("bulk", json!({"i": i}), TaskOptions { tenant_id: Some("acme".to_string()), priority: 0 })
                .await
                .unwrap();
        }
        let history = tasks.history(Some("acme"), 3);
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
