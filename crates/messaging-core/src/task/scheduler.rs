//! Scheduler — the single-writer dispatcher that turns
//! `schedule_task` entries into `add_task` submissions.
//!
//! The dispatcher does not invoke user handlers directly, only enqueues:
//! `tick` only ever calls [`super::TaskFacade::add_task`].

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::error::MessagingResult;

use super::{TaskFacade, TaskOptions};

/// How a scheduled task's `next_run_at` is computed and advanced.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Due immediately, once.
    Immediate,
    /// Due once, `delay_ms` after scheduling.
    Delay {
        /// Milliseconds until the single run.
        delay_ms: i64,
    },
    /// Due repeatedly, every `interval_ms`.
    Interval {
        /// Milliseconds between runs.
        interval_ms: i64,
    },
    /// Due on each cron tick, in `timezone`, bounded by `start_date`/`end_date`.
    Cron {
        /// A five-field `minute hour day-of-month month day-of-week` expression.
        expr: String,
        /// Offset the expression's fields are evaluated in.
        timezone: FixedOffset,
        /// The schedule has no effect before this instant, if set.
        start_date: Option<DateTime<Utc>>,
        /// The schedule is removed once passed, if set.
        end_date: Option<DateTime<Utc>>,
    },
}

/// A registered scheduled task.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// Stable schedule id.
    pub id: String,
    /// Task name passed through to `add_task`.
    pub name: String,
    /// Job payload passed through to `add_task`.
    pub data: Value,
    /// The schedule driving `next_run_at`.
    pub schedule: Schedule,
    /// Owning tenant, if any.
    pub tenant_id: Option<String>,
    /// When this entry is next due.
    pub next_run_at: DateTime<Utc>,
}

impl ScheduledTask {
    fn is_one_shot(&self) -> bool {
        matches!(self.schedule, Schedule::Immediate | Schedule::Delay { .. })
    }

    fn is_past_end_date(&self, now: DateTime<Utc>) -> bool {
        match &self.schedule {
            Schedule::Cron { end_date: Some(end), .. } => now > *end,
            _ => false,
        }
    }

    fn advance(&mut self, now: DateTime<Utc>) -> bool {
        match &self.schedule {
            Schedule::Immediate | Schedule::Delay { .. } => false,
            Schedule::Interval { interval_ms } => {
                self.next_run_at = now + chrono::Duration::milliseconds(*interval_ms);
                true
            }
            Schedule::Cron { expr, timezone, end_date, .. } => match next_cron_tick(expr, *timezone, now) {
                Some(next) => {
                    if end_date.is_some_and(|end| next > end) {
                        false
                    } else {
                        self.next_run_at = next;
                        true
                    }
                }
                None => {
                    warn!(schedule_id = %self.id, expr = %expr, "cron expression matched no future tick");
                    false
                }
            },
        }
    }
}

/// Compute the initial `next_run_at` for a freshly registered schedule.
pub fn initial_next_run_at(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Immediate => Some(now),
        Schedule::Delay { delay_ms } => Some(now + chrono::Duration::milliseconds(*delay_ms)),
        Schedule::Interval { interval_ms } => Some(now + chrono::Duration::milliseconds(*interval_ms)),
        Schedule::Cron { expr, timezone, start_date, end_date } => {
            let after = start_date.map(|s| s.max(now)).unwrap_or(now);
            let next = next_cron_tick(expr, *timezone, after)?;
            if end_date.is_some_and(|end| next > end) {
                None
            } else {
                Some(next)
            }
        }
    }
}

/// Single-writer dispatcher driving registered `ScheduledTask`s onto a
/// `TaskFacade`.
pub struct Scheduler<C: Cache> {
    tasks: Arc<TaskFacade<C>>,
    entries: DashMap<String, ScheduledTask>,
}

impl<C: Cache + 'static> Scheduler<C> {
    /// Build a scheduler dispatching onto `tasks`.
    pub fn new(tasks: Arc<TaskFacade<C>>) -> Self {
        Self { tasks, entries: DashMap::new() }
    }

    /// `schedule_task(name, data, schedule)`: register a new entry and
    /// return its id, or `None` if the schedule has no future occurrence
    /// (e.g. a cron expression entirely before its own `end_date`).
    pub fn schedule_task(
        &self,
        name: impl Into<String>,
        data: Value,
        schedule: Schedule,
        tenant_id: Option<String>,
    ) -> Option<String> {
        let now = Utc::now();
        let next_run_at = initial_next_run_at(&schedule, now)?;
        let id = format!("sched_{}", uuid::Uuid::new_v4());
        self.entries.insert(
            id.clone(),
            ScheduledTask { id: id.clone(), name: name.into(), data, schedule, tenant_id, next_run_at },
        );
        Some(id)
    }

    /// `cancel_scheduled_task(task_id)`: remove the entry, if present.
    pub fn cancel_scheduled_task(&self, schedule_id: &str) -> bool {
        let removed = self.entries.remove(schedule_id).is_some();
        if removed {
            info!(schedule_id = %schedule_id, "scheduled task cancelled");
        }
        removed
    }

    /// `get_scheduled_tasks`: enumerate active entries.
    pub fn get_scheduled_tasks(&self) -> Vec<ScheduledTask> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Run one dispatcher tick: submit every due entry via `add_task`, then
    /// advance or remove it.
    pub async fn tick(&self) -> MessagingResult<usize> {
        let now = Utc::now();
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.next_run_at <= now)
            .map(|e| e.id.clone())
            .collect();

        let mut dispatched = 0;
        for id in due {
            let Some(entry) = self.entries.get_mut(&id) else { continue };
            let task = entry.value().clone();
            drop(entry);

            self.tasks
                .add_task(
                    &task.name,
                    task.data.clone(),
                    TaskOptions { tenant_id: task.tenant_id.clone(), priority: 0 },
                )
                .await?;
            dispatched += 1;

            if task.is_past_end_date(now) || task.is_one_shot() {
                self.entries.remove(&id);
                continue;
            }
            if let Some(mut entry) = self.entries.get_mut(&id) {
                if !entry.advance(now) {
                    drop(entry);
                    self.entries.remove(&id);
                }
            }
        }
        Ok(dispatched)
    }
}

/// A single cron field: `*`, `*/step`, a comma list of numbers, or a
/// `start-end` range.
fn field_matches(field: &str, value: u32) -> bool {
    for part in field.split(',') {
        if part == "*" {
            return true;
        }
        if let Some(step_expr) = part.strip_prefix("*/") {
            if let Ok(step) = step_expr.parse::<u32>() {
                if step > 0 && value % step == 0 {
                    return true;
                }
            }
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                if (lo..=hi).contains(&value) {
                    return true;
                }
            }
            continue;
        }
        if let Ok(exact) = part.parse::<u32>() {
            if exact == value {
                return true;
            }
        }
    }
    false
}

/// Minutes scanned looking for the next matching tick before giving up.
const CRON_SCAN_LIMIT_MINUTES: i64 = 2 * 366 * 24 * 60;

/// Find the first instant strictly after `after` matching the five-field
/// `minute hour day-of-month month day-of-week` expression `expr`, evaluated
/// in `timezone`.
pub fn next_cron_tick(expr: &str, timezone: FixedOffset, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        warn!(expr = %expr, "cron expression must have 5 fields");
        return None;
    }
    let (minute_f, hour_f, dom_f, month_f, dow_f) = (fields[0], fields[1], fields[2], fields[3], fields[4]);

    use chrono::{Datelike, TimeZone, Timelike};
    let local = after.with_timezone(&timezone);
    let mut candidate =
        local.date_naive().and_hms_opt(local.hour(), local.minute(), 0)? + chrono::Duration::minutes(1);

    for _ in 0..CRON_SCAN_LIMIT_MINUTES {
        let weekday = candidate.weekday().num_days_from_sunday();
        if field_matches(minute_f, candidate.minute())
            && field_matches(hour_f, candidate.hour())
            && field_matches(dom_f, candidate.day())
            && field_matches(month_f, candidate.month())
            && field_matches(dow_f, weekday)
        {
            let with_offset = timezone.from_local_datetime(&candidate).single()?;
            return Some(with_offset.with_timezone(&Utc));
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterType, MemoryAdapter};
    use crate::cache::MemoryCache;
    use crate::facade::{AdapterRegistry, MessagingFacade};
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    async fn test_scheduler() -> Scheduler<MemoryCache> {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.connect().await.unwrap();
        assert_eq!(adapter.adapter_type(), AdapterType::Memory);
        let registry = AdapterRegistry::new("memory").register("memory", adapter);
        let facade =
            Arc::new(MessagingFacade::builder(Arc::new(MemoryCache::new()), "hl8:messaging:", registry).build());
        Scheduler::new(Arc::new(TaskFacade::new(facade)))
    }

    #[test]
    fn field_matches_star_step_range_list() {
        assert!(field_matches("*", 5));
        assert!(field_matches("*/15", 30));
        assert!(!field_matches("*/15", 31));
        assert!(field_matches("1-5", 3));
        assert!(!field_matches("1-5", 6));
        assert!(field_matches("1,3,5", 3));
        assert!(!field_matches("1,3,5", 4));
    }

    #[tokio::test]
    async fn immediate_schedule_is_due_now() {
        let scheduler = test_scheduler().await;
        let id = scheduler
            .schedule_task("ping", json!({}), Schedule::Immediate, None)
            .unwrap();
        let dispatched = scheduler.tick().await.unwrap();
        assert_eq!(dispatched, 1);
        assert!(scheduler.entries.get(&id).is_none());
    }

    #[tokio::test]
    async fn interval_schedule_reschedules_after_dispatch() {
        let scheduler = test_scheduler().await;
        scheduler
            .schedule_task("heartbeat", json!({}), Schedule::Interval { interval_ms: 60_000 }, None)
            .unwrap();
        let dispatched = scheduler.tick().await.unwrap();
        assert_eq!(dispatched, 1);
        assert_eq!(scheduler.get_scheduled_tasks().len(), 1);
        assert!(scheduler.get_scheduled_tasks()[0].next_run_at > Utc::now());
    }

    #[tokio::test]
    async fn cancel_scheduled_task_removes_entry() {
        let scheduler = test_scheduler().await;
        let id = scheduler
            .schedule_task("heartbeat", json!({}), Schedule::Interval { interval_ms: 60_000 }, None)
            .unwrap();
        assert!(scheduler.cancel_scheduled_task(&id));
        assert!(scheduler.get_scheduled_tasks().is_empty());
    }

    #[test]
    fn next_cron_tick_every_five_minutes() {
        let after = DateTime::parse_from_rfc3339("2026-01-01T00:02:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_cron_tick("*/5 * * * *", FixedOffset::east_opt(0).unwrap(), after).unwrap();
        assert_eq!(next.minute(), 5);
        assert_eq!(next.hour(), 0);
    }

    #[test]
    fn next_cron_tick_respects_day_of_week() {
        // 2026-01-01 is a Thursday; next Monday 09:00 should land on 2026-01-05.
        let after = DateTime::parse_from_rfc3339("2026-01-01T00:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_cron_tick("0 9 * * 1", FixedOffset::east_opt(0).unwrap(), after).unwrap();
        assert_eq!(next.day(), 5);
        assert_eq!(next.hour(), 9);
    }
}
