//! Monitoring Core.
//!
//! Counters are kept in memory, bucketed by `(tenant_id, bucket_index)`
//! where `bucket_index = floor(now / bucket_seconds)`. Bucket updates are
//! atomic adds and the bucket map uses fine-grained per-key locking —
//! `dashmap::DashMap` gives both directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const MAX_QUEUE_SAMPLES_PER_BUCKET: usize = 100;
const MAX_ERROR_SAMPLES_PER_BUCKET: usize = 100;
const DEFAULT_BUCKET_SECONDS: i64 = 60;
const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
/// Window a tenant's throughput counter resets after.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome tag for a single processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Handler invocation succeeded.
    Success,
    /// Handler invocation failed.
    Failed,
    /// This record represents a retry attempt.
    Retry,
}

/// A queue-depth sample recorded against a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSample {
    /// Queue this sample was recorded for.
    pub queue_name: String,
    /// Observed queue depth.
    pub depth: u64,
    /// When the sample was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// An error sample recorded against a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSample {
    /// Error message text.
    pub message: String,
    /// Free-form context (component, operation, ...).
    pub context: String,
    /// When the sample was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A fixed-width time bucket of aggregated counters for one tenant.
#[derive(Debug, Default)]
pub struct MetricsBucket {
    messages_processed: AtomicU64,
    total_processing_time_ms: AtomicU64,
    total_bytes: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    retry_count: AtomicU64,
    queue_samples: parking_lot::Mutex<VecDeque<QueueSample>>,
    error_samples: parking_lot::Mutex<VecDeque<ErrorSample>>,
}

/// A read-only snapshot of a `MetricsBucket`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketSnapshot {
    /// Count of messages processed in this bucket.
    pub messages_processed: u64,
    /// Sum of processing time across all messages in this bucket.
    pub total_processing_time_ms: u64,
    /// Sum of payload bytes across all messages in this bucket.
    pub total_bytes: u64,
    /// Count of successful processing outcomes.
    pub success_count: u64,
    /// Count of failed processing outcomes.
    pub failure_count: u64,
    /// Count of retry outcomes.
    pub retry_count: u64,
}

impl MetricsBucket {
    fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            total_processing_time_ms: self.total_processing_time_ms.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            retry_count: self.retry_count.load(Ordering::Relaxed),
        }
    }
}

/// A point on a trend series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Bucket index this point summarizes.
    pub bucket_index: i64,
    /// The metric value at this point.
    pub value: f64,
}

/// Direction a metric is trending, from oldest-vs-newest comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    /// Recent samples are meaningfully better than the baseline.
    Improving,
    /// Recent samples are within the stable threshold of the baseline.
    Stable,
    /// Recent samples are meaningfully worse than the baseline.
    Degrading,
}

/// A full trend series for one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSeries {
    /// Metric name (`throughput`, `avg_processing_time`, `error_rate`).
    pub metric: String,
    /// Sampled points across the window.
    pub points: Vec<TrendPoint>,
    /// Overall direction.
    pub direction: TrendDirection,
}

/// A derived realtime snapshot over a window of buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    /// Total messages processed in the window.
    pub count: u64,
    /// Average processing time in milliseconds.
    pub avg_processing_time_ms: f64,
    /// Messages processed per second.
    pub throughput: f64,
    /// Fraction of processed messages that failed.
    pub error_rate: f64,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Threshold exceeded by up to 20%.
    Low,
    /// Threshold exceeded by up to 50%.
    Medium,
    /// Threshold exceeded by up to 100%.
    High,
    /// Threshold exceeded by more than 100%.
    Critical,
}

/// Thresholds checked by `alerts`.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Max acceptable throughput (messages/sec) before alerting.
    pub max_throughput: Option<f64>,
    /// Max acceptable average latency (ms) before alerting.
    pub max_latency_ms: Option<f64>,
    /// Max acceptable error rate (0.0..1.0) before alerting.
    pub max_error_rate: Option<f64>,
    /// Max acceptable queue depth before alerting.
    pub max_queue_depth: Option<u64>,
}

/// A single breached threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Which metric breached its threshold.
    pub metric: String,
    /// Observed value.
    pub observed: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// Derived severity.
    pub severity: AlertSeverity,
}

/// Full alert report for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertReport {
    /// Whether any alert is active.
    pub is_healthy: bool,
    /// The most severe active alert's severity, if any.
    pub severity: Option<AlertSeverity>,
    /// Every breached threshold.
    pub alerts: Vec<Alert>,
}

fn severity_for_ratio(ratio: f64) -> AlertSeverity {
    if ratio > 2.0 {
        AlertSeverity::Critical
    } else if ratio > 1.5 {
        AlertSeverity::High
    } else if ratio > 1.2 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

/// A per-tenant sliding counter used to derive throughput independent of the
/// bucket width, so a burst that lands inside a single bucket still reports
/// an accurate rate instead of being diluted by the bucket's full duration.
struct ThroughputWindow {
    count: AtomicU64,
    window_start: RwLock<Instant>,
}

impl ThroughputWindow {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            window_start: RwLock::new(Instant::now()),
        }
    }

    fn record(&self) {
        if self.window_start.read().elapsed() > THROUGHPUT_WINDOW {
            let mut start = self.window_start.write();
            if start.elapsed() > THROUGHPUT_WINDOW {
                self.count.store(0, Ordering::Relaxed);
                *start = Instant::now();
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn rate(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        let elapsed = self.window_start.read().elapsed().as_secs_f64();
        count as f64 / elapsed.max(1.0).min(THROUGHPUT_WINDOW.as_secs_f64())
    }
}

/// Records processed/queue/error metrics and exposes realtime, trend, and
/// alert views over them.
pub struct MonitoringCore {
    buckets: DashMap<(String, i64), MetricsBucket>,
    throughput_windows: DashMap<String, ThroughputWindow>,
    bucket_seconds: i64,
    retention: Duration,
}

impl Default for MonitoringCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringCore {
    /// Build a monitoring core with the default 60-second bucket width and
    /// 7-day retention.
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            throughput_windows: DashMap::new(),
            bucket_seconds: DEFAULT_BUCKET_SECONDS,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Override the bucket width.
    pub fn bucket_seconds(mut self, seconds: i64) -> Self {
        self.bucket_seconds = seconds.max(1);
        self
    }

    /// Override the retention window.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn bucket_index_now(&self) -> i64 {
        Utc::now().timestamp() / self.bucket_seconds
    }

    fn tenant_key(tenant: &str) -> String {
        tenant.to_string()
    }

    /// Record a processed message's outcome.
    pub fn record_processed(
        &self,
        _msg_id: &str,
        processing_ms: u64,
        size_bytes: u64,
        status: ProcessStatus,
        tenant: &str,
    ) {
        let idx = self.bucket_index_now();
        let bucket = self
            .buckets
            .entry((Self::tenant_key(tenant), idx))
            .or_default();
        bucket.messages_processed.fetch_add(1, Ordering::Relaxed);
        bucket
            .total_processing_time_ms
            .fetch_add(processing_ms, Ordering::Relaxed);
        bucket.total_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        match status {
            ProcessStatus::Success => bucket.success_count.fetch_add(1, Ordering::Relaxed),
            ProcessStatus::Failed => bucket.failure_count.fetch_add(1, Ordering::Relaxed),
            ProcessStatus::Retry => bucket.retry_count.fetch_add(1, Ordering::Relaxed),
        };
        self.throughput_windows
            .entry(Self::tenant_key(tenant))
            .or_insert_with(ThroughputWindow::new)
            .record();
    }

    /// Messages-per-second over the tenant's current sliding window, floored
    /// at a 1-second denominator so a burst of near-instantaneous messages
    /// reports a spike instead of being averaged away.
    fn recent_throughput(&self, tenant: &str) -> f64 {
        self.throughput_windows
            .get(tenant)
            .map(|w| w.rate())
            .unwrap_or(0.0)
    }

    /// Record a queue-depth sample, capped at 100 recent samples per bucket.
    pub fn record_queue(&self, queue_name: &str, depth: u64, tenant: &str) {
        let idx = self.bucket_index_now();
        let bucket = self
            .buckets
            .entry((Self::tenant_key(tenant), idx))
            .or_default();
        let mut samples = bucket.queue_samples.lock();
        samples.push_back(QueueSample {
            queue_name: queue_name.to_string(),
            depth,
            recorded_at: Utc::now(),
        });
        while samples.len() > MAX_QUEUE_SAMPLES_PER_BUCKET {
            samples.pop_front();
        }
    }

    /// Record an error sample, capped at 100 recent samples per bucket.
    pub fn record_error(&self, error: &str, context: &str, tenant: &str) {
        let idx = self.bucket_index_now();
        let bucket = self
            .buckets
            .entry((Self::tenant_key(tenant), idx))
            .or_default();
        let mut samples = bucket.error_samples.lock();
        samples.push_back(ErrorSample {
            message: error.to_string(),
            context: context.to_string(),
            recorded_at: Utc::now(),
        });
        while samples.len() > MAX_ERROR_SAMPLES_PER_BUCKET {
            samples.pop_front();
        }
    }

    fn buckets_in_window(&self, tenant: &str, from_idx: i64, to_idx: i64) -> Vec<BucketSnapshot> {
        (from_idx..=to_idx)
            .filter_map(|idx| {
                self.buckets
                    .get(&(tenant.to_string(), idx))
                    .map(|b| b.snapshot())
            })
            .collect()
    }

    /// Merge buckets over the last `minutes` and compute derived values.
    pub fn realtime(&self, tenant: &str, minutes: i64) -> RealtimeSnapshot {
        let to_idx = self.bucket_index_now();
        let window_seconds = (minutes * 60).max(self.bucket_seconds);
        let from_idx = to_idx - (window_seconds / self.bucket_seconds);
        let snapshots = self.buckets_in_window(tenant, from_idx, to_idx);

        let count: u64 = snapshots.iter().map(|s| s.messages_processed).sum();
        let total_time: u64 = snapshots.iter().map(|s| s.total_processing_time_ms).sum();
        let failures: u64 = snapshots.iter().map(|s| s.failure_count).sum();

        let avg_processing_time_ms = if count > 0 {
            total_time as f64 / count as f64
        } else {
            0.0
        };
        let throughput = count as f64 / window_seconds as f64;
        let error_rate = if count > 0 {
            failures as f64 / count as f64
        } else {
            0.0
        };

        RealtimeSnapshot {
            count,
            avg_processing_time_ms,
            throughput,
            error_rate,
        }
    }

    /// Sample `metric_fn` at `granularity_min` increments over `hours` and
    /// derive a trend direction (last 3 points vs. the older average, with a
    /// 10% stable band).
    fn trend_for<F>(&self, tenant: &str, hours: i64, granularity_min: i64, metric_fn: F) -> Vec<TrendPoint>
    where
        F: Fn(&BucketSnapshot) -> f64,
    {
        let to_idx = self.bucket_index_now();
        let step = ((granularity_min * 60) / self.bucket_seconds).max(1);
        let span = ((hours * 3600) / self.bucket_seconds).max(step);
        let from_idx = to_idx - span;

        let mut points = Vec::new();
        let mut idx = from_idx;
        while idx <= to_idx {
            let slot_end = (idx + step - 1).min(to_idx);
            let snapshots = self.buckets_in_window(tenant, idx, slot_end);
            let value = if snapshots.is_empty() {
                0.0
            } else {
                snapshots.iter().map(&metric_fn).sum::<f64>() / snapshots.len() as f64
            };
            points.push(TrendPoint { bucket_index: idx, value });
            idx += step;
        }
        points
    }

    fn direction_from_points(points: &[TrendPoint], lower_is_better: bool) -> TrendDirection {
        if points.len() < 4 {
            return TrendDirection::Stable;
        }
        let split = points.len() - 3;
        let recent: f64 = points[split..].iter().map(|p| p.value).sum::<f64>() / 3.0;
        let baseline: f64 = points[..split].iter().map(|p| p.value).sum::<f64>() / split as f64;
        if baseline.abs() < f64::EPSILON {
            return TrendDirection::Stable;
        }
        let delta = (recent - baseline) / baseline;
        let improved = if lower_is_better { delta < -0.1 } else { delta > 0.1 };
        let degraded = if lower_is_better { delta > 0.1 } else { delta < -0.1 };
        if improved {
            TrendDirection::Improving
        } else if degraded {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        }
    }

    /// Build trend series for throughput, average processing time, and
    /// error rate over `hours`, sampled every `granularity_min`.
    pub fn trends(&self, tenant: &str, hours: i64, granularity_min: i64) -> Vec<TrendSeries> {
        let throughput_points = self.trend_for(tenant, hours, granularity_min, |s| {
            s.messages_processed as f64
        });
        let latency_points = self.trend_for(tenant, hours, granularity_min, |s| {
            if s.messages_processed > 0 {
                s.total_processing_time_ms as f64 / s.messages_processed as f64
            } else {
                0.0
            }
        });
        let error_rate_points = self.trend_for(tenant, hours, granularity_min, |s| {
            if s.messages_processed > 0 {
                s.failure_count as f64 / s.messages_processed as f64
            } else {
                0.0
            }
        });

        vec![
            TrendSeries {
                direction: Self::direction_from_points(&throughput_points, false),
                metric: "throughput".to_string(),
                points: throughput_points,
            },
            TrendSeries {
                direction: Self::direction_from_points(&latency_points, true),
                metric: "avg_processing_time".to_string(),
                points: latency_points,
            },
            TrendSeries {
                direction: Self::direction_from_points(&error_rate_points, true),
                metric: "error_rate".to_string(),
                points: error_rate_points,
            },
        ]
    }

    fn latest_queue_depth(&self, tenant: &str) -> Option<u64> {
        let idx = self.bucket_index_now();
        self.buckets
            .get(&(tenant.to_string(), idx))
            .and_then(|b| b.queue_samples.lock().back().map(|s| s.depth))
    }

    /// Evaluate `thresholds` against a 5-minute realtime snapshot.
    pub fn alerts(&self, tenant: &str, thresholds: &AlertThresholds) -> AlertReport {
        let snapshot = self.realtime(tenant, 5);
        let mut alerts = Vec::new();

        if let Some(max) = thresholds.max_throughput {
            let throughput = self.recent_throughput(tenant);
            if throughput > max {
                alerts.push(Alert {
                    metric: "throughput".to_string(),
                    observed: throughput,
                    threshold: max,
                    severity: severity_for_ratio(throughput / max),
                });
            }
        }
        if let Some(max) = thresholds.max_latency_ms {
            if snapshot.avg_processing_time_ms > max {
                alerts.push(Alert {
                    metric: "latency".to_string(),
                    observed: snapshot.avg_processing_time_ms,
                    threshold: max,
                    severity: severity_for_ratio(snapshot.avg_processing_time_ms / max),
                });
            }
        }
        if let Some(max) = thresholds.max_error_rate {
            if snapshot.error_rate > max {
                alerts.push(Alert {
                    metric: "error_rate".to_string(),
                    observed: snapshot.error_rate,
                    threshold: max,
                    severity: severity_for_ratio(snapshot.error_rate / max.max(f64::EPSILON)),
                });
            }
        }
        if let Some(max) = thresholds.max_queue_depth {
            if let Some(depth) = self.latest_queue_depth(tenant) {
                if depth > max {
                    alerts.push(Alert {
                        metric: "queue_depth".to_string(),
                        observed: depth as f64,
                        threshold: max as f64,
                        severity: severity_for_ratio(depth as f64 / max as f64),
                    });
                }
            }
        }

        let severity = alerts.iter().map(|a| a.severity).max();
        AlertReport {
            is_healthy: alerts.is_empty(),
            severity,
            alerts,
        }
    }

    /// Evict buckets older than the retention window.
    pub fn cleanup(&self, tenant: &str) -> usize {
        let cutoff_idx = self.bucket_index_now() - (self.retention.as_secs() as i64 / self.bucket_seconds);
        let to_remove: Vec<(String, i64)> = self
            .buckets
            .iter()
            .filter(|entry| entry.key().0 == tenant && entry.key().1 < cutoff_idx)
            .map(|entry| entry.key().clone())
            .collect();
        let removed = to_remove.len();
        for key in to_remove {
            self.buckets.remove(&key);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_computes_derived_values() {
        let core = MonitoringCore::new();
        for _ in 0..10 {
            core.record_processed("m", 100, 10, ProcessStatus::Success, "acme");
        }
        core.record_processed("m", 100, 10, ProcessStatus::Failed, "acme");
        let snapshot = core.realtime("acme", 5);
        assert_eq!(snapshot.count, 11);
        assert!((snapshot.avg_processing_time_ms - 100.0).abs() < f64::EPSILON);
        assert!(snapshot.error_rate > 0.0);
    }

    #[test]
    fn alerts_trigger_on_throughput_breach() {
        let core = MonitoringCore::new();
        for _ in 0..2000 {
            core.record_processed("m", 1, 1, ProcessStatus::Success, "acme");
        }
        let thresholds = AlertThresholds {
            max_throughput: Some(1000.0),
            max_latency_ms: Some(5000.0),
            max_error_rate: Some(0.05),
            max_queue_depth: None,
        };
        let report = core.alerts("acme", &thresholds);
        assert!(!report.is_healthy);
        assert!(report.alerts.iter().any(|a| a.metric == "throughput"));
    }

    #[test]
    fn monotonic_throughput_alert_across_lower_thresholds() {
        let core = MonitoringCore::new();
        for _ in 0..2000 {
            core.record_processed("m", 1, 1, ProcessStatus::Success, "acme");
        }
        let high = AlertThresholds {
            max_throughput: Some(1500.0),
            max_latency_ms: None,
            max_error_rate: None,
            max_queue_depth: None,
        };
        let low = AlertThresholds {
            max_throughput: Some(500.0),
            max_latency_ms: None,
            max_error_rate: None,
            max_queue_depth: None,
        };
        let high_report = core.alerts("acme", &high);
        let low_report = core.alerts("acme", &low);
        assert!(high_report.alerts.iter().any(|a| a.metric == "throughput"));
        assert!(low_report.alerts.iter().any(|a| a.metric == "throughput"));
    }

    #[test]
    fn cleanup_evicts_only_old_buckets() {
        let core = MonitoringCore::new().retention(Duration::from_secs(60));
        core.record_processed("m", 1, 1, ProcessStatus::Success, "acme");
        let removed = core.cleanup("acme");
        assert_eq!(removed, 0, "current bucket must survive its own retention window");
    }
}
