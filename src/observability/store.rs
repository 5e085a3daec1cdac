//! Bounded in-memory telemetry with live fan-out.
//!
//! Three independent ring buffers (metrics, log lines, rate-limit
//! bucket views) plus a broadcast channel feeding the dashboard. All
//! writes are plain mutex-guarded mutations; nothing here suspends.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::clock;
use crate::security::rate_limit::{RateLimitDecision, RateLimitKey};

/// One completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub duration_ms: u64,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    pub request_id: String,
}

/// One structured log line mirrored into the live feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub request_id: String,
    pub message: String,
    pub meta: serde_json::Value,
    pub timestamp: u64,
}

/// Anonymized view of one rate-limit bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitView {
    pub masked_key: String,
    pub kind: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_secs: u64,
    pub last_activity: u64,
    /// Rolling count of requests seen for this bucket view.
    pub request_count: u64,
}

/// Event pushed to live subscribers after each buffer write.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum LiveEvent {
    Metric(MetricRecord),
    Log(LogRecord),
    RateLimit(RateLimitView),
}

/// Snapshot returned to the polling endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RecentSnapshot {
    pub metrics: Vec<MetricRecord>,
    pub logs: Vec<LogRecord>,
    pub rate_limits: Vec<RateLimitView>,
}

/// Aggregates over a trailing window of the metric buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_requests: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
}

pub struct ObservabilityStore {
    capacity: usize,
    bucket_capacity: usize,
    metrics: Mutex<VecDeque<MetricRecord>>,
    logs: Mutex<VecDeque<LogRecord>>,
    buckets: Mutex<HashMap<String, RateLimitView>>,
    events: broadcast::Sender<LiveEvent>,
}

impl ObservabilityStore {
    pub fn new(capacity: usize, bucket_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            capacity,
            bucket_capacity,
            metrics: Mutex::new(VecDeque::with_capacity(capacity)),
            logs: Mutex::new(VecDeque::with_capacity(capacity)),
            buckets: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to the live feed. Lagging receivers miss events; the
    /// write path never waits for them.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn add_metric(&self, record: MetricRecord) {
        if let Ok(mut buffer) = self.metrics.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(record.clone());
        }
        let _ = self.events.send(LiveEvent::Metric(record));
    }

    pub fn add_log(&self, record: LogRecord) {
        if let Ok(mut buffer) = self.logs.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(record.clone());
        }
        let _ = self.events.send(LiveEvent::Log(record));
    }

    /// Merge a consumption decision into the bucket view for its key.
    /// The key is masked before anything is stored.
    pub fn update_rate_limit(&self, key: &RateLimitKey, decision: &RateLimitDecision) {
        let masked = key.masked_key();
        let view = {
            let Ok(mut buckets) = self.buckets.lock() else {
                return;
            };

            let view = buckets
                .entry(masked.clone())
                .and_modify(|view| {
                    view.limit = decision.limit;
                    view.remaining = decision.remaining;
                    view.reset_epoch_secs = decision.reset_epoch_secs;
                    view.last_activity = clock::unix_millis();
                    view.request_count += 1;
                })
                .or_insert_with(|| RateLimitView {
                    masked_key: masked,
                    kind: key.kind().to_string(),
                    limit: decision.limit,
                    remaining: decision.remaining,
                    reset_epoch_secs: decision.reset_epoch_secs,
                    last_activity: clock::unix_millis(),
                    request_count: 1,
                })
                .clone();

            // Bounded: drop the coldest bucket on overflow.
            if buckets.len() > self.bucket_capacity {
                if let Some(coldest) = buckets
                    .values()
                    .min_by_key(|v| v.last_activity)
                    .map(|v| v.masked_key.clone())
                {
                    buckets.remove(&coldest);
                }
            }

            view
        };
        let _ = self.events.send(LiveEvent::RateLimit(view));
    }

    /// Record the full telemetry of one completed request in a single
    /// call: metric, mirrored log line, and rate-limit bucket state.
    pub fn record_from_context(
        &self,
        metric: MetricRecord,
        log: LogRecord,
        rate: Option<(&RateLimitKey, &RateLimitDecision)>,
    ) {
        self.add_metric(metric);
        self.add_log(log);
        if let Some((key, decision)) = rate {
            self.update_rate_limit(key, decision);
        }
    }

    /// Last `limit` entries of each buffer, newest last.
    pub fn get_recent(&self, limit: usize) -> RecentSnapshot {
        let metrics = self
            .metrics
            .lock()
            .map(|b| b.iter().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default();
        let logs = self
            .logs
            .lock()
            .map(|b| b.iter().rev().take(limit).rev().cloned().collect())
            .unwrap_or_default();
        let mut rate_limits: Vec<RateLimitView> = self
            .buckets
            .lock()
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        rate_limits.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        rate_limits.truncate(limit);

        RecentSnapshot {
            metrics,
            logs,
            rate_limits,
        }
    }

    /// Success/error rates and duration percentiles over a trailing
    /// window, computed straight from the metric buffer.
    pub fn get_stats(&self, window_minutes: u64) -> StatsSummary {
        let cutoff = clock::unix_millis().saturating_sub(window_minutes * 60 * 1000);
        let mut durations: Vec<u64> = Vec::new();
        let mut total = 0usize;
        let mut errors = 0usize;
        let mut duration_sum = 0u64;

        if let Ok(buffer) = self.metrics.lock() {
            for record in buffer.iter().filter(|m| m.timestamp >= cutoff) {
                total += 1;
                if record.status >= 400 {
                    errors += 1;
                }
                duration_sum += record.duration_ms;
                durations.push(record.duration_ms);
            }
        }

        if total == 0 {
            return StatsSummary::default();
        }

        durations.sort_unstable();
        let percentile = |p: f64| -> u64 {
            let index = ((durations.len() as f64) * p) as usize;
            durations[index.min(durations.len() - 1)]
        };

        StatsSummary {
            total_requests: total,
            success_rate: (total - errors) as f64 / total as f64,
            error_rate: errors as f64 / total as f64,
            avg_duration_ms: duration_sum as f64 / total as f64,
            p95_duration_ms: percentile(0.95),
            p99_duration_ms: percentile(0.99),
        }
    }
}
