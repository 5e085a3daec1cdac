//! Stale-row cleanup off the request path.
//!
//! # Design Decisions
//! - Hybrid trigger: a request counter for busy deployments, an
//!   elapsed-time check so quiet ones still clean up
//! - One in-progress flag is the only mutual exclusion needed
//! - Counters reset only on success; a failed sweep retries on the
//!   next eligible request instead of waiting a full interval

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock;
use crate::config::schema::CleanupConfig;
use crate::observability::metrics;
use crate::store::SecurityStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted_counters: u64,
    pub deleted_sessions: u64,
}

pub struct CleanupScheduler {
    config: CleanupConfig,
    calls_since_last: AtomicU64,
    /// Milliseconds since epoch of the last successful sweep.
    last_run: AtomicU64,
    in_progress: AtomicBool,
}

impl CleanupScheduler {
    pub fn new(config: CleanupConfig) -> Self {
        Self {
            config,
            calls_since_last: AtomicU64::new(0),
            last_run: AtomicU64::new(clock::unix_millis()),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Count one request and report whether a sweep is due.
    pub fn record_call(&self) -> bool {
        let calls = self.calls_since_last.fetch_add(1, Ordering::Relaxed) + 1;
        if calls >= self.config.interval_calls {
            return true;
        }
        let elapsed_ms = clock::unix_millis().saturating_sub(self.last_run.load(Ordering::Relaxed));
        elapsed_ms >= self.config.interval_secs * 1000
    }

    /// Claim the in-progress flag. Only the winner runs the sweep.
    fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn complete(&self, success: bool) {
        if success {
            self.calls_since_last.store(0, Ordering::Relaxed);
            self.last_run.store(clock::unix_millis(), Ordering::Relaxed);
        }
        self.in_progress.store(false, Ordering::Release);
    }

    /// Fire-and-forget: if a sweep is due and nobody else is running
    /// one, spawn it. The triggering request never waits.
    pub fn maybe_spawn(self: &Arc<Self>, store: Arc<dyn SecurityStore>) {
        if !self.record_call() || !self.try_begin() {
            return;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            match scheduler.run_sweep(&store).await {
                Ok(stats) => {
                    tracing::info!(
                        deleted_counters = stats.deleted_counters,
                        deleted_sessions = stats.deleted_sessions,
                        "Cleanup sweep finished"
                    );
                    metrics::record_cleanup(stats.deleted_counters, stats.deleted_sessions);
                    scheduler.complete(true);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cleanup sweep failed");
                    scheduler.complete(false);
                }
            }
        });
    }

    async fn run_sweep(
        &self,
        store: &Arc<dyn SecurityStore>,
    ) -> Result<CleanupStats, crate::store::StoreError> {
        let counter_horizon =
            clock::unix_millis().saturating_sub(self.config.max_age_secs * 1000);
        let session_horizon = clock::unix_secs().saturating_sub(self.config.max_age_secs);

        let deleted_counters = store.delete_counters_before(counter_horizon).await?;
        let deleted_sessions = store.delete_sessions_expired_before(session_horizon).await?;

        Ok(CleanupStats {
            deleted_counters,
            deleted_sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RateLimitCounter};
    use std::time::Duration;

    fn scheduler(interval_calls: u64, interval_secs: u64) -> Arc<CleanupScheduler> {
        Arc::new(CleanupScheduler::new(CleanupConfig {
            interval_calls,
            interval_secs,
            max_age_secs: 3600,
        }))
    }

    #[test]
    fn test_counter_trigger() {
        let s = scheduler(3, 10_000);
        assert!(!s.record_call());
        assert!(!s.record_call());
        assert!(s.record_call());
    }

    #[test]
    fn test_in_progress_guard_is_exclusive() {
        let s = scheduler(1, 1);
        assert!(s.try_begin());
        assert!(!s.try_begin());
        s.complete(true);
        assert!(s.try_begin());
    }

    #[test]
    fn test_failed_sweep_keeps_counter_elevated() {
        let s = scheduler(3, 10_000);
        s.record_call();
        s.record_call();
        s.record_call();
        assert!(s.try_begin());
        s.complete(false);
        // Counter was not reset, so the very next call is eligible again.
        assert!(s.record_call());
    }

    #[tokio::test]
    async fn test_sweep_deletes_stale_rows() {
        let store = Arc::new(MemoryStore::new());
        let fresh_window = clock::unix_millis();
        store
            .create_counter(RateLimitCounter {
                key: "old".into(),
                window_start: 0,
                requests: 1,
                limit_value: 10,
                endpoint: None,
            })
            .await
            .unwrap();
        store
            .create_counter(RateLimitCounter {
                key: "fresh".into(),
                window_start: fresh_window,
                requests: 1,
                limit_value: 10,
                endpoint: None,
            })
            .await
            .unwrap();

        let s = scheduler(1, 1);
        s.maybe_spawn(store.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.fetch_counter("old", 0).await.unwrap().is_none());
        assert!(store
            .fetch_counter("fresh", fresh_window)
            .await
            .unwrap()
            .is_some());
    }
}
