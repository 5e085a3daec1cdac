//! Progressive-backoff brute force tracking per source address.
//!
//! # State Transitions
//! ```text
//! failure → count += 1 → highest met threshold sets blocked_until
//! failure while blocked → CRITICAL, count unchanged
//! success → row deleted
//! ```

use std::sync::Arc;

use crate::clock;
use crate::config::schema::BackoffStep;
use crate::store::{BruteForceAttempt, SecurityStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Snapshot of an address's standing after a recorded failure.
#[derive(Debug, Clone)]
pub struct FailureAnalysis {
    pub failure_count: u32,
    pub risk_level: RiskLevel,
    pub is_suspicious: bool,
    /// Seconds since epoch, set when a backoff threshold is met.
    pub blocked_until: Option<u64>,
    /// The failure arrived while an earlier block was still active.
    pub already_blocked: bool,
}

pub struct BruteForceGuard {
    store: Arc<dyn SecurityStore>,
    /// Ascending (failure threshold, block minutes) steps.
    steps: Vec<BackoffStep>,
}

impl BruteForceGuard {
    pub fn new(store: Arc<dyn SecurityStore>, steps: Vec<BackoffStep>) -> Self {
        Self { store, steps }
    }

    fn lowest_threshold(&self) -> u32 {
        self.steps.first().map(|s| s.failures).unwrap_or(3)
    }

    fn highest_threshold(&self) -> u32 {
        self.steps.last().map(|s| s.failures).unwrap_or(20)
    }

    fn risk_for(&self, count: u32) -> RiskLevel {
        if count < self.lowest_threshold() {
            RiskLevel::Low
        } else if count < 10 {
            RiskLevel::Medium
        } else if count < self.highest_threshold() {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    /// Record one authentication failure for an address.
    ///
    /// A failure landing during an active block reports CRITICAL
    /// without touching the counter: the eventual backoff stays
    /// proportional to distinct escalation events, not retry spam, and
    /// the audit trail still records every attempt.
    pub async fn record_failure(&self, ip: &str) -> FailureAnalysis {
        let now = clock::unix_secs();
        let existing = match self.store.fetch_attempt(ip).await {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "Attempt lookup failed");
                return FailureAnalysis {
                    failure_count: 0,
                    risk_level: RiskLevel::Low,
                    is_suspicious: false,
                    blocked_until: None,
                    already_blocked: false,
                };
            }
        };

        if let Some(row) = &existing {
            if row.blocked_until.is_some_and(|until| until > now) {
                return FailureAnalysis {
                    failure_count: row.failure_count,
                    risk_level: RiskLevel::Critical,
                    is_suspicious: true,
                    blocked_until: row.blocked_until,
                    already_blocked: true,
                };
            }
        }

        let (count, first_failure_at) = match &existing {
            Some(row) => (row.failure_count + 1, row.first_failure_at),
            None => (1, now),
        };

        // Highest threshold met wins.
        let blocked_until = self
            .steps
            .iter()
            .rev()
            .find(|step| count >= step.failures)
            .map(|step| now + step.block_minutes * 60);

        let updated = BruteForceAttempt {
            ip_address: ip.to_string(),
            failure_count: count,
            first_failure_at,
            last_failure_at: now,
            blocked_until,
        };
        if let Err(e) = self.store.upsert_attempt(updated).await {
            tracing::error!(ip = %ip, error = %e, "Attempt upsert failed");
        }

        let analysis = FailureAnalysis {
            failure_count: count,
            risk_level: self.risk_for(count),
            is_suspicious: count >= self.lowest_threshold(),
            blocked_until,
            already_blocked: false,
        };

        if analysis.blocked_until.is_some() {
            tracing::warn!(
                ip = %ip,
                failures = count,
                risk = analysis.risk_level.as_str(),
                "Source address blocked"
            );
        }

        analysis
    }

    /// Cheap existence + timestamp check, consulted before any session
    /// work so a blocked address short-circuits the whole pipeline.
    pub async fn is_blocked(&self, ip: &str) -> Option<u64> {
        match self.store.fetch_attempt(ip).await {
            Ok(Some(row)) => row
                .blocked_until
                .filter(|until| *until > clock::unix_secs()),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "Block check failed, allowing");
                None
            }
        }
    }

    /// Forget an address entirely. Called on successful authentication.
    pub async fn clear(&self, ip: &str) -> bool {
        match self.store.delete_attempt(ip).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "Attempt clear failed");
                false
            }
        }
    }
}
