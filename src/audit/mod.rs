//! Durable security-event trail.
//!
//! # Data Flow
//! ```text
//! log / log_auth / log_security
//!     → bounded mpsc queue (full queue drops, never blocks a request)
//!     → writer task → SecurityStore.append_audit
//!     → on shutdown: drain remaining entries, then exit
//! ```
//!
//! # Design Decisions
//! - Audit failures degrade to a local error log and a `false` return;
//!   they never abort the request they describe
//! - failed_login events drive the brute-force guard here, so every
//!   caller gets escalation for free
//! - The severity of the process log line always matches the risk level
//!   written durably

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::clock;
use crate::security::brute_force::{BruteForceGuard, FailureAnalysis, RiskLevel};
use crate::store::{AuditEntry, SecurityStore};

/// Auth-domain actions.
pub mod actions {
    pub const LOGIN: &str = "auth.login";
    pub const LOGOUT: &str = "auth.logout";
    pub const FAILED_LOGIN: &str = "auth.failed_login";
    pub const TOKEN_REFRESH: &str = "auth.token_refresh";
    pub const SESSION_REVOKED: &str = "auth.session_revoked";

    pub const RATE_LIMIT_EXCEEDED: &str = "security.rate_limit_exceeded";
    pub const SUSPICIOUS_ACTIVITY: &str = "security.suspicious_activity";
    pub const BRUTE_FORCE_DETECTED: &str = "security.brute_force_detected";
}

/// Request-scoped fields attached to every entry.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// An auth-domain event before enrichment.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub action: &'static str,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub success: bool,
    pub details: serde_json::Value,
}

#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEntry>,
    brute_force: Arc<BruteForceGuard>,
}

impl AuditLogger {
    /// Create the logger and spawn its writer task. The task drains
    /// the queue on shutdown before exiting.
    pub fn spawn(
        store: Arc<dyn SecurityStore>,
        brute_force: Arc<BruteForceGuard>,
        queue_capacity: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(queue_capacity);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    entry = rx.recv() => {
                        match entry {
                            Some(entry) => write_entry(&store, entry).await,
                            None => break,
                        }
                    }
                    _ = shutdown.recv() => {
                        // Drain whatever is queued, then stop.
                        rx.close();
                        while let Some(entry) = rx.recv().await {
                            write_entry(&store, entry).await;
                        }
                        tracing::info!("Audit writer drained and stopped");
                        break;
                    }
                }
            }
        });

        Self { tx, brute_force }
    }

    /// Queue one entry for durable write. Returns whether the entry
    /// was accepted; a full or closed queue loses the entry and logs
    /// locally.
    pub fn log(&self, mut entry: AuditEntry, context: &AuditContext) -> bool {
        entry.request_id = entry.request_id.or_else(|| context.request_id.clone());
        entry.ip_address = entry.ip_address.or_else(|| context.ip_address.clone());
        entry.user_agent = entry.user_agent.or_else(|| context.user_agent.clone());

        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Audit entry dropped");
                false
            }
        }
    }

    /// Record an auth-domain event. A failed login additionally feeds
    /// the brute-force guard; suspicious analyses emit a nested
    /// security event.
    pub async fn log_auth(&self, event: AuthEvent, context: &AuditContext) -> bool {
        let mut details = event.details.clone();
        if let Some(map) = details.as_object_mut() {
            map.insert("success".into(), event.success.into());
            if let Some(session_id) = &event.session_id {
                map.insert("session_id".into(), session_id.clone().into());
            }
        }

        let accepted = self.log(
            AuditEntry {
                action: event.action.to_string(),
                resource_type: "auth".to_string(),
                resource_id: event.session_id.clone(),
                user_id: event.user_id.clone(),
                request_id: None,
                ip_address: None,
                user_agent: None,
                details,
                created_at: clock::unix_secs(),
            },
            context,
        );

        if event.action == actions::FAILED_LOGIN {
            if let Some(ip) = context.ip_address.clone() {
                let analysis = self.brute_force.record_failure(&ip).await;
                if analysis.is_suspicious {
                    self.log_security_analysis(&analysis, context);
                }
            }
        }

        accepted
    }

    /// Record a security event, logging at a severity matching the
    /// risk level so the process log and durable trail agree.
    pub fn log_security(
        &self,
        action: &'static str,
        risk: RiskLevel,
        details: serde_json::Value,
        context: &AuditContext,
    ) -> bool {
        match risk {
            RiskLevel::Critical => {
                tracing::error!(action = %action, risk = risk.as_str(), "Security event")
            }
            RiskLevel::High => {
                tracing::warn!(action = %action, risk = risk.as_str(), "Security event")
            }
            _ => tracing::info!(action = %action, risk = risk.as_str(), "Security event"),
        }

        self.log(
            AuditEntry {
                action: action.to_string(),
                resource_type: "security".to_string(),
                resource_id: None,
                user_id: None,
                request_id: None,
                ip_address: None,
                user_agent: None,
                details,
                created_at: clock::unix_secs(),
            },
            context,
        )
    }

    fn log_security_analysis(&self, analysis: &FailureAnalysis, context: &AuditContext) {
        let action = if analysis.risk_level == RiskLevel::Critical {
            actions::BRUTE_FORCE_DETECTED
        } else {
            actions::SUSPICIOUS_ACTIVITY
        };
        self.log_security(
            action,
            analysis.risk_level,
            serde_json::json!({
                "failure_count": analysis.failure_count,
                "risk_level": analysis.risk_level.as_str(),
                "blocked_until": analysis.blocked_until,
                "already_blocked": analysis.already_blocked,
            }),
            context,
        );
    }
}

async fn write_entry(store: &Arc<dyn SecurityStore>, entry: AuditEntry) {
    if let Err(e) = store.append_audit(entry).await {
        tracing::error!(error = %e, "Audit write failed");
    }
}
