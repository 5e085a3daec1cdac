//! Fixed-window rate limiting against the external store.
//!
//! # Design Decisions
//! - The counting key is a tagged enum built once where the request is
//!   classified; the string form exists only for storage and display
//! - Fixed windows admit up to 2x budget at a boundary; accepted, the
//!   brute-force guard is the defense against sustained abuse
//! - Exempt addresses bypass consumption entirely and are never
//!   recorded

use std::sync::Arc;

use crate::clock;
use crate::observability::mask;
use crate::store::{RateLimitCounter, SecurityStore, StoreError};

/// Counting key, carried through the pipeline in tagged form.
///
/// Authentication-action endpoints get their own budget space so a
/// login storm cannot exhaust a caller's general budget and vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitKey {
    AuthUser { endpoint: String, user_id: String },
    AuthIp { endpoint: String, ip: String },
    AuthAnonymous { endpoint: String },
    User { user_id: String },
    Ip { ip: String },
    Anonymous,
}

impl RateLimitKey {
    /// Classify a request into its counting key.
    pub fn classify(
        auth_endpoint: Option<&str>,
        user_id: Option<&str>,
        ip: Option<&str>,
    ) -> Self {
        match (auth_endpoint, user_id, ip) {
            (Some(endpoint), Some(user_id), _) => RateLimitKey::AuthUser {
                endpoint: endpoint.to_string(),
                user_id: user_id.to_string(),
            },
            (Some(endpoint), None, Some(ip)) => RateLimitKey::AuthIp {
                endpoint: endpoint.to_string(),
                ip: ip.to_string(),
            },
            (Some(endpoint), None, None) => RateLimitKey::AuthAnonymous {
                endpoint: endpoint.to_string(),
            },
            (None, Some(user_id), _) => RateLimitKey::User {
                user_id: user_id.to_string(),
            },
            (None, None, Some(ip)) => RateLimitKey::Ip { ip: ip.to_string() },
            (None, None, None) => RateLimitKey::Anonymous,
        }
    }

    /// Storage form of the key.
    pub fn storage_key(&self) -> String {
        match self {
            RateLimitKey::AuthUser { endpoint, user_id } => {
                format!("auth:{endpoint}:user:{user_id}")
            }
            RateLimitKey::AuthIp { endpoint, ip } => format!("auth:{endpoint}:ip:{ip}"),
            RateLimitKey::AuthAnonymous { endpoint } => format!("auth:{endpoint}:anonymous"),
            RateLimitKey::User { user_id } => format!("user:{user_id}"),
            RateLimitKey::Ip { ip } => format!("ip:{ip}"),
            RateLimitKey::Anonymous => "anonymous".to_string(),
        }
    }

    /// Anonymized form, safe for the live feed. Raw IPs and user ids
    /// never leave the limiter.
    pub fn masked_key(&self) -> String {
        match self {
            RateLimitKey::AuthUser { endpoint, user_id } => {
                format!("auth:{endpoint}:user:{}", mask::mask_user_id(user_id))
            }
            RateLimitKey::AuthIp { endpoint, ip } => {
                format!("auth:{endpoint}:ip:{}", mask::mask_ip(ip))
            }
            RateLimitKey::AuthAnonymous { endpoint } => format!("auth:{endpoint}:anonymous"),
            RateLimitKey::User { user_id } => format!("user:{}", mask::mask_user_id(user_id)),
            RateLimitKey::Ip { ip } => format!("ip:{}", mask::mask_ip(ip)),
            RateLimitKey::Anonymous => "anonymous".to_string(),
        }
    }

    /// Coarse bucket class for the live feed.
    pub fn kind(&self) -> &'static str {
        match self {
            RateLimitKey::AuthUser { .. }
            | RateLimitKey::AuthIp { .. }
            | RateLimitKey::AuthAnonymous { .. } => "auth",
            RateLimitKey::User { .. } => "user",
            RateLimitKey::Ip { .. } => "ip",
            RateLimitKey::Anonymous => "anonymous",
        }
    }
}

/// Outcome of a consumption attempt, with the standard metadata the
/// response headers need.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch_secs: u64,
    pub retry_after_secs: Option<u64>,
}

pub struct RateLimiter {
    store: Arc<dyn SecurityStore>,
    window_ms: u64,
    exempt_ips: Vec<String>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SecurityStore>, window_secs: u64, exempt_ips: Vec<String>) -> Self {
        Self {
            store,
            window_ms: window_secs * 1000,
            exempt_ips,
        }
    }

    /// Whether an address bypasses rate limiting entirely.
    pub fn is_exempt(&self, ip: Option<&str>) -> bool {
        self.exempt_ips.iter().any(|allowed| {
            allowed == "*" || ip.is_some_and(|ip| ip == allowed)
        })
    }

    /// Consume one request from the key's fixed-window budget.
    ///
    /// Read-or-create, then increment. Under concurrent multi-instance
    /// deployment the read-then-write pair can over-admit slightly; the
    /// store's `increment_counter` is the upgrade point for an atomic
    /// compare at the backend.
    pub async fn consume(
        &self,
        key: &RateLimitKey,
        budget: u32,
        endpoint: &str,
    ) -> RateLimitDecision {
        let now = clock::unix_millis();
        let window_start = (now / self.window_ms) * self.window_ms;
        let reset_epoch_secs = (window_start + self.window_ms) / 1000;
        let retry_after_secs = (window_start + self.window_ms - now).div_ceil(1000);
        let storage_key = key.storage_key();

        let existing = match self.store.fetch_counter(&storage_key, window_start).await {
            Ok(row) => row,
            Err(e) => return self.deny_on_store_error(e, budget, reset_epoch_secs, retry_after_secs),
        };

        match existing {
            None => {
                let created = self
                    .store
                    .create_counter(RateLimitCounter {
                        key: storage_key,
                        window_start,
                        requests: 1,
                        limit_value: budget,
                        endpoint: Some(endpoint.to_string()),
                    })
                    .await;
                if let Err(e) = created {
                    return self.deny_on_store_error(e, budget, reset_epoch_secs, retry_after_secs);
                }
                RateLimitDecision {
                    allowed: true,
                    limit: budget,
                    remaining: budget.saturating_sub(1),
                    reset_epoch_secs,
                    retry_after_secs: None,
                }
            }
            Some(counter) if counter.requests < budget => {
                let requests = match self.store.increment_counter(&storage_key, window_start).await
                {
                    Ok(n) => n,
                    Err(e) => {
                        return self.deny_on_store_error(e, budget, reset_epoch_secs, retry_after_secs)
                    }
                };
                RateLimitDecision {
                    allowed: true,
                    limit: budget,
                    remaining: budget.saturating_sub(requests),
                    reset_epoch_secs,
                    retry_after_secs: None,
                }
            }
            Some(_) => RateLimitDecision {
                allowed: false,
                limit: budget,
                remaining: 0,
                reset_epoch_secs,
                retry_after_secs: Some(retry_after_secs),
            },
        }
    }

    /// A stalled store must not hang the pipeline; deny cheaply and let
    /// the caller retry next window.
    fn deny_on_store_error(
        &self,
        error: StoreError,
        budget: u32,
        reset_epoch_secs: u64,
        retry_after_secs: u64,
    ) -> RateLimitDecision {
        tracing::error!(error = %error, "Rate limit store unavailable, denying");
        RateLimitDecision {
            allowed: false,
            limit: budget,
            remaining: 0,
            reset_epoch_secs,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}
