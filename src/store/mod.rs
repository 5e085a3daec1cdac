//! External relational store abstraction.
//!
//! # Data Flow
//! ```text
//! RateLimiter / BruteForceGuard / SessionValidator / AuditLogger
//!     → SecurityStore trait (simple row-level CRUD)
//!     → MemoryStore (tests, single-node default)
//!     → [relational implementation lives outside this crate]
//! ```
//!
//! # Design Decisions
//! - The store is a black box: equality/less-than predicates only
//! - Counter increment is a single store op so a relational backend can
//!   make it atomic without changing callers
//! - Audit rows are append-only; retention is an external concern

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;

/// Fixed-window request counter, unique per (key, window_start).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitCounter {
    pub key: String,
    /// Window start, milliseconds since epoch, floor-aligned.
    pub window_start: u64,
    pub requests: u32,
    pub limit_value: u32,
    pub endpoint: Option<String>,
}

/// Per-source-address failure tracking row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceAttempt {
    pub ip_address: String,
    pub failure_count: u32,
    /// Seconds since epoch.
    pub first_failure_at: u64,
    pub last_failure_at: u64,
    /// Seconds since epoch; set once a backoff threshold is met.
    pub blocked_until: Option<u64>,
}

/// Why a session row was revoked. Revocation is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationReason {
    Logout,
    Refresh,
    Security,
    Admin,
}

/// Persisted session row, addressed by the deterministic
/// `{subject}_{issued_at}` id so revalidating the same token always
/// hits the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    /// Seconds since epoch.
    pub issued_at: u64,
    pub expires_at: u64,
    pub last_activity: u64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub revoked: bool,
    pub revoked_reason: Option<RevocationReason>,
    pub revoked_at: Option<u64>,
}

/// Append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
    /// Seconds since epoch.
    pub created_at: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out")]
    Timeout,
}

/// Row-level CRUD against the four persisted tables.
///
/// Implementations are expected to provide per-row consistency only;
/// cross-row transactions are not required by any caller.
#[async_trait]
pub trait SecurityStore: Send + Sync + 'static {
    // --- rate limit counters ---

    async fn fetch_counter(
        &self,
        key: &str,
        window_start: u64,
    ) -> Result<Option<RateLimitCounter>, StoreError>;

    async fn create_counter(&self, counter: RateLimitCounter) -> Result<(), StoreError>;

    /// Increment and return the new request count. A relational backend
    /// should implement this as an atomic `requests = requests + 1`.
    async fn increment_counter(&self, key: &str, window_start: u64) -> Result<u32, StoreError>;

    /// Delete counters whose window started before `horizon` (ms).
    /// Returns the number of rows removed.
    async fn delete_counters_before(&self, horizon: u64) -> Result<u64, StoreError>;

    // --- brute force attempts ---

    async fn fetch_attempt(&self, ip: &str) -> Result<Option<BruteForceAttempt>, StoreError>;

    async fn upsert_attempt(&self, attempt: BruteForceAttempt) -> Result<(), StoreError>;

    /// Delete the attempt row entirely. Called on successful auth.
    async fn delete_attempt(&self, ip: &str) -> Result<bool, StoreError>;

    // --- sessions ---

    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Insert or replace the session row. Returns whether a row with
    /// this id already existed (an existing row means routine
    /// revalidation rather than a fresh sign-in).
    async fn upsert_session(&self, session: SessionRecord) -> Result<bool, StoreError>;

    /// Mark a session revoked. No-op if already revoked (revocation is
    /// permanent and the original reason wins).
    async fn revoke_session(
        &self,
        session_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, StoreError>;

    /// Revoke every non-revoked session belonging to a user. Returns
    /// the number of rows touched.
    async fn revoke_user_sessions(
        &self,
        user_id: &str,
        reason: RevocationReason,
    ) -> Result<u64, StoreError>;

    /// Delete sessions that expired before `horizon` (seconds).
    async fn delete_sessions_expired_before(&self, horizon: u64) -> Result<u64, StoreError>;

    // --- audit ---

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Most recent audit rows, newest first. Used by the admin surface
    /// and tests; the trail itself is append-only.
    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError>;
}
