//! In-memory store implementation.
//!
//! Backs tests and single-node deployments. Tables are DashMaps keyed
//! the same way the relational schema is keyed, so the semantics match
//! a real backend row for row.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;

use crate::clock;
use crate::store::{
    AuditEntry, BruteForceAttempt, RateLimitCounter, RevocationReason, SecurityStore,
    SessionRecord, StoreError,
};

#[derive(Default)]
pub struct MemoryStore {
    counters: DashMap<(String, u64), RateLimitCounter>,
    attempts: DashMap<String, BruteForceAttempt>,
    sessions: DashMap<String, SessionRecord>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn fetch_counter(
        &self,
        key: &str,
        window_start: u64,
    ) -> Result<Option<RateLimitCounter>, StoreError> {
        Ok(self
            .counters
            .get(&(key.to_string(), window_start))
            .map(|r| r.value().clone()))
    }

    async fn create_counter(&self, counter: RateLimitCounter) -> Result<(), StoreError> {
        self.counters
            .insert((counter.key.clone(), counter.window_start), counter);
        Ok(())
    }

    async fn increment_counter(&self, key: &str, window_start: u64) -> Result<u32, StoreError> {
        let mut entry = self
            .counters
            .get_mut(&(key.to_string(), window_start))
            .ok_or_else(|| StoreError::Unavailable("counter row missing".into()))?;
        entry.requests += 1;
        Ok(entry.requests)
    }

    async fn delete_counters_before(&self, horizon: u64) -> Result<u64, StoreError> {
        let before = self.counters.len();
        self.counters.retain(|(_, start), _| *start >= horizon);
        Ok((before - self.counters.len()) as u64)
    }

    async fn fetch_attempt(&self, ip: &str) -> Result<Option<BruteForceAttempt>, StoreError> {
        Ok(self.attempts.get(ip).map(|r| r.value().clone()))
    }

    async fn upsert_attempt(&self, attempt: BruteForceAttempt) -> Result<(), StoreError> {
        self.attempts.insert(attempt.ip_address.clone(), attempt);
        Ok(())
    }

    async fn delete_attempt(&self, ip: &str) -> Result<bool, StoreError> {
        Ok(self.attempts.remove(ip).is_some())
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.get(session_id).map(|r| r.value().clone()))
    }

    async fn upsert_session(&self, mut session: SessionRecord) -> Result<bool, StoreError> {
        // A revocation is permanent. Concurrent validators re-upserting a
        // row they fetched before the revoke must not resurrect it.
        match self.sessions.entry(session.session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let existing = slot.get();
                if existing.revoked {
                    session.revoked = true;
                    session.revoked_reason = existing.revoked_reason;
                    session.revoked_at = existing.revoked_at;
                }
                slot.insert(session);
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(false)
            }
        }
    }

    async fn revoke_session(
        &self,
        session_id: &str,
        reason: RevocationReason,
    ) -> Result<bool, StoreError> {
        match self.sessions.get_mut(session_id) {
            Some(mut row) if !row.revoked => {
                row.revoked = true;
                row.revoked_reason = Some(reason);
                row.revoked_at = Some(clock::unix_secs());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn revoke_user_sessions(
        &self,
        user_id: &str,
        reason: RevocationReason,
    ) -> Result<u64, StoreError> {
        let now = clock::unix_secs();
        let mut touched = 0;
        for mut row in self.sessions.iter_mut() {
            if row.user_id == user_id && !row.revoked {
                row.revoked = true;
                row.revoked_reason = Some(reason);
                row.revoked_at = Some(now);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete_sessions_expired_before(&self, horizon: u64) -> Result<u64, StoreError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at >= horizon);
        Ok((before - self.sessions.len()) as u64)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.audit
            .lock()
            .map_err(|_| StoreError::Unavailable("audit log poisoned".into()))?
            .push(entry);
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let log = self
            .audit
            .lock()
            .map_err(|_| StoreError::Unavailable("audit log poisoned".into()))?;
        Ok(log.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_lifecycle() {
        let store = MemoryStore::new();
        assert!(store.fetch_counter("k", 0).await.unwrap().is_none());

        store
            .create_counter(RateLimitCounter {
                key: "k".into(),
                window_start: 0,
                requests: 1,
                limit_value: 10,
                endpoint: None,
            })
            .await
            .unwrap();

        assert_eq!(store.increment_counter("k", 0).await.unwrap(), 2);
        assert_eq!(store.delete_counters_before(1).await.unwrap(), 1);
        assert!(store.fetch_counter("k", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revocation_is_permanent() {
        let store = MemoryStore::new();
        store
            .upsert_session(SessionRecord {
                session_id: "u1_100".into(),
                user_id: "u1".into(),
                issued_at: 100,
                expires_at: 200,
                last_activity: 100,
                user_agent: None,
                ip_address: None,
                revoked: false,
                revoked_reason: None,
                revoked_at: None,
            })
            .await
            .unwrap();

        assert!(store
            .revoke_session("u1_100", RevocationReason::Logout)
            .await
            .unwrap());
        // Second revocation keeps the original reason.
        assert!(!store
            .revoke_session("u1_100", RevocationReason::Admin)
            .await
            .unwrap());
        let row = store.fetch_session("u1_100").await.unwrap().unwrap();
        assert_eq!(row.revoked_reason, Some(RevocationReason::Logout));
    }

    #[tokio::test]
    async fn test_upsert_cannot_clear_revocation() {
        let store = MemoryStore::new();
        let fresh = SessionRecord {
            session_id: "u1_100".into(),
            user_id: "u1".into(),
            issued_at: 100,
            expires_at: 200,
            last_activity: 100,
            user_agent: None,
            ip_address: None,
            revoked: false,
            revoked_reason: None,
            revoked_at: None,
        };
        store.upsert_session(fresh.clone()).await.unwrap();
        assert!(store
            .revoke_session("u1_100", RevocationReason::Security)
            .await
            .unwrap());

        // A validator that fetched the row before the revoke writes back
        // an un-revoked copy with a newer last_activity.
        let stale = SessionRecord {
            last_activity: 150,
            ..fresh
        };
        assert!(store.upsert_session(stale).await.unwrap());

        let row = store.fetch_session("u1_100").await.unwrap().unwrap();
        assert!(row.revoked);
        assert_eq!(row.revoked_reason, Some(RevocationReason::Security));
        assert_eq!(row.last_activity, 150);
    }
}
