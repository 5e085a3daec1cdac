//! Permission derivation with a short-TTL cache.
//!
//! The capability set is a pure function of role + account status.
//! Expired cache entries are swept lazily before each read; there is no
//! background timer.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::clock;

/// Role resolved for an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn from_claim(claim: Option<&str>) -> Self {
        match claim {
            Some("admin") => Role::Admin,
            _ => Role::Member,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Copy)]
pub struct UserProfile {
    pub role: Role,
    pub status: AccountStatus,
}

/// Base scopes every active member holds.
const MEMBER_PERMISSIONS: &[&str] = &[
    "profile:view",
    "profile:edit",
    "purchases:view",
    "referrals:view",
    "content:view",
];

/// Additional scopes for administrators.
const ADMIN_PERMISSIONS: &[&str] = &[
    "users:manage",
    "content:manage",
    "audit:view",
    "ratelimits:view",
    "sessions:revoke",
];

/// Compute the capability set. Suspended accounts hold nothing,
/// regardless of role.
pub fn calculate(profile: &UserProfile) -> HashSet<String> {
    if profile.status == AccountStatus::Suspended {
        return HashSet::new();
    }

    let mut permissions: HashSet<String> =
        MEMBER_PERMISSIONS.iter().map(|p| p.to_string()).collect();
    if profile.role == Role::Admin {
        permissions.extend(ADMIN_PERMISSIONS.iter().map(|p| p.to_string()));
    }
    permissions
}

/// A permission question: an action, optionally scoped to a resource.
#[derive(Debug, Clone)]
pub struct PermissionCheck<'a> {
    pub action: &'a str,
    pub resource: Option<&'a str>,
}

/// Cache-backed permission calculator.
pub struct PermissionCalculator {
    cache: DashMap<String, (HashSet<String>, u64)>,
    ttl_secs: u64,
}

impl PermissionCalculator {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            cache: DashMap::new(),
            ttl_secs,
        }
    }

    /// Permission set for a user, read through the TTL cache.
    pub fn permissions_for(&self, user_id: &str, profile: &UserProfile) -> HashSet<String> {
        self.sweep_expired();

        if let Some(entry) = self.cache.get(user_id) {
            return entry.value().0.clone();
        }

        let permissions = calculate(profile);
        self.cache.insert(
            user_id.to_string(),
            (permissions.clone(), clock::unix_secs() + self.ttl_secs),
        );
        permissions
    }

    /// Answer a permission question. The coarse set is cached; the
    /// ownership check depends on the call-site resource and is not.
    pub fn has_permission(
        &self,
        user_id: &str,
        profile: &UserProfile,
        check: &PermissionCheck<'_>,
    ) -> bool {
        let permissions = self.permissions_for(user_id, profile);
        if !permissions.contains(check.action) {
            return false;
        }

        match check.resource {
            Some(resource) if check.action.starts_with("profile:") => resource == user_id,
            _ => true,
        }
    }

    /// Drop a user's cached entry. Called on role-affecting mutations.
    pub fn invalidate(&self, user_id: &str) {
        self.cache.remove(user_id);
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn sweep_expired(&self) {
        let now = clock::unix_secs();
        self.cache.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMBER: UserProfile = UserProfile {
        role: Role::Member,
        status: AccountStatus::Active,
    };
    const ADMIN: UserProfile = UserProfile {
        role: Role::Admin,
        status: AccountStatus::Active,
    };

    #[test]
    fn test_suspended_holds_nothing() {
        let suspended_admin = UserProfile {
            role: Role::Admin,
            status: AccountStatus::Suspended,
        };
        assert!(calculate(&suspended_admin).is_empty());
    }

    #[test]
    fn test_admin_is_superset_of_member() {
        let member = calculate(&MEMBER);
        let admin = calculate(&ADMIN);
        assert!(member.is_subset(&admin));
        assert!(admin.contains("audit:view"));
        assert!(!member.contains("audit:view"));
    }

    #[test]
    fn test_ownership_scoped_check() {
        let calc = PermissionCalculator::new(300);
        let own = PermissionCheck {
            action: "profile:edit",
            resource: Some("u1"),
        };
        let other = PermissionCheck {
            action: "profile:edit",
            resource: Some("u2"),
        };
        assert!(calc.has_permission("u1", &MEMBER, &own));
        assert!(!calc.has_permission("u1", &MEMBER, &other));
    }

    #[test]
    fn test_cache_hit_and_invalidate() {
        let calc = PermissionCalculator::new(300);
        calc.permissions_for("u1", &MEMBER);
        assert_eq!(calc.cached_entries(), 1);

        // Cached set answers until invalidated, even if the profile
        // changed underneath.
        let cached = calc.permissions_for("u1", &ADMIN);
        assert!(!cached.contains("users:manage"));

        calc.invalidate("u1");
        let fresh = calc.permissions_for("u1", &ADMIN);
        assert!(fresh.contains("users:manage"));
    }

    #[test]
    fn test_expired_entries_swept() {
        let calc = PermissionCalculator::new(0);
        calc.permissions_for("u1", &MEMBER);
        // ttl 0 means the entry is already expired on the next read
        let fresh = calc.permissions_for("u1", &ADMIN);
        assert!(fresh.contains("users:manage"));
    }
}
