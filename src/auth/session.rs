//! Session validation and lifecycle.
//!
//! # Data Flow
//! ```text
//! validate(token):
//!     empty? → NO_TOKEN
//!     decode claims → INVALID_TOKEN_FORMAT / MISSING_TOKEN_CLAIMS
//!     stored row revoked? → TOKEN_REVOKED        (no provider call)
//!     claimed expiry passed? → TOKEN_EXPIRED     (no provider call)
//!     provider verify → PROVIDER_AUTH_FAILED / PROVIDER_UNAVAILABLE
//!     subject mismatch? → TOKEN_USER_MISMATCH    (tampering, not staleness)
//!     upsert session row, flag refresh-need
//! ```
//!
//! # Design Decisions
//! - Everything locally decodable is checked before the network hop,
//!   bounding the cost of garbage and abusive tokens
//! - Validation failures never propagate as errors; callers get an
//!   outcome and decide whether anonymous access is acceptable
//! - Local revocation is authoritative; provider sign-out is advisory

use std::sync::Arc;

use crate::auth::claims::{self, ClaimError, TokenClaims};
use crate::auth::provider::{IdentityProvider, ProviderError, RefreshedTokens, SignOutScope};
use crate::clock;
use crate::store::{RevocationReason, SecurityStore, SessionRecord};

/// Why validation settled the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    Valid,
    NoToken,
    InvalidTokenFormat,
    MissingTokenClaims,
    TokenRevoked,
    TokenExpired,
    /// Provider answered and rejected the token.
    ProviderAuthFailed,
    /// Provider unreachable or timed out.
    ProviderUnavailable,
    /// Verified subject differs from the claimed subject.
    TokenUserMismatch,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Valid => "VALID",
            ValidationReason::NoToken => "NO_TOKEN",
            ValidationReason::InvalidTokenFormat => "INVALID_TOKEN_FORMAT",
            ValidationReason::MissingTokenClaims => "MISSING_TOKEN_CLAIMS",
            ValidationReason::TokenRevoked => "TOKEN_REVOKED",
            ValidationReason::TokenExpired => "TOKEN_EXPIRED",
            ValidationReason::ProviderAuthFailed => "PROVIDER_AUTH_FAILED",
            ValidationReason::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ValidationReason::TokenUserMismatch => "TOKEN_USER_MISMATCH",
        }
    }
}

/// Identity details for a successfully validated token.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub session_id: String,
    pub user_id: String,
    pub email: Option<String>,
    pub claims: TokenClaims,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// Expired and revoked tokens want a refresh; a subject mismatch
    /// does not (tampering is not recoverable by refreshing).
    pub needs_refresh: bool,
    pub reason: ValidationReason,
    pub metadata: Option<SessionMetadata>,
    /// Whether this call created the session row. Used upstream to
    /// audit a fresh sign-in instead of a routine revalidation.
    pub is_new_session: bool,
}

impl ValidationOutcome {
    fn rejected(reason: ValidationReason, needs_refresh: bool) -> Self {
        Self {
            is_valid: false,
            needs_refresh,
            reason,
            metadata: None,
            is_new_session: false,
        }
    }
}

/// Request-scoped details recorded onto the session row.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub struct SessionValidator {
    store: Arc<dyn SecurityStore>,
    provider: Arc<dyn IdentityProvider>,
    /// Seconds before expiry at which a refresh is suggested.
    refresh_window_secs: u64,
}

impl SessionValidator {
    pub fn new(
        store: Arc<dyn SecurityStore>,
        provider: Arc<dyn IdentityProvider>,
        refresh_window_secs: u64,
    ) -> Self {
        Self {
            store,
            provider,
            refresh_window_secs,
        }
    }

    /// Validate a bearer token end to end and upsert the session row
    /// on success.
    pub async fn validate(&self, token: &str, meta: &RequestMeta) -> ValidationOutcome {
        if token.is_empty() {
            return ValidationOutcome::rejected(ValidationReason::NoToken, false);
        }

        let token_claims = match claims::decode_claims(token) {
            Ok(c) => c,
            Err(ClaimError::InvalidFormat) => {
                return ValidationOutcome::rejected(ValidationReason::InvalidTokenFormat, false);
            }
            Err(ClaimError::MissingClaim(_)) => {
                return ValidationOutcome::rejected(ValidationReason::MissingTokenClaims, false);
            }
        };

        let session_id = token_claims.session_id();
        let existing = match self.store.fetch_session(&session_id).await {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed");
                return ValidationOutcome::rejected(ValidationReason::ProviderUnavailable, false);
            }
        };
        if existing.as_ref().is_some_and(|s| s.revoked) {
            return ValidationOutcome::rejected(ValidationReason::TokenRevoked, true);
        }

        let now = clock::unix_secs();
        if now >= token_claims.expires_at {
            // Cheap rejection: the provider is never consulted for a
            // token that is expired on its face.
            return ValidationOutcome::rejected(ValidationReason::TokenExpired, true);
        }

        let identity = match self.provider.verify_token(token).await {
            Ok(identity) => identity,
            Err(ProviderError::Rejected(detail)) => {
                tracing::warn!(detail = %detail, "Provider rejected token");
                return ValidationOutcome::rejected(ValidationReason::ProviderAuthFailed, false);
            }
            Err(e) => {
                tracing::error!(error = %e, "Provider verification unavailable");
                return ValidationOutcome::rejected(ValidationReason::ProviderUnavailable, false);
            }
        };

        if identity.subject != token_claims.subject {
            tracing::warn!(
                claimed = %token_claims.subject,
                verified = %identity.subject,
                "Token subject does not match verified identity"
            );
            return ValidationOutcome::rejected(ValidationReason::TokenUserMismatch, false);
        }

        let existed = match self
            .store
            .upsert_session(SessionRecord {
                session_id: session_id.clone(),
                user_id: identity.subject.clone(),
                issued_at: token_claims.issued_at,
                expires_at: token_claims.expires_at,
                last_activity: now,
                user_agent: meta.user_agent.clone(),
                ip_address: meta.ip_address.clone(),
                revoked: false,
                revoked_reason: None,
                revoked_at: None,
            })
            .await
        {
            Ok(existed) => existed,
            Err(e) => {
                tracing::error!(error = %e, "Session upsert failed");
                return ValidationOutcome::rejected(ValidationReason::ProviderUnavailable, false);
            }
        };

        ValidationOutcome {
            is_valid: true,
            needs_refresh: token_claims.expires_at - now < self.refresh_window_secs,
            reason: ValidationReason::Valid,
            metadata: Some(SessionMetadata {
                session_id,
                user_id: identity.subject,
                email: identity.email.or(token_claims.email.clone()),
                claims: token_claims,
            }),
            is_new_session: !existed,
        }
    }

    /// Exchange a refresh token and revoke the session tied to the old
    /// access token. Provider errors surface; nothing is retried.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        old_access_token: &str,
    ) -> Result<RefreshedTokens, ProviderError> {
        let refreshed = self.provider.refresh_session(refresh_token).await?;

        if let Ok(old_claims) = claims::decode_claims(old_access_token) {
            match self
                .store
                .revoke_session(&old_claims.session_id(), RevocationReason::Refresh)
                .await
            {
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to revoke superseded session");
                }
            }
        }

        Ok(refreshed)
    }

    /// Revoke a single session. Local revocation is authoritative; the
    /// provider is notified best-effort.
    pub async fn invalidate_session(
        &self,
        session_id: &str,
        reason: RevocationReason,
        token: Option<&str>,
    ) -> bool {
        let revoked = match self.store.revoke_session(session_id, reason).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Session revocation failed");
                return false;
            }
        };

        if let Some(token) = token {
            if let Err(e) = self.provider.sign_out(token, SignOutScope::Local).await {
                tracing::warn!(error = %e, "Provider sign-out failed, local revocation stands");
            }
        }

        revoked
    }

    /// Revoke every session for a user.
    pub async fn invalidate_user_sessions(
        &self,
        user_id: &str,
        reason: RevocationReason,
        token: Option<&str>,
    ) -> u64 {
        let touched = match self.store.revoke_user_sessions(user_id, reason).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Bulk revocation failed");
                return 0;
            }
        };

        if let Some(token) = token {
            if let Err(e) = self.provider.sign_out(token, SignOutScope::Global).await {
                tracing::warn!(error = %e, "Provider global sign-out failed, local revocation stands");
            }
        }

        touched
    }
}
