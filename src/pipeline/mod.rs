//! Per-request security pipeline.
//!
//! # Data Flow
//! ```text
//! EnvGuard → BruteForceCheck → ResolveIdentity → DerivePermissions
//!     → EnforceRateLimit → Handler
//!     → RecordAudit + Telemetry (always runs, even for rejections)
//! ```
//!
//! # Design Decisions
//! - Stage failures are typed errors that short-circuit the handler,
//!   but the telemetry epilogue runs for every request
//! - Identity failures do NOT short-circuit: they degrade the context
//!   to anonymous so endpoints tolerating anonymous access still work
//! - System endpoints (health/time/version) skip rate limiting to
//!   avoid counter contention on non-sensitive traffic

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use crate::audit::{actions, AuditContext, AuthEvent};
use crate::auth::permissions::{AccountStatus, Role, UserProfile};
use crate::auth::session::{RequestMeta, ValidationReason};
use crate::clock;
use crate::error::GatewayError;
use crate::http::request::RequestIdExt;
use crate::http::server::AppState;
use crate::observability::store::{LogRecord, MetricRecord};
use crate::observability::metrics;
use crate::security::rate_limit::{RateLimitDecision, RateLimitKey};
use crate::security::brute_force::RiskLevel;

/// Identity resolved for the current request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub session_id: String,
    pub profile: UserProfile,
}

/// Context attached to the request for handlers downstream.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub endpoint: String,
    pub method: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub identity: Option<Identity>,
    pub permissions: HashSet<String>,
    pub needs_refresh: bool,
    /// Why identity resolution settled the way it did, when a token
    /// was presented.
    pub auth_reason: Option<ValidationReason>,
    pub rate: Option<(RateLimitKey, RateLimitDecision)>,
}

impl RequestContext {
    pub fn audit_context(&self) -> AuditContext {
        AuditContext {
            request_id: Some(self.request_id.clone()),
            ip_address: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// The resolved identity, or the appropriate rejection for
    /// endpoints that require one.
    pub fn require_identity(&self) -> Result<&Identity, GatewayError> {
        match (&self.identity, self.auth_reason) {
            (Some(identity), _) => Ok(identity),
            (None, Some(ValidationReason::ProviderUnavailable)) => Err(
                GatewayError::DependencyUnavailable("identity provider".to_string()),
            ),
            (None, Some(reason)) => Err(GatewayError::Unauthenticated {
                reason: reason.as_str().to_string(),
            }),
            (None, None) => Err(GatewayError::Unauthenticated {
                reason: ValidationReason::NoToken.as_str().to_string(),
            }),
        }
    }
}

/// Short names for authentication-action endpoints, which get their
/// own (tighter) budget space.
fn auth_action(path: &str) -> Option<&'static str> {
    match path {
        "/auth/login" => Some("login"),
        "/auth/signup" => Some("signup"),
        "/auth/refresh" => Some("refresh"),
        "/auth/password-reset" => Some("password_reset"),
        _ => None,
    }
}

pub async fn security_pipeline(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();
    let config = state.config.load_full();

    let mut context = RequestContext {
        request_id: request.request_id().unwrap_or("unknown").to_string(),
        endpoint: request.uri().path().to_string(),
        method: request.method().to_string(),
        ip: Some(addr.ip().to_string()),
        user_agent: request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        identity: None,
        permissions: HashSet::new(),
        needs_refresh: false,
        auth_reason: None,
        rate: None,
    };

    // Pull the bearer token out up front; the stage driver must not
    // borrow the request across await points.
    let token = bearer_token(&request).map(str::to_string);
    let outcome = run_stages(&state, &config, &mut context, token.as_deref()).await;

    let mut response = match outcome {
        Ok(()) => {
            request.extensions_mut().insert(context.clone());
            next.run(request).await
        }
        Err(e) => e.into_response(),
    };

    // Telemetry epilogue: runs for allowed, rejected, and errored
    // requests alike.
    if let Some((_, decision)) = &context.rate {
        let headers = response.headers_mut();
        if !headers.contains_key("x-ratelimit-limit") {
            insert_int(headers, "x-ratelimit-limit", decision.limit as u64);
            insert_int(headers, "x-ratelimit-remaining", decision.remaining as u64);
            insert_int(headers, "x-ratelimit-reset", decision.reset_epoch_secs);
        }
    }

    let status = response.status().as_u16();
    let duration_ms = start_time.elapsed().as_millis() as u64;
    metrics::record_request(&context.method, status, start_time);

    state.services.observability.record_from_context(
        MetricRecord {
            endpoint: context.endpoint.clone(),
            method: context.method.clone(),
            status,
            duration_ms,
            timestamp: clock::unix_millis(),
            request_id: context.request_id.clone(),
        },
        LogRecord {
            level: if status >= 500 {
                "error".to_string()
            } else if status >= 400 {
                "warn".to_string()
            } else {
                "info".to_string()
            },
            request_id: context.request_id.clone(),
            message: format!("{} {} -> {}", context.method, context.endpoint, status),
            meta: serde_json::json!({
                "duration_ms": duration_ms,
                "user_id": context.identity.as_ref().map(|i| i.user_id.clone()),
            }),
            timestamp: clock::unix_millis(),
        },
        context.rate.as_ref().map(|(key, decision)| (key, decision)),
    );

    state
        .services
        .cleanup
        .maybe_spawn(state.services.store.clone());

    response
}

async fn run_stages(
    state: &AppState,
    config: &crate::GatewayConfig,
    context: &mut RequestContext,
    token: Option<&str>,
) -> Result<(), GatewayError> {
    let services = &state.services;

    // EnvGuard: a hot-reload can only land validated configs, but a
    // misconfigured initial environment must fail closed, not panic
    // deep in a handler.
    if config.provider.base_url.is_empty() {
        return Err(GatewayError::DependencyUnavailable(
            "identity provider is not configured".to_string(),
        ));
    }

    // Brute-force check, before any session work.
    if config.brute_force.enabled {
        if let Some(ip) = &context.ip {
            if let Some(blocked_until) = services.brute_force.is_blocked(ip).await {
                metrics::record_rate_limited("brute_force_block");
                return Err(GatewayError::Blocked {
                    blocked_until_epoch_secs: blocked_until,
                    retry_after_secs: blocked_until.saturating_sub(clock::unix_secs()),
                });
            }
        }
    }

    // Identity resolution. Failures degrade to anonymous.
    if let Some(token) = token {
        let meta = RequestMeta {
            ip_address: context.ip.clone(),
            user_agent: context.user_agent.clone(),
        };
        let outcome = services.sessions.validate(token, &meta).await;
        metrics::record_auth_outcome(outcome.reason.as_str());
        context.auth_reason = Some(outcome.reason);
        context.needs_refresh = outcome.needs_refresh;

        if let Some(metadata) = outcome.metadata {
            let profile = UserProfile {
                role: Role::from_claim(metadata.claims.role.as_deref()),
                status: if metadata.claims.suspended {
                    AccountStatus::Suspended
                } else {
                    AccountStatus::Active
                },
            };
            context.permissions = services
                .permissions
                .permissions_for(&metadata.user_id, &profile);
            metrics::record_permission_cache_size(services.permissions.cached_entries());

            if outcome.is_new_session {
                services
                    .audit
                    .log_auth(
                        AuthEvent {
                            action: actions::LOGIN,
                            user_id: Some(metadata.user_id.clone()),
                            session_id: Some(metadata.session_id.clone()),
                            success: true,
                            details: serde_json::json!({ "source": "bearer" }),
                        },
                        &context.audit_context(),
                    )
                    .await;
            }

            context.identity = Some(Identity {
                user_id: metadata.user_id,
                email: metadata.email,
                session_id: metadata.session_id,
                profile,
            });
        }
    }

    // Rate limiting, last of the guards.
    let exempt_endpoint = config
        .rate_limit
        .exempt_endpoints
        .iter()
        .any(|e| e == &context.endpoint);
    if config.rate_limit.enabled
        && !exempt_endpoint
        && !services.rate_limiter.is_exempt(context.ip.as_deref())
    {
        let auth_endpoint = auth_action(&context.endpoint);
        let key = RateLimitKey::classify(
            auth_endpoint,
            context.identity.as_ref().map(|i| i.user_id.as_str()),
            context.ip.as_deref(),
        );
        let budget = if auth_endpoint.is_some() {
            config.rate_limit.auth_limit
        } else {
            config.rate_limit.default_limit
        };

        let decision = services
            .rate_limiter
            .consume(&key, budget, &context.endpoint)
            .await;
        let denied = !decision.allowed;
        context.rate = Some((key, decision.clone()));

        if denied {
            metrics::record_rate_limited("window_budget");
            services.audit.log_security(
                actions::RATE_LIMIT_EXCEEDED,
                RiskLevel::Medium,
                serde_json::json!({
                    "endpoint": context.endpoint,
                    "limit": decision.limit,
                    "reset": decision.reset_epoch_secs,
                }),
                &context.audit_context(),
            );
            return Err(GatewayError::RateLimited {
                limit: decision.limit,
                reset_epoch_secs: decision.reset_epoch_secs,
                retry_after_secs: decision.retry_after_secs.unwrap_or(1),
            });
        }
    }

    Ok(())
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

fn insert_int(headers: &mut axum::http::HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = axum::http::HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}
