//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID, security pipeline)
//! - Bind server to listener
//! - Apply hot-reloaded configs without a restart
//!
//! # Design Decisions
//! - The security pipeline runs as a single middleware so its
//!   telemetry epilogue sees every response, including rejections
//! - Handlers read identity from the request context the pipeline
//!   attached; none of them re-validate tokens

use axum::{
    extract::{Extension, Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use arc_swap::ArcSwap;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::audit::{actions, AuditLogger, AuthEvent};
use crate::auth::permissions::{PermissionCalculator, PermissionCheck};
use crate::auth::provider::{IdentityProvider, ProviderError};
use crate::auth::session::{RequestMeta, SessionValidator, ValidationReason};
use crate::cleanup::CleanupScheduler;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::dashboard;
use crate::http::request::RequestIdLayer;
use crate::lifecycle::Shutdown;
use crate::observability::store::ObservabilityStore;
use crate::pipeline::{security_pipeline, RequestContext};
use crate::security::{BruteForceGuard, RateLimiter};
use crate::store::{RevocationReason, SecurityStore};

/// Long-lived components shared by every request.
pub struct Services {
    pub store: Arc<dyn SecurityStore>,
    pub sessions: SessionValidator,
    pub permissions: PermissionCalculator,
    pub rate_limiter: RateLimiter,
    pub brute_force: Arc<BruteForceGuard>,
    pub audit: AuditLogger,
    pub observability: Arc<ObservabilityStore>,
    pub cleanup: Arc<CleanupScheduler>,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub services: Arc<Services>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: Arc<ArcSwap<GatewayConfig>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn SecurityStore>,
        provider: Arc<dyn IdentityProvider>,
        shutdown: &Shutdown,
    ) -> Self {
        let brute_force = Arc::new(BruteForceGuard::new(
            store.clone(),
            config.brute_force.steps.clone(),
        ));
        let observability = Arc::new(ObservabilityStore::new(
            config.observability.buffer_capacity,
            config.observability.rate_bucket_capacity,
        ));

        let services = Arc::new(Services {
            sessions: SessionValidator::new(
                store.clone(),
                provider,
                config.session.refresh_window_secs,
            ),
            permissions: PermissionCalculator::new(config.permissions.cache_ttl_secs),
            rate_limiter: RateLimiter::new(
                store.clone(),
                config.rate_limit.window_secs,
                config.rate_limit.exempt_ips.clone(),
            ),
            audit: AuditLogger::spawn(
                store.clone(),
                brute_force.clone(),
                config.audit.queue_capacity,
                shutdown.subscribe(),
            ),
            brute_force,
            observability,
            cleanup: Arc::new(CleanupScheduler::new(config.cleanup.clone())),
            store,
        });

        let config = Arc::new(ArcSwap::from_pointee(config));
        let state = AppState {
            config: config.clone(),
            services,
        };

        let router = Self::build_router(state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let request_secs = state.config.load().timeouts.request_secs;

        Router::new()
            .route("/health", get(health))
            .route("/time", get(time))
            .route("/version", get(version))
            .route("/whoami", get(whoami))
            .route("/profile/{user_id}", get(profile))
            .route("/auth/login", post(login))
            .route("/auth/logout", post(logout))
            .route("/auth/refresh", post(refresh))
            .nest("/admin", dashboard::router(state.clone()))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                security_pipeline,
            ))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(request_secs)))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Config updates arriving on `config_updates` are swapped in for
    /// subsequent requests. Returns once the shutdown signal fires and
    /// in-flight requests have drained.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        let config_handle = self.config.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(new_config) => {
                            tracing::info!("Applying reloaded configuration");
                            config_handle.store(Arc::new(new_config));
                        }
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": crate::clock::unix_secs(),
    }))
}

async fn time() -> Json<serde_json::Value> {
    Json(json!({
        "epoch_secs": crate::clock::unix_secs(),
        "epoch_millis": crate::clock::unix_millis(),
    }))
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn whoami(
    Extension(context): Extension<RequestContext>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let identity = context.require_identity()?;

    let mut permissions: Vec<&String> = context.permissions.iter().collect();
    permissions.sort();

    Ok(Json(json!({
        "user_id": identity.user_id,
        "email": identity.email,
        "session_id": identity.session_id,
        "permissions": permissions,
        "needs_refresh": context.needs_refresh,
    })))
}

/// Profile lookup, scoped by ownership. Members can read their own
/// profile; reading someone else's takes the `users:manage` scope.
async fn profile(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let identity = context.require_identity()?;
    let permissions = &state.services.permissions;

    let own = PermissionCheck {
        action: "profile:view",
        resource: Some(&user_id),
    };
    let cross = PermissionCheck {
        action: "users:manage",
        resource: None,
    };
    if !permissions.has_permission(&identity.user_id, &identity.profile, &own)
        && !permissions.has_permission(&identity.user_id, &identity.profile, &cross)
    {
        return Err(GatewayError::Forbidden {
            permission: "profile:view".to_string(),
        });
    }

    let own_profile = user_id == identity.user_id;
    Ok(Json(json!({
        "user_id": user_id,
        "email": own_profile.then(|| identity.email.clone()).flatten(),
        "own_profile": own_profile,
    })))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    token: String,
}

/// Validate a credential presented in the body. Failures feed the
/// brute-force guard through the audit path; successes clear it.
async fn login(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let services = &state.services;
    let meta = RequestMeta {
        ip_address: context.ip.clone(),
        user_agent: context.user_agent.clone(),
    };

    let outcome = services.sessions.validate(&body.token, &meta).await;

    if let Some(metadata) = outcome.metadata.filter(|_| outcome.is_valid) {
        services
            .audit
            .log_auth(
                AuthEvent {
                    action: actions::LOGIN,
                    user_id: Some(metadata.user_id.clone()),
                    session_id: Some(metadata.session_id.clone()),
                    success: true,
                    details: json!({ "source": "login" }),
                },
                &context.audit_context(),
            )
            .await;

        if let Some(ip) = &context.ip {
            services.brute_force.clear(ip).await;
        }

        return Ok(Json(json!({
            "valid": true,
            "user_id": metadata.user_id,
            "session_id": metadata.session_id,
            "expires_at": metadata.claims.expires_at,
            "needs_refresh": outcome.needs_refresh,
        })));
    }

    services
        .audit
        .log_auth(
            AuthEvent {
                action: actions::FAILED_LOGIN,
                user_id: None,
                session_id: None,
                success: false,
                details: json!({ "reason": outcome.reason.as_str() }),
            },
            &context.audit_context(),
        )
        .await;

    match outcome.reason {
        ValidationReason::ProviderUnavailable => Err(GatewayError::DependencyUnavailable(
            "identity provider".to_string(),
        )),
        reason => Err(GatewayError::Unauthenticated {
            reason: reason.as_str().to_string(),
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LogoutRequest {
    #[serde(default)]
    global: bool,
}

async fn logout(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let identity = context.require_identity()?.clone();
    let services = &state.services;
    let token = bearer_from_headers(&headers);
    // Body is optional; absent or malformed means a plain local logout
    let body: LogoutRequest = serde_json::from_slice(&body).unwrap_or_default();

    let revoked = if body.global {
        services
            .sessions
            .invalidate_user_sessions(&identity.user_id, RevocationReason::Logout, token)
            .await
    } else {
        u64::from(
            services
                .sessions
                .invalidate_session(&identity.session_id, RevocationReason::Logout, token)
                .await,
        )
    };

    services
        .audit
        .log_auth(
            AuthEvent {
                action: actions::LOGOUT,
                user_id: Some(identity.user_id),
                session_id: Some(identity.session_id),
                success: true,
                details: json!({ "global": body.global, "revoked": revoked }),
            },
            &context.audit_context(),
        )
        .await;

    Ok(Json(json!({ "revoked": revoked })))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let services = &state.services;
    let old_token = bearer_from_headers(&headers).unwrap_or("");

    let refreshed = services
        .sessions
        .refresh_session(&body.refresh_token, old_token)
        .await
        .map_err(|e| match e {
            ProviderError::Rejected(reason) => GatewayError::Unauthenticated { reason },
            ProviderError::Unavailable(_) | ProviderError::Timeout => {
                GatewayError::DependencyUnavailable("identity provider".to_string())
            }
        })?;

    services
        .audit
        .log_auth(
            AuthEvent {
                action: actions::TOKEN_REFRESH,
                user_id: context.identity.as_ref().map(|i| i.user_id.clone()),
                session_id: context.identity.as_ref().map(|i| i.session_id.clone()),
                success: true,
                details: json!({}),
            },
            &context.audit_context(),
        )
        .await;

    Ok(Json(json!({
        "access_token": refreshed.access_token,
        "expires_at": refreshed.expires_at,
    })))
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}
