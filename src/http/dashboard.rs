//! Admin dashboard API.
//!
//! # Responsibilities
//! - Component status snapshot for operators
//! - Recent metrics/logs/rate-limit views from the in-memory buffers
//! - Aggregate stats over a trailing window
//! - Live WebSocket feed of observability events
//!
//! # Design Decisions
//! - Disabled admin surface answers 404 so probes can't distinguish
//!   it from an absent route
//! - Static bearer key, compared verbatim; rotation happens via
//!   config reload

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use axum::body::Body;
use axum::extract::Extension;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use crate::audit::{actions, AuthEvent};
use crate::http::server::AppState;
use crate::observability::LiveEvent;
use crate::pipeline::RequestContext;
use crate::store::RevocationReason;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/recent", get(recent))
        .route("/stats", get(stats))
        .route("/live", get(live))
        .route("/sessions/revoke", post(revoke_sessions))
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

/// Gate on the admin bearer key. Runs after the security pipeline, so
/// the request already carries a context; the key is checked on top.
async fn admin_auth(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load();
    if !config.admin.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(key) if key == config.admin.api_key => next.run(request).await,
        _ => {
            tracing::warn!("Admin request rejected: bad or missing API key");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config.load();
    let services = &state.services;

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": crate::clock::unix_secs(),
        "rate_limit": {
            "enabled": config.rate_limit.enabled,
            "window_secs": config.rate_limit.window_secs,
            "default_limit": config.rate_limit.default_limit,
            "auth_limit": config.rate_limit.auth_limit,
        },
        "brute_force": {
            "enabled": config.brute_force.enabled,
            "steps": config.brute_force.steps,
        },
        "permissions": {
            "cache_ttl_secs": config.permissions.cache_ttl_secs,
            "cached_entries": services.permissions.cached_entries(),
        },
        "live_subscribers": services.observability.subscriber_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(50).min(500);
    let snapshot = state.services.observability.get_recent(limit);
    Json(json!(snapshot))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    window_minutes: Option<u64>,
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Json<serde_json::Value> {
    let window = query.window_minutes.unwrap_or(5).clamp(1, 1440);
    let summary = state.services.observability.get_stats(window);
    Json(json!(summary))
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    user_id: String,
    /// Marks the revocation as a security response rather than routine
    /// administration, which raises it in the audit trail.
    #[serde(default)]
    compromised: bool,
}

/// Revoke every session a user holds and drop their cached permission
/// set, so the next bearer presentation re-validates from scratch.
async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<RevokeRequest>,
) -> Json<serde_json::Value> {
    let services = &state.services;
    let reason = if body.compromised {
        RevocationReason::Security
    } else {
        RevocationReason::Admin
    };

    let revoked = services
        .sessions
        .invalidate_user_sessions(&body.user_id, reason, None)
        .await;
    services.permissions.invalidate(&body.user_id);

    services
        .audit
        .log_auth(
            AuthEvent {
                action: actions::SESSION_REVOKED,
                user_id: Some(body.user_id.clone()),
                session_id: None,
                success: true,
                details: json!({ "revoked": revoked, "reason": reason }),
            },
            &context.audit_context(),
        )
        .await;

    Json(json!({ "revoked": revoked, "reason": reason }))
}

async fn live(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let rx = state.services.observability.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx))
}

/// Pump broadcast events to the socket until either side hangs up.
/// A lagged subscriber skips ahead rather than disconnecting.
async fn stream_events(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<LiveEvent>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize live event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped = skipped, "Live feed subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
