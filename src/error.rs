//! Error taxonomy for the security pipeline.
//!
//! # Design Decisions
//! - One variant per user-visible failure class (401/403/429/503)
//! - Denials carry enough metadata to emit rate-limit headers
//! - Audit/telemetry failures are never represented here; they are
//!   swallowed at the call site and must not abort a request

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Typed, stage-terminating errors raised by the request pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No, invalid, expired, or revoked credential. Recoverable by
    /// re-authenticating.
    #[error("unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    /// Authenticated but lacking the required permission.
    #[error("forbidden: missing permission '{permission}'")]
    Forbidden { permission: String },

    /// Fixed-window budget exhausted. Transient.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        limit: u32,
        reset_epoch_secs: u64,
        retry_after_secs: u64,
    },

    /// Source address under a brute-force block.
    #[error("source address blocked, retry after {retry_after_secs}s")]
    Blocked {
        blocked_until_epoch_secs: u64,
        retry_after_secs: u64,
    },

    /// Identity provider or external store unreachable.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Anything that should never surface in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } | GatewayError::Blocked { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let mut response = (status, message).into_response();

        match self {
            GatewayError::RateLimited {
                limit,
                reset_epoch_secs,
                retry_after_secs,
            } => {
                let headers = response.headers_mut();
                headers.insert("x-ratelimit-limit", int_header(limit as u64));
                headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
                headers.insert("x-ratelimit-reset", int_header(reset_epoch_secs));
                headers.insert(header::RETRY_AFTER, int_header(retry_after_secs));
            }
            GatewayError::Blocked {
                retry_after_secs, ..
            } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, int_header(retry_after_secs));
            }
            _ => {}
        }

        response
    }
}

fn int_header(v: u64) -> HeaderValue {
    HeaderValue::from_str(&v.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}
