//! External identity provider client.
//!
//! The provider is the source of truth for subject identity. Every call
//! is timeout-bounded so a stalled provider degrades to cheap denial
//! instead of holding the pipeline open.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use url::Url;

/// Identity confirmed by the provider for a presented token.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: Option<String>,
}

/// Result of exchanging a refresh token.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Seconds since epoch.
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
    /// Drop the provider-side session for this token only.
    Local,
    /// Drop every provider-side session for the subject.
    Global,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered and said no.
    #[error("provider rejected the credential: {0}")]
    Rejected(String),
    /// The provider could not be reached or answered garbage.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider call timed out")]
    Timeout,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, ProviderError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError>;

    /// Best-effort; callers must not roll back local state when this
    /// fails.
    async fn sign_out(&self, token: &str, scope: SignOutScope) -> Result<(), ProviderError>;
}

/// HTTP client for a hosted identity provider.
pub struct HttpIdentityProvider {
    client: Client<HttpConnector, Body>,
    base_url: Url,
    api_key: String,
    timeout: Duration,
}

impl HttpIdentityProvider {
    pub fn new(base_url: Url, api_key: String, timeout_secs: u64) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            base_url,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        bearer: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(u16, Vec<u8>), ProviderError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let request = Request::builder()
            .method(method)
            .uri(url.as_str())
            .header("authorization", format!("Bearer {}", bearer))
            .header("apikey", &self.api_key)
            .header("content-type", "application/json")
            .body(match &body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let response_future = self.client.request(request);
        let response = match time::timeout(self.timeout, response_future).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return Err(ProviderError::Unavailable(e.to_string())),
            Err(_) => return Err(ProviderError::Timeout),
        };

        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), 64 * 1024)
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok((status, bytes.to_vec()))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, ProviderError> {
        let (status, body) = self.call("GET", "auth/v1/user", token, None).await?;
        if status == 200 {
            serde_json::from_slice(&body)
                .map_err(|e| ProviderError::Unavailable(format!("malformed verify response: {e}")))
        } else if status < 500 {
            Err(ProviderError::Rejected(format!("status {status}")))
        } else {
            Err(ProviderError::Unavailable(format!("status {status}")))
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
        let (status, body) = self
            .call(
                "POST",
                "auth/v1/token?grant_type=refresh_token",
                refresh_token,
                Some(serde_json::json!({ "refresh_token": refresh_token })),
            )
            .await?;
        if status == 200 {
            serde_json::from_slice(&body)
                .map_err(|e| ProviderError::Unavailable(format!("malformed refresh response: {e}")))
        } else if status < 500 {
            Err(ProviderError::Rejected(format!("status {status}")))
        } else {
            Err(ProviderError::Unavailable(format!("status {status}")))
        }
    }

    async fn sign_out(&self, token: &str, scope: SignOutScope) -> Result<(), ProviderError> {
        let path = match scope {
            SignOutScope::Local => "auth/v1/logout?scope=local",
            SignOutScope::Global => "auth/v1/logout?scope=global",
        };
        let (status, _) = self.call("POST", path, token, None).await?;
        if status < 400 {
            Ok(())
        } else {
            Err(ProviderError::Rejected(format!("status {status}")))
        }
    }
}
