//! Shared utilities for integration testing.

use async_trait::async_trait;
use base64::Engine as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use auth_gateway::auth::claims;
use auth_gateway::auth::provider::{
    IdentityProvider, ProviderError, RefreshedTokens, SignOutScope, VerifiedIdentity,
};
use auth_gateway::store::MemoryStore;
use auth_gateway::{GatewayConfig, HttpServer, Shutdown};

/// Build a compact three-segment token carrying the given claims.
pub fn make_token(subject: &str, issued_at: u64, expires_at: u64) -> String {
    make_token_with(&serde_json::json!({
        "sub": subject,
        "email": format!("{subject}@example.com"),
        "iat": issued_at,
        "exp": expires_at,
    }))
}

pub fn make_token_with(claims: &serde_json::Value) -> String {
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.sig",
        engine.encode(r#"{"alg":"none"}"#),
        engine.encode(claims.to_string()),
    )
}

/// Identity provider that trusts any decodable token, so tests control
/// outcomes entirely through the claims they encode. Subjects starting
/// with `reject` are refused.
pub struct ScriptedProvider {
    pub verify_calls: AtomicUsize,
    pub sign_outs: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            verify_calls: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, ProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let claims = claims::decode_claims(token)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;
        if claims.subject.starts_with("reject") {
            return Err(ProviderError::Rejected("scripted rejection".into()));
        }
        Ok(VerifiedIdentity {
            subject: claims.subject,
            email: claims.email,
        })
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshedTokens, ProviderError> {
        if refresh_token != "good-refresh" {
            return Err(ProviderError::Rejected("unknown refresh token".into()));
        }
        let now = auth_gateway::clock::unix_secs();
        Ok(RefreshedTokens {
            access_token: make_token("refreshed-user", now, now + 3600),
            expires_at: now + 3600,
        })
    }

    async fn sign_out(&self, _token: &str, _scope: SignOutScope) -> Result<(), ProviderError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    // Dropping this would stop the server mid-test.
    _shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a gateway on an ephemeral port with an in-memory store and a
/// scripted identity provider.
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config, store.clone(), provider.clone(), &shutdown);
    let (_config_tx, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    // Wait for the listener to start serving
    tokio::time::sleep(Duration::from_millis(100)).await;

    TestGateway {
        addr,
        store,
        provider,
        _shutdown: shutdown,
    }
}
