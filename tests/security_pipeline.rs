//! End-to-end tests for the request security pipeline.

use std::time::Duration;

use auth_gateway::clock;
use auth_gateway::store::SecurityStore;
use auth_gateway::GatewayConfig;

mod common;
use common::{make_token, make_token_with, spawn_gateway};

fn test_config() -> GatewayConfig {
    GatewayConfig::default()
}

#[tokio::test]
async fn test_request_id_on_every_response() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let res = client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let id = res.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());

    // Inbound IDs are preserved, not replaced
    let res = client
        .get(gateway.url("/time"))
        .header("x-request-id", "caller-supplied-1")
        .send()
        .await
        .unwrap();
    assert_eq!(
        res.headers().get("x-request-id").unwrap(),
        "caller-supplied-1"
    );
}

#[tokio::test]
async fn test_whoami_requires_token() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let res = client.get(gateway.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn test_whoami_with_valid_token() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let token = make_token("user-alpha", now - 10, now + 3600);

    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], "user-alpha");
    assert_eq!(body["session_id"], format!("user-alpha_{}", now - 10));
    assert_eq!(body["needs_refresh"], false);
    let permissions = body["permissions"].as_array().unwrap();
    assert!(permissions.iter().any(|p| p == "profile:view"));
    assert!(!permissions.iter().any(|p| p == "users:manage"));

    // The session row was persisted
    let session = gateway
        .store
        .fetch_session(&format!("user-alpha_{}", now - 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.user_id, "user-alpha");
    assert!(!session.revoked);
}

#[tokio::test]
async fn test_admin_role_gets_elevated_permissions() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let token = make_token_with(&serde_json::json!({
        "sub": "admin-user",
        "iat": now - 10,
        "exp": now + 3600,
        "role": "admin",
    }));

    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    let permissions = body["permissions"].as_array().unwrap();
    assert!(permissions.iter().any(|p| p == "users:manage"));
    assert!(permissions.iter().any(|p| p == "profile:view"));
}

#[tokio::test]
async fn test_suspended_user_has_no_permissions() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let token = make_token_with(&serde_json::json!({
        "sub": "suspended-user",
        "iat": now - 10,
        "exp": now + 3600,
        "suspended": true,
    }));

    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["permissions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_access_is_ownership_scoped() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let member = make_token("user-alpha", now - 10, now + 3600);

    // Own profile reads fine.
    let res = client
        .get(gateway.url("/profile/user-alpha"))
        .bearer_auth(&member)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["user_id"], "user-alpha");
    assert_eq!(body["email"], "user-alpha@example.com");

    // Another member's profile is forbidden, not unauthorized.
    let res = client
        .get(gateway.url("/profile/user-beta"))
        .bearer_auth(&member)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    // No token at all is unauthorized.
    let res = client
        .get(gateway.url("/profile/user-alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    // Admins hold users:manage and can cross the ownership line.
    let admin = make_token_with(&serde_json::json!({
        "sub": "admin-user",
        "iat": now - 10,
        "exp": now + 3600,
        "role": "admin",
    }));
    let res = client
        .get(gateway.url("/profile/user-alpha"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["own_profile"], false);
    assert!(body["email"].is_null());
}

#[tokio::test]
async fn test_needs_refresh_near_expiry() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    // Inside the default 300 second refresh window
    let token = make_token("user-beta", now - 10, now + 120);

    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["needs_refresh"], true);
}

#[tokio::test]
async fn test_expired_token_rejected_without_provider_call() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let token = make_token("user-gamma", now - 7200, now - 3600);

    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
    assert_eq!(
        gateway
            .provider
            .verify_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn test_rate_limit_budget_exhaustion() {
    let mut config = test_config();
    config.rate_limit.default_limit = 3;
    let gateway = spawn_gateway(config).await;
    let client = reqwest::Client::new();

    // Anonymous /whoami answers 401 but still consumes budget
    let mut remaining_seen = Vec::new();
    for _ in 0..3 {
        let res = client.get(gateway.url("/whoami")).send().await.unwrap();
        assert_eq!(res.status(), 401);
        remaining_seen.push(
            res.headers()
                .get("x-ratelimit-remaining")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string(),
        );
    }
    assert_eq!(remaining_seen, vec!["2", "1", "0"]);

    let res = client.get(gateway.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers().get("x-ratelimit-limit").unwrap(), "3");
    assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");
    let retry_after: u64 = res
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    // The rejection lands in the audit trail
    tokio::time::sleep(Duration::from_millis(200)).await;
    let entries = gateway.store.recent_audit(20).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.action == "security.rate_limit_exceeded"));
}

#[tokio::test]
async fn test_exempt_endpoints_skip_rate_limiting() {
    let mut config = test_config();
    config.rate_limit.default_limit = 2;
    let gateway = spawn_gateway(config).await;
    let client = reqwest::Client::new();

    for _ in 0..10 {
        let res = client.get(gateway.url("/health")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().get("x-ratelimit-remaining").is_none());
    }
}

#[tokio::test]
async fn test_failed_logins_escalate_to_block() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    // Three malformed credentials cross the first backoff threshold
    for _ in 0..3 {
        let res = client
            .post(gateway.url("/auth/login"))
            .json(&serde_json::json!({ "token": "not-a-valid-token" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 401);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let attempt = gateway
        .store
        .fetch_attempt("127.0.0.1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.failure_count, 3);
    assert!(attempt.blocked_until.is_some());

    let entries = gateway.store.recent_audit(20).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.action == "security.suspicious_activity"));

    // Every subsequent request from the address is refused outright
    let res = client.get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 429);
    assert!(res.headers().get("retry-after").is_some());
}

#[tokio::test]
async fn test_successful_login_clears_failure_history() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    // Two failures stay below the block threshold
    for _ in 0..2 {
        let res = client
            .post(gateway.url("/auth/login"))
            .json(&serde_json::json!({ "token": "garbage" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 401);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(gateway
        .store
        .fetch_attempt("127.0.0.1")
        .await
        .unwrap()
        .is_some());

    let now = clock::unix_secs();
    let token = make_token("user-delta", now - 10, now + 3600);
    let res = client
        .post(gateway.url("/auth/login"))
        .json(&serde_json::json!({ "token": token }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["valid"], true);
    assert_eq!(body["user_id"], "user-delta");

    assert!(gateway
        .store
        .fetch_attempt("127.0.0.1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let token = make_token("user-epsilon", now - 10, now + 3600);

    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .post(gateway.url("/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["revoked"], 1);

    // Local revocation is mirrored upstream.
    assert_eq!(
        gateway
            .provider
            .sign_outs
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // The revoked session no longer authenticates
    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn test_refresh_rotates_session() {
    let gateway = spawn_gateway(test_config()).await;
    let client = reqwest::Client::new();

    let now = clock::unix_secs();
    let old_token = make_token("user-zeta", now - 10, now + 60);

    // Establish the session first
    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&old_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .post(gateway.url("/auth/refresh"))
        .bearer_auth(&old_token)
        .json(&serde_json::json!({ "refresh_token": "good-refresh" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["access_token"].as_str().unwrap().contains('.'));

    // The superseded session was revoked
    let session = gateway
        .store
        .fetch_session(&format!("user-zeta_{}", now - 10))
        .await
        .unwrap()
        .unwrap();
    assert!(session.revoked);

    let res = client
        .post(gateway.url("/auth/refresh"))
        .json(&serde_json::json!({ "refresh_token": "stale-refresh" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}
