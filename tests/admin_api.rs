//! Tests for the admin dashboard API.

use std::time::Duration;

use auth_gateway::store::{RevocationReason, SecurityStore};
use auth_gateway::GatewayConfig;

mod common;
use common::{make_token, spawn_gateway};

const ADMIN_KEY: &str = "test-admin-key";

fn admin_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

#[tokio::test]
async fn test_disabled_admin_surface_is_absent() {
    let gateway = spawn_gateway(GatewayConfig::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}

#[tokio::test]
async fn test_admin_requires_api_key() {
    let gateway = spawn_gateway(admin_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(gateway.url("/admin/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth("wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn test_status_reports_component_settings() {
    let gateway = spawn_gateway(admin_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["rate_limit"]["enabled"], true);
    assert_eq!(body["rate_limit"]["window_secs"], 60);
    assert_eq!(body["brute_force"]["steps"][0]["failures"], 3);
}

#[tokio::test]
async fn test_recent_and_stats_reflect_traffic() {
    let gateway = spawn_gateway(admin_config()).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        client.get(gateway.url("/time")).send().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let res = client
        .get(gateway.url("/admin/recent?limit=10"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    let metrics = body["metrics"].as_array().unwrap();
    assert!(metrics.iter().any(|m| m["endpoint"] == "/time"));
    assert!(!body["logs"].as_array().unwrap().is_empty());

    let res = client
        .get(gateway.url("/admin/stats?window_minutes=5"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["total_requests"].as_u64().unwrap() >= 5);
    assert!(body["success_rate"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_revoke_endpoint_kills_user_sessions() {
    let gateway = spawn_gateway(admin_config()).await;
    let client = reqwest::Client::new();
    let now = auth_gateway::clock::unix_secs();
    let token = make_token("victim", now, now + 3600);

    // Establish a session through the pipeline first.
    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let res = client
        .post(gateway.url("/admin/sessions/revoke"))
        .bearer_auth(ADMIN_KEY)
        .json(&serde_json::json!({ "user_id": "victim", "compromised": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["revoked"], 1);
    assert_eq!(body["reason"], "security");

    let row = gateway
        .store
        .fetch_session(&format!("victim_{now}"))
        .await
        .unwrap()
        .unwrap();
    assert!(row.revoked);
    assert_eq!(row.revoked_reason, Some(RevocationReason::Security));

    // The revoked token no longer authenticates.
    let res = client
        .get(gateway.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    // Without the compromised flag the revocation reads as routine
    // administration, and a user with no sessions revokes nothing.
    let res = client
        .post(gateway.url("/admin/sessions/revoke"))
        .bearer_auth(ADMIN_KEY)
        .json(&serde_json::json!({ "user_id": "nobody" }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["revoked"], 0);
    assert_eq!(body["reason"], "admin");
}
