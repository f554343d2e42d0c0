//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Result submission requires the internal secret
//! - Malformed and unknown-monitor submissions map to 400 and 404
//! - Accepted results drive incidents
//! - Monitor registration assigns a slug in the background

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Value, json};
use upwatch::{
    api::{ApiConfig, ApiState, spawn_api_server},
    config::SlugConfig,
    slug::{RetryPolicy, SlugAllocator, SlugHandle, seed_tickets},
    storage::StorageBackend,
};

use crate::helpers::{DB_TIMEOUT, ingest_fixture, new_monitor, now_millis, sqlite_store};

const SECRET: &str = "test-secret";

struct TestApi {
    addr: SocketAddr,
    store: Arc<dyn StorageBackend>,
    slugs: SlugHandle,
    _dir: tempfile::TempDir,
}

impl TestApi {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn spawn_test_api() -> TestApi {
    let (store, dir) = sqlite_store().await;
    seed_tickets(store.as_ref(), &SlugConfig::default()).await.unwrap();

    let fx = ingest_fixture(store.clone());
    let slugs = SlugHandle::spawn(
        SlugAllocator::new(store.clone(), DB_TIMEOUT),
        RetryPolicy::default(),
    );

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        internal_secret: SECRET.to_string(),
        enable_cors: true,
    };
    let state = ApiState::new(store.clone(), fx.ingestor, slugs.clone());
    let addr = spawn_api_server(config, state).await.unwrap();

    TestApi {
        addr,
        store,
        slugs,
        _dir: dir,
    }
}

async fn monitor_id(api: &TestApi) -> i64 {
    api.store
        .insert_monitor(new_monitor(&["us-east-1"]), now_millis())
        .await
        .unwrap()
        .id
}

fn result_body(monitor_id: i64, is_up: bool) -> Value {
    json!({
        "monitorId": monitor_id,
        "region": "us-east-1",
        "statusCode": if is_up { 200 } else { 500 },
        "isUp": is_up,
        "responseTime": 321,
        "errorMessage": if is_up { Value::Null } else { json!("Internal Server Error") },
    })
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let api = spawn_test_api().await;

    let response = reqwest::get(api.url("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["metadata"]["backend"], "sqlite");
}

#[tokio::test]
async fn test_missing_or_wrong_token_is_forbidden() {
    let api = spawn_test_api().await;
    let id = monitor_id(&api).await;
    let client = reqwest::Client::new();

    let missing = client
        .post(api.url("/api/v1/results"))
        .json(&result_body(id, true))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let wrong = client
        .post(api.url("/save-result"))
        .bearer_auth("nope")
        .json(&result_body(id, true))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let body: Value = wrong.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "FORBIDDEN");

    assert!(api.store.latest_results(id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_result_is_bad_request() {
    let api = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(api.url("/api/v1/results"))
        .bearer_auth(SECRET)
        .json(&json!({ "monitorId": "seven", "region": "us-east-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["message"], "Invalid input");
    assert!(body["details"]["reason"].is_string());

    let mut empty_region = result_body(1, true);
    empty_region["region"] = json!("");
    let response = client
        .post(api.url("/api/v1/results"))
        .bearer_auth(SECRET)
        .json(&empty_region)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_monitor_is_not_found() {
    let api = spawn_test_api().await;

    let response = reqwest::Client::new()
        .post(api.url("/api/v1/results"))
        .bearer_auth(SECRET)
        .json(&result_body(4242, false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_status_code_zero_is_recorded_as_outage() {
    let api = spawn_test_api().await;
    let id = monitor_id(&api).await;

    let mut body = result_body(id, false);
    body["statusCode"] = json!(0);
    body["errorMessage"] = json!("connect ECONNREFUSED");

    let response = reqwest::Client::new()
        .post(api.url("/api/v1/results"))
        .bearer_auth(SECRET)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let open = api.store.open_incidents(id).await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn test_saved_result_opens_and_resolves_incident() {
    let api = spawn_test_api().await;
    let id = monitor_id(&api).await;
    let client = reqwest::Client::new();

    let response = client
        .post(api.url("/save-result"))
        .bearer_auth(SECRET)
        .json(&result_body(id, false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "status": "success", "message": "Monitor result saved" })
    );
    assert_eq!(api.store.open_incidents(id).await.unwrap().len(), 1);

    let response = client
        .post(api.url("/api/v1/results"))
        .bearer_auth(SECRET)
        .json(&result_body(id, true))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(api.store.open_incidents(id).await.unwrap().is_empty());

    let detail: Value = client
        .get(api.url(&format!("/api/v1/monitors/{id}")))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["openIncidents"], json!([]));
}

#[tokio::test]
async fn test_register_monitor_assigns_slug() {
    let api = spawn_test_api().await;
    let client = reqwest::Client::new();

    let response = client
        .post(api.url("/api/v1/monitors"))
        .bearer_auth(SECRET)
        .json(&json!({
            "userId": 3,
            "websiteName": "Docs",
            "url": "https://docs.example.com",
            "regions": ["us-east-1", "eu-west-1"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let created: Value = response.json().await.unwrap();
    assert_eq!(created["method"], "GET");
    assert_eq!(created["expectedStatus"], 200);
    assert_eq!(created["lastCheckedAt"], Value::Null);
    let id = created["id"].as_i64().unwrap();

    // Wait for the background assignment
    assert_eq!(api.slugs.stats().await.unwrap().assigned, 1);

    let detail: Value = client
        .get(api.url(&format!("/api/v1/monitors/{id}")))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(detail["monitor"]["slug"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn test_register_monitor_without_regions_is_rejected() {
    let api = spawn_test_api().await;

    let response = reqwest::Client::new()
        .post(api.url("/api/v1/monitors"))
        .bearer_auth(SECRET)
        .json(&json!({
            "userId": 3,
            "websiteName": "Docs",
            "url": "https://docs.example.com",
            "regions": []
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_add_recipient() {
    let api = spawn_test_api().await;
    let id = monitor_id(&api).await;
    let client = reqwest::Client::new();

    let created = client
        .post(api.url(&format!("/api/v1/monitors/{id}/recipients")))
        .bearer_auth(SECRET)
        .json(&json!({ "email": "oncall@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let duplicate = client
        .post(api.url(&format!("/api/v1/monitors/{id}/recipients")))
        .bearer_auth(SECRET)
        .json(&json!({ "email": "oncall@example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let invalid = client
        .post(api.url(&format!("/api/v1/monitors/{id}/recipients")))
        .bearer_auth(SECRET)
        .json(&json!({ "email": "oncall" }))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    assert_eq!(api.store.recipients(id).await.unwrap().len(), 1);
}
