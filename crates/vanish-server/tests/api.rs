use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use vanish_server::{
    build_router,
    clock::{Clock, ManualClock},
    crypto::{generate_key, Cipher},
    reaper::SweepLock,
    store::{ConsumeOutcome, MemoryStore, SecretRecord, SecretStore, StoreError},
    token::TokenGenerator,
    AppState, SecretPolicy, SecretService,
};

const ADMIN_KEY: &str = "test-admin-key";

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

fn app_with(store: Arc<dyn SecretStore>, admin_key: Option<&str>) -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = SecretService::new(
        store,
        Cipher::new(generate_key()),
        TokenGenerator::default(),
        clock.clone(),
        SecretPolicy {
            public_url: "https://vanish.test".into(),
            ..SecretPolicy::default()
        },
    );
    let router = build_router(AppState {
        service,
        admin_key: admin_key.map(str::to_owned),
    });
    TestApp { router, clock }
}

fn app() -> TestApp {
    app_with(Arc::new(MemoryStore::new()), Some(ADMIN_KEY))
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn create(app: &TestApp, body: Value) -> String {
    let (status, json) = send(app, json_request(Method::POST, "/api/secret", body)).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["token"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn root_and_health() {
    let app = app();
    let (status, json) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "vanish");
    assert_eq!(json["status"], "online");

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_then_read_once() {
    let app = app();
    let (status, json) = send(
        &app,
        json_request(
            Method::POST,
            "/api/secret",
            json!({"content": "hunter2", "ttl_minutes": 60}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = json["token"].as_str().unwrap();
    assert_eq!(
        json["url"],
        format!("https://vanish.test/api/secret/{token}")
    );
    assert_eq!(json["has_passphrase"], false);
    let expires_at: DateTime<Utc> = serde_json::from_value(json["expires_at"].clone()).unwrap();
    assert_eq!(expires_at, app.clock.now() + Duration::minutes(60));

    let (status, json) = send(&app, get(&format!("/api/secret/{token}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["content"], "hunter2");
    assert!(json["created_at"].is_string());
    assert!(json["message"].is_string());

    let (status, json) = send(&app, get(&format!("/api/secret/{token}"))).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json["kind"], "gone");
}

#[tokio::test]
async fn validation_errors_are_400() {
    let app = app();
    for body in [
        json!({"content": "", "ttl_minutes": 60}),
        json!({"content": "x", "ttl_minutes": 4}),
        json!({"content": "x", "ttl_minutes": 10_081}),
        json!({"content": "x".repeat(10 * 1024 + 1), "ttl_minutes": 60}),
        json!({"content": "x", "ttl_minutes": 60, "passphrase": "abc"}),
    ] {
        let (status, json) = send(&app, json_request(Method::POST, "/api/secret", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
        assert_eq!(json["kind"], "validation");
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn unknown_token_is_404() {
    let app = app();
    let (status, json) = send(&app, get("/api/secret/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");

    let (status, _) = send(&app, delete("/api/secret/does-not-exist/delete")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request(
            Method::POST,
            "/api/secret/verify",
            json!({"token": "does-not-exist", "passphrase": "whatever"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn passphrase_protected_secret() {
    let app = app();
    let token = create(
        &app,
        json!({"content": "guarded", "ttl_minutes": 60, "passphrase": "secret1"}),
    )
    .await;

    let (status, json) = send(
        &app,
        json_request(
            Method::POST,
            "/api/secret/verify",
            json!({"token": token, "passphrase": "wrong"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], false);

    let (status, json) = send(
        &app,
        json_request(
            Method::POST,
            "/api/secret/verify",
            json!({"token": token, "passphrase": "secret1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["valid"], true);

    let (status, json) = send(&app, get(&format!("/api/secret/{token}"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["kind"], "auth_required");

    let (status, json) = send(&app, get(&format!("/api/secret/{token}?passphrase=wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["kind"], "auth_failed");

    let (status, json) = send(&app, get(&format!("/api/secret/{token}?passphrase=secret1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["content"], "guarded");

    let (status, _) = send(&app, get(&format!("/api/secret/{token}?passphrase=secret1"))).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn delete_is_idempotent_and_blocks_reads() {
    let app = app();
    let token = create(&app, json!({"content": "x", "ttl_minutes": 5})).await;

    let (status, json) = send(&app, delete(&format!("/api/secret/{token}/delete"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, json) = send(&app, delete(&format!("/api/secret/{token}/delete"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, _) = send(&app, get(&format!("/api/secret/{token}"))).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn expired_secret_is_410() {
    let app = app();
    let token = create(&app, json!({"content": "x", "ttl_minutes": 5})).await;
    app.clock.advance(Duration::minutes(5));

    let (status, json) = send(&app, get(&format!("/api/secret/{token}"))).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json["kind"], "gone");
    assert_eq!(json["error"], "secret has expired");
}

#[tokio::test]
async fn admin_purge_requires_key() {
    let app = app();
    create(&app, json!({"content": "short", "ttl_minutes": 5})).await;
    let keep = create(&app, json!({"content": "long", "ttl_minutes": 120})).await;
    app.clock.advance(Duration::minutes(6));

    let (status, _) = send(&app, delete("/api/system/purge")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .method(Method::DELETE)
        .uri("/api/system/purge")
        .header("X-API-Key", "nope")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["kind"], "forbidden");

    let ok = Request::builder()
        .method(Method::DELETE)
        .uri("/api/system/purge")
        .header("X-API-Key", ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, ok).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["deleted_count"], 1);

    let (status, json) = send(&app, get(&format!("/api/secret/{keep}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["content"], "long");
}

#[tokio::test]
async fn admin_purge_conflicts_with_running_sweep() {
    let lock = SweepLock::default();
    let service = SecretService::new(
        Arc::new(MemoryStore::new()),
        Cipher::new(generate_key()),
        TokenGenerator::default(),
        Arc::new(ManualClock::new(Utc::now())),
        SecretPolicy::default(),
    )
    .with_sweep_lock(lock.clone());
    let router = build_router(AppState {
        service,
        admin_key: Some(ADMIN_KEY.into()),
    });
    let purge = || {
        Request::builder()
            .method(Method::DELETE)
            .uri("/api/system/purge")
            .header("X-API-Key", ADMIN_KEY)
            .body(Body::empty())
            .unwrap()
    };

    let held = lock.try_acquire().unwrap();
    let resp = router.clone().oneshot(purge()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["deleted_count"], 0);

    drop(held);
    let resp = router.oneshot(purge()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_absent_without_key() {
    let app = app_with(Arc::new(MemoryStore::new()), None);
    let (status, _) = send(&app, delete("/api/system/purge")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Every call fails, as if the backend were unreachable.
struct UnavailableStore;

#[async_trait]
impl SecretStore for UnavailableStore {
    async fn insert(&self, _record: SecretRecord) -> Result<SecretRecord, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
    }

    async fn find_by_token(&self, _token: &str) -> Result<Option<SecretRecord>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
    }

    async fn mark_consumed(
        &self,
        _token: &str,
        _at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
    }

    async fn mark_destroyed(&self, _token: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
    }

    async fn find_expired(&self, _now: DateTime<Utc>) -> Result<Vec<SecretRecord>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("connection refused")))
    }

    fn supports_conditional_update(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn store_failure_is_retryable_500_without_detail() {
    let app = app_with(Arc::new(UnavailableStore), None);
    let resp = app
        .router
        .clone()
        .oneshot(get("/api/secret/anything"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()[header::RETRY_AFTER], "5");

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["kind"], "unavailable");
    assert_eq!(json["retry_after_secs"], 5);
    assert!(!json["error"].as_str().unwrap().contains("connection refused"));
}
