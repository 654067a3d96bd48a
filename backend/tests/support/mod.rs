#![allow(dead_code)]
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use tenantgate_backend::{
    config::{Config, StorageBackend},
    db::MemoryScopeBackend,
    routes::router,
    state::{AppState, InMemoryBackends},
    types::WorkspaceId,
    utils::time::Clock,
};

pub const ADMIN_KEY: &str = "test-admin-key-0123456789";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".into(),
        storage_backend: StorageBackend::Memory,
        redis_url: None,
        redis_pool_size: 1,
        redis_connect_timeout: 1,
        jwt_secret: "test-jwt-secret-with-enough-length".into(),
        access_token_ttl_minutes: 15,
        refresh_token_rolling_days: 7,
        refresh_token_absolute_days: 30,
        access_token_grace_seconds: 30,
        storage_timeout_ms: 2_000,
        session_sweep_interval_seconds: 300,
        exchange_code_ttl_seconds: 60,
        admin_api_key: Some(ADMIN_KEY.into()),
        cors_allow_origins: vec!["*".into()],
        bind_addr: "127.0.0.1:0".into(),
    }
}

/// Clock the tests move by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid start");
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub backends: InMemoryBackends,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new());
        let (state, backends) = AppState::in_memory(config, clock.clone());
        Self {
            router: router(state.clone()),
            state,
            backends,
            clock,
        }
    }

    /// Builds the app over a caller-configured tenant scope backend.
    pub fn with_scope(build: impl FnOnce(&InMemoryBackends) -> MemoryScopeBackend) -> Self {
        let clock = Arc::new(ManualClock::new());
        let backends = InMemoryBackends::new();
        let scope = build(&backends);
        let state = AppState::from_memory(test_config(), clock.clone(), &backends, scope);
        Self {
            router: router(state.clone()),
            state,
            backends,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(json_request(Method::POST, uri, bearer, Some(body)))
            .await
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.send(json_request(Method::GET, uri, bearer, None)).await
    }

    /// Mints a write key for a fresh workspace.
    pub async fn workspace_with_key(&self) -> (WorkspaceId, String) {
        let workspace_id = WorkspaceId::new();
        let issued = self
            .state
            .write_keys
            .create(workspace_id)
            .await
            .expect("create write key");
        (workspace_id, issued.write_key)
    }

    /// Creates a session through the API and returns its token pair.
    pub async fn create_session(&self, workspace_id: WorkspaceId, key: &str) -> Value {
        let (status, body) = self
            .post(
                "/sessions",
                Some(key),
                serde_json::json!({ "workspaceId": workspace_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create session: {body}");
        body
    }
}

pub fn json_request(
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn str_field<'a>(body: &'a Value, field: &str) -> &'a str {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing string field `{field}` in {body}"))
}

/// POST with an arbitrary body, optionally without a content type.
pub fn raw_post(uri: &str, content_type: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method(Method::POST).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}
