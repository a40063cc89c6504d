#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use npt_lib::test_support::{
    context_from_pairs, token_bundle_from_response, CommandContext, TokenBundle, TokenSource,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::TempDir;
use tokio::sync::oneshot;

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const REDIRECT_URI: &str = "http://localhost:53682/cb";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub notion_version: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct Inner {
    token_responses: VecDeque<(u16, String)>,
    token_requests: Vec<RecordedRequest>,
    api_requests: Vec<RecordedRequest>,
}

#[derive(Clone, Default)]
struct ProviderState {
    inner: Arc<Mutex<Inner>>,
}

impl ProviderState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("lock fake provider")
    }
}

fn record(path: String, headers: &HeaderMap, body: Value) -> RecordedRequest {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RecordedRequest {
        path,
        authorization: header("authorization"),
        notion_version: header("notion-version"),
        body,
    }
}

async fn token_endpoint(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let mut inner = state.lock();
    inner
        .token_requests
        .push(record("/v1/oauth/token".to_string(), &headers, body));
    let (status, body) = inner
        .token_responses
        .pop_front()
        .unwrap_or((500, json!({"error": "no scripted response"}).to_string()));
    (
        StatusCode::from_u16(status).expect("status"),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

fn page(id: &str, status: &str, title: &str) -> Value {
    json!({
        "object": "page",
        "id": id,
        "url": format!("https://www.notion.so/{id}"),
        "created_time": "2026-01-01T00:00:00.000Z",
        "last_edited_time": "2026-01-02T00:00:00.000Z",
        "properties": {
            "状态": {"type": "select", "select": {"name": status}},
            "任务": {"type": "title", "title": [{"plain_text": title}]}
        }
    })
}

async fn query_endpoint(
    State(state): State<ProviderState>,
    Path(data_source_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let cursor = body
        .get("start_cursor")
        .and_then(Value::as_str)
        .map(str::to_string);
    state.lock().api_requests.push(record(
        format!("/v1/data_sources/{data_source_id}/query"),
        &headers,
        body,
    ));

    match cursor.as_deref() {
        None => Json(json!({
            "object": "list",
            "results": [page("p1", "进行中", "Fix login"), page("p2", "已阻塞", "Wait on API")],
            "has_more": true,
            "next_cursor": "cursor-2"
        })),
        Some(_) => Json(json!({
            "object": "list",
            "results": [page("p3", "待办", "Write docs"), page("p4", "完成", "Old task")],
            "has_more": false,
            "next_cursor": null
        })),
    }
}

async fn comments_endpoint(
    State(state): State<ProviderState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state
        .lock()
        .api_requests
        .push(record("/v1/comments".to_string(), &headers, body));
    Json(json!({
        "object": "comment",
        "id": "comment-1",
        "url": "https://www.notion.so/comment-1"
    }))
}

/// Loopback stand-in for the provider's token endpoint and REST API.
pub struct FakeProvider {
    pub base_url: String,
    state: ProviderState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeProvider {
    pub async fn start() -> Self {
        let state = ProviderState::default();
        let app = Router::new()
            .route("/v1/oauth/token", post(token_endpoint))
            .route("/v1/data_sources/:id/query", post(query_endpoint))
            .route("/v1/comments", post(comments_endpoint))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind fake provider");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/v1/oauth/token", self.base_url)
    }

    pub fn api_base(&self) -> String {
        format!("{}/v1", self.base_url)
    }

    pub fn push_token_response(&self, status: u16, body: Value) {
        self.push_raw_token_response(status, &body.to_string());
    }

    /// Scripts a reply body sent verbatim, e.g. an HTML error page from a proxy.
    pub fn push_raw_token_response(&self, status: u16, body: &str) {
        self.state
            .lock()
            .token_responses
            .push_back((status, body.to_string()));
    }

    pub fn token_requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().token_requests.clone()
    }

    pub fn api_requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().api_requests.clone()
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub provider: FakeProvider,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            provider: FakeProvider::start().await,
        }
    }

    pub fn token_path(&self) -> std::path::PathBuf {
        self.dir.path().join("notion-oauth.json")
    }

    pub fn state_path(&self) -> std::path::PathBuf {
        self.dir.path().join("notion-oauth-state.json")
    }

    /// File-backed context wired to the fake provider; `extra` overrides or adds variables.
    pub fn context(&self, extra: &[(&str, &str)]) -> CommandContext {
        let token_path = self.token_path().to_string_lossy().to_string();
        let state_path = self.state_path().to_string_lossy().to_string();
        let token_url = self.provider.token_url();
        let api_base = self.provider.api_base();
        let authorize_url = format!("{}/v1/oauth/authorize", self.provider.base_url);

        let mut pairs: Vec<(&str, &str)> = vec![
            ("NPT_TOKEN_STORE", "file"),
            ("NPT_OAUTH_TOKEN_PATH", token_path.as_str()),
            ("NPT_OAUTH_STATE_PATH", state_path.as_str()),
            ("NPT_NOTION_TOKEN_URL", token_url.as_str()),
            ("NPT_NOTION_API_BASE", api_base.as_str()),
            ("NPT_NOTION_AUTHORIZE_URL", authorize_url.as_str()),
            ("NOTION_OAUTH_CLIENT_ID", CLIENT_ID),
            ("NOTION_OAUTH_CLIENT_SECRET", CLIENT_SECRET),
            ("NOTION_OAUTH_REDIRECT_URI", REDIRECT_URI),
        ];
        for (key, value) in extra {
            pairs.retain(|(k, _)| k != key);
            pairs.push((*key, *value));
        }
        context_from_pairs(&pairs).expect("context")
    }
}

/// Bundle acquired now whose access token expires in `expires_in` seconds.
pub fn bundle(access: &str, refresh: Option<&str>, expires_in: i64) -> TokenBundle {
    let mut raw = json!({
        "access_token": access,
        "expires_in": expires_in,
        "workspace_id": "ws-1",
        "workspace_name": "Acme",
        "owner": {"type": "user"},
        "bot_id": "bot-1"
    });
    if let Some(refresh) = refresh {
        raw["refresh_token"] = json!(refresh);
    }
    let now = chrono::DateTime::from_timestamp(chrono::Utc::now().timestamp(), 0).expect("now");
    token_bundle_from_response(raw, TokenSource::OauthExchange, now).expect("bundle")
}

/// Like [`bundle`], but the access token already expired `seconds_ago` seconds back.
pub fn expired_bundle(access: &str, refresh: Option<&str>, seconds_ago: i64) -> TokenBundle {
    let mut expired = bundle(access, refresh, 3600);
    expired.expires_at = Some(expired.acquired_at - chrono::Duration::seconds(seconds_ago));
    expired
}

/// Token endpoint URL on a loopback port nothing listens on.
pub fn closed_token_url() -> String {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("free port")
        .port();
    format!("http://127.0.0.1:{port}/v1/oauth/token")
}

pub fn basic_auth() -> String {
    use base64::Engine as _;
    let pair = format!("{CLIENT_ID}:{CLIENT_SECRET}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(pair)
    )
}

pub fn json_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field {key} in {value}"))
        .to_string()
}

pub fn json_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field {key} in {value}"))
}

/// Plain HTTP client that ignores proxy variables so loopback requests stay local.
pub fn local_http() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("http client")
}
