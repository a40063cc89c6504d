//! Usage: Single-use loopback listener that captures the OAuth authorization redirect.
//!
//! Lifecycle: a parsed [`LoopbackRedirect`] is idle; [`CallbackListener::bind`] starts listening;
//! [`CallbackListener::wait`] consumes the listener, resolves to received or timed out, and always
//! tears the server down before returning. Dropping an unwaited listener also releases it.

use crate::shared::error::{AppError, AppResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::constant_time_eq;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use reqwest::Url;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SUCCESS_HTML: &str = "<!doctype html><html><body><p>NPT OAuth success. You can close this tab and return to terminal.</p></body></html>";
const FAILURE_HTML: &str =
    "<!doctype html><html><body><p>NPT OAuth failed. You can close this tab.</p></body></html>";
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Query parameters of the provider redirect; empty values are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackResult {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A callback that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub code: String,
    pub state: Option<String>,
}

impl CallbackResult {
    pub fn from_query(query: &str) -> Self {
        let mut out = Self::default();
        let Ok(url) = Url::parse(&format!("http://127.0.0.1/?{query}")) else {
            return out;
        };
        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "code" => &mut out.code,
                "state" => &mut out.state,
                "error" => &mut out.error,
                "error_description" => &mut out.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        out
    }

    /// Provider error first, then `state` (when one is expected), then presence of `code`.
    pub fn validate(self, expected_state: Option<&str>) -> AppResult<AuthorizationGrant> {
        if let Some(error) = self.error.as_deref() {
            let detail = match self.error_description.as_deref() {
                Some(description) => format!("{error}: {description}"),
                None => error.to_string(),
            };
            return Err(format!("OAUTH_PROVIDER_ERROR: OAuth authorization failed: {detail}").into());
        }

        if let Some(expected) = expected_state.map(str::trim).filter(|v| !v.is_empty()) {
            let returned = self.state.as_deref().unwrap_or_default();
            if !constant_time_eq(returned.as_bytes(), expected.as_bytes()) {
                return Err(
                    "OAUTH_STATE_MISMATCH: OAuth state mismatch. Re-run oauth-login.".into(),
                );
            }
        }

        let code = self.code.ok_or_else(|| {
            "OAUTH_CALLBACK_MALFORMED: OAuth callback missing code parameter.".to_string()
        })?;
        Ok(AuthorizationGrant {
            code,
            state: self.state,
        })
    }
}

/// Parses a redirect URL pasted by the user (manual fallback path).
pub fn parse_redirect_url(raw: &str) -> AppResult<CallbackResult> {
    let url = Url::parse(raw.trim())
        .map_err(|e| format!("INVALID_INPUT: invalid --redirect-url: {e}"))?;
    Ok(CallbackResult::from_query(url.query().unwrap_or_default()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackHost {
    /// `localhost`: both address families are bound when possible.
    Localhost,
    V4,
    V6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackRedirect {
    pub uri: String,
    pub host: LoopbackHost,
    pub port: u16,
    pub path: String,
}

pub fn parse_loopback_redirect(redirect_uri: &str) -> AppResult<LoopbackRedirect> {
    let url = Url::parse(redirect_uri.trim())
        .map_err(|e| format!("INVALID_INPUT: invalid redirect URI: {e}"))?;
    if url.scheme() != "http" {
        return Err(
            "INVALID_INPUT: Auto OAuth callback requires http redirect URI (for local callback server).".into(),
        );
    }
    let host = match url.host_str().unwrap_or_default() {
        "localhost" => LoopbackHost::Localhost,
        "127.0.0.1" => LoopbackHost::V4,
        "[::1]" | "::1" => LoopbackHost::V6,
        _ => {
            return Err(
                "INVALID_INPUT: Auto OAuth callback requires localhost redirect URI (localhost/127.0.0.1/::1). Use manual oauth-start/oauth-exchange for remote redirect URIs."
                    .into(),
            )
        }
    };
    // `Url` normalizes away the scheme default, so `:80` also reads as "no port".
    let port = url.port().ok_or(
        "INVALID_INPUT: Redirect URI must include an explicit port for auto OAuth callback.",
    )?;
    if port == 0 {
        return Err(
            "INVALID_INPUT: Redirect URI port 0 cannot match the URI registered with Notion; use a fixed port."
                .into(),
        );
    }
    let path = match url.path() {
        "" => "/".to_string(),
        other => other.to_string(),
    };

    Ok(LoopbackRedirect {
        uri: redirect_uri.trim().to_string(),
        host,
        port,
        path,
    })
}

#[derive(Clone)]
struct CallbackRoute {
    path: Arc<str>,
    slot: Arc<Mutex<Option<oneshot::Sender<CallbackResult>>>>,
}

struct ServeTask {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct CallbackListener {
    redirect: LoopbackRedirect,
    local_addrs: Vec<SocketAddr>,
    received: Option<oneshot::Receiver<CallbackResult>>,
    tasks: Vec<ServeTask>,
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("redirect_uri", &self.redirect.uri)
            .field("local_addrs", &self.local_addrs)
            .finish()
    }
}

impl CallbackListener {
    /// Binds the redirect URI's host and port. Port `0` picks a free port.
    pub async fn bind(redirect: LoopbackRedirect) -> AppResult<Self> {
        let listeners = bind_loopback(redirect.host, redirect.port).await?;

        let (tx, rx) = oneshot::channel();
        let route = CallbackRoute {
            path: Arc::from(redirect.path.as_str()),
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        let app = Router::new()
            .fallback(handle_callback)
            .with_state(route);

        let mut tasks = Vec::with_capacity(listeners.len());
        let mut local_addrs = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let addr = listener
                .local_addr()
                .map_err(|e| format!("OAUTH_CALLBACK_BIND: local_addr failed: {e}"))?;
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let app = app.clone();
            let task = tokio::spawn(async move {
                let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                });
                if let Err(err) = serve.await {
                    tracing::error!(addr = %addr, "oauth callback server error: {}", err);
                }
            });
            local_addrs.push(addr);
            tasks.push(ServeTask {
                addr,
                shutdown: shutdown_tx,
                task,
            });
        }

        tracing::info!(
            redirect_uri = %redirect.uri,
            addrs = ?local_addrs,
            "oauth callback listener started"
        );
        Ok(Self {
            redirect,
            local_addrs,
            received: Some(rx),
            tasks,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addrs.first().copied()
    }

    /// Waits for the first request on the callback path, then validates it.
    pub async fn wait(
        mut self,
        expected_state: Option<&str>,
        timeout: Duration,
    ) -> AppResult<AuthorizationGrant> {
        let Some(received) = self.received.take() else {
            self.close().await;
            return Err("SYSTEM_ERROR: oauth callback listener already consumed".into());
        };
        let outcome = tokio::time::timeout(timeout, received).await;
        self.close().await;

        let result = match outcome {
            Ok(Ok(result)) => {
                tracing::info!("oauth callback received");
                result
            }
            Ok(Err(_)) => {
                return Err("SYSTEM_ERROR: oauth callback listener stopped unexpectedly".into())
            }
            Err(_) => {
                tracing::info!(timeout_s = timeout.as_secs(), "oauth callback timed out");
                return Err(format!(
                    "OAUTH_CALLBACK_TIMEOUT: Timed out waiting for OAuth callback after {}s at {}. Fallback: run oauth-start then oauth-exchange manually.",
                    timeout.as_secs(),
                    self.redirect.uri
                )
                .into());
            }
        };

        result.validate(expected_state)
    }

    async fn close(&mut self) {
        for ServeTask {
            addr,
            shutdown,
            mut task,
        } in self.tasks.drain(..)
        {
            let _ = shutdown.send(());
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                tracing::debug!(addr = %addr, "oauth callback server did not drain; aborting");
                task.abort();
            }
        }
        tracing::info!(redirect_uri = %self.redirect.uri, "oauth callback listener closed");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        for serve in self.tasks.drain(..) {
            let _ = serve.shutdown.send(());
            serve.task.abort();
        }
    }
}

async fn handle_callback(State(route): State<CallbackRoute>, request: Request) -> Response {
    let uri = request.uri();
    if uri.path() != &*route.path {
        tracing::debug!(path = uri.path(), "ignoring request outside the callback path");
        return plain_response(StatusCode::NOT_FOUND, "Not Found");
    }
    if request.method() != Method::GET {
        return plain_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    let Some(sender) = route.slot.lock_or_recover().take() else {
        return plain_response(StatusCode::GONE, "Callback already received");
    };

    let result = CallbackResult::from_query(uri.query().unwrap_or_default());
    let body = if result.error.is_some() {
        FAILURE_HTML
    } else {
        SUCCESS_HTML
    };
    let _ = sender.send(result);
    (
        StatusCode::OK,
        [(header::CONNECTION, "close")],
        Html(body),
    )
        .into_response()
}

fn plain_response(status: StatusCode, body: &'static str) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONNECTION, "close"),
        ],
        body,
    )
        .into_response()
}

async fn bind_loopback(host: LoopbackHost, port: u16) -> AppResult<Vec<TcpListener>> {
    match host {
        LoopbackHost::V4 => bind_one("127.0.0.1", port).await.map(|l| vec![l]),
        LoopbackHost::V6 => bind_one("::1", port).await.map(|l| vec![l]),
        LoopbackHost::Localhost if port == 0 => bind_localhost_dynamic().await,
        LoopbackHost::Localhost => bind_localhost(port).await,
    }
}

async fn bind_one(host: &str, port: u16) -> AppResult<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|err| bind_error(format!("{host}:{port} ({err})"), err))
}

fn bind_error(detail: String, source: std::io::Error) -> AppError {
    AppError::new(
        "OAUTH_CALLBACK_BIND",
        format!("oauth callback bind failed: {detail}"),
    )
    .with_source(source)
}

/// Both families are tried; a family the host lacks is skipped, any other failure is fatal.
async fn bind_localhost(port: u16) -> AppResult<Vec<TcpListener>> {
    let mut listeners = Vec::with_capacity(2);
    let mut skipped: Vec<String> = Vec::new();
    let mut last_err: Option<std::io::Error> = None;

    for host in ["127.0.0.1", "::1"] {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => listeners.push(listener),
            Err(err) if family_unavailable(&err) => {
                tracing::debug!(port, "{} unavailable for oauth callback: {}", host, err);
                skipped.push(format!("{host}:{port} ({err})"));
                last_err = Some(err);
            }
            Err(err) => return Err(bind_error(format!("{host}:{port} ({err})"), err)),
        }
    }

    match (listeners.is_empty(), last_err) {
        (true, Some(err)) => Err(bind_error(skipped.join("; "), err)),
        _ => Ok(listeners),
    }
}

const DYNAMIC_BIND_ATTEMPTS: usize = 5;

/// Picks a free port on 127.0.0.1 and claims the same port on `::1` when the host has IPv6.
async fn bind_localhost_dynamic() -> AppResult<Vec<TcpListener>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let v4 = bind_one("127.0.0.1", 0).await?;
        let port = v4
            .local_addr()
            .map_err(|e| format!("OAUTH_CALLBACK_BIND: local_addr failed: {e}"))?
            .port();
        match TcpListener::bind(("::1", port)).await {
            Ok(v6) => return Ok(vec![v4, v6]),
            Err(err) if family_unavailable(&err) => {
                tracing::debug!(port, "::1 unavailable for oauth callback: {}", err);
                return Ok(vec![v4]);
            }
            Err(err) if attempt < DYNAMIC_BIND_ATTEMPTS => {
                tracing::debug!(port, attempt, "[::1]:{} taken, retrying: {}", port, err);
            }
            Err(err) => return Err(bind_error(format!("::1:{port} ({err})"), err)),
        }
    }
}

/// EAFNOSUPPORT is unmapped in `io::ErrorKind`, so it is matched by errno.
fn family_unavailable(err: &std::io::Error) -> bool {
    const EAFNOSUPPORT: i32 = if cfg!(target_os = "linux") { 97 } else { 47 };
    matches!(
        err.kind(),
        std::io::ErrorKind::AddrNotAvailable | std::io::ErrorKind::Unsupported
    ) || (cfg!(unix) && err.raw_os_error() == Some(EAFNOSUPPORT))
}
