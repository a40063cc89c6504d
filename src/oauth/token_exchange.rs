//! Usage: OAuth token endpoint client (authorization_code + refresh_token grants).

use crate::domain::token_bundle::{TokenBundle, TokenSource};
use crate::infra::http::{http_client, request_json, TransportError};
use crate::infra::settings::OAuthCredentials;
use crate::shared::error::{AppError, AppResult};
use crate::shared::security::mask_token;
use crate::shared::time::now_utc;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

#[derive(Clone)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for TokenExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeClient")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_token(&self.client_secret))
            .finish()
    }
}

impl TokenExchangeClient {
    pub fn new(token_url: &str, credentials: &OAuthCredentials) -> AppResult<Self> {
        Ok(Self::with_http(http_client()?, token_url, credentials))
    }

    pub fn with_http(http: reqwest::Client, token_url: &str, credentials: &OAuthCredentials) -> Self {
        Self {
            http,
            token_url: token_url.trim().to_string(),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> AppResult<TokenBundle> {
        let body = json!({
            "grant_type": "authorization_code",
            "code": code.trim(),
            "redirect_uri": redirect_uri.trim(),
        });
        tracing::info!(token_url = %self.token_url, "exchanging oauth authorization code");
        self.post_grant(&body, TokenSource::OauthExchange).await
    }

    /// The returned bundle may lack `refresh_token`; callers own the retention rule.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<TokenBundle> {
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token.trim(),
        });
        tracing::info!(
            token_url = %self.token_url,
            refresh_token = %mask_token(refresh_token),
            "refreshing oauth access token"
        );
        self.post_grant(&body, TokenSource::OauthRefresh).await
    }

    async fn post_grant(&self, body: &Value, source: TokenSource) -> AppResult<TokenBundle> {
        let request = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::AUTHORIZATION, self.basic_auth_header());
        let raw = request_json(request, &self.token_url, Some(body))
            .await
            .map_err(|err| classify_grant_failure(err, source))?;
        TokenBundle::from_token_response(raw, source, now_utc())
    }

    fn basic_auth_header(&self) -> String {
        let pair = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(pair.as_bytes()))
    }
}

fn classify_grant_failure(err: TransportError, source: TokenSource) -> AppError {
    if source == TokenSource::OauthRefresh {
        if let TransportError::Status { body, .. } = &err {
            let (code, message) = parse_oauth_error_details(body);
            if is_relogin_required(code.as_deref(), message.as_deref()) {
                let detail = code.unwrap_or_else(|| "invalid_grant".to_string());
                return AppError::new(
                    "OAUTH_RELOGIN_REQUIRED",
                    format!("refresh token rejected ({detail}); re-run oauth-login to reauthorize"),
                )
                .with_source(err);
            }
        }
    }
    err.into()
}

fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut code = value
        .get("code")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let mut message = ["error_description", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match value.get("error") {
        Some(Value::String(err)) => {
            if code.is_none() {
                code = Some(err.trim().to_string()).filter(|v| !v.is_empty());
            }
        }
        Some(Value::Object(err)) => {
            if code.is_none() {
                code = err
                    .get("code")
                    .and_then(Value::as_str)
                    .or_else(|| err.get("type").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
            if message.is_none() {
                message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        }
        _ => {}
    }

    (code, message)
}

fn is_relogin_required(code: Option<&str>, message: Option<&str>) -> bool {
    let code_hit = code.map(str::trim).is_some_and(|v| {
        v.eq_ignore_ascii_case("invalid_grant") || v.eq_ignore_ascii_case("refresh_token_reused")
    });
    if code_hit {
        return true;
    }
    message
        .map(str::to_ascii_lowercase)
        .is_some_and(|v| v.contains("refresh token has already been used"))
}
