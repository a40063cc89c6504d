//! Usage: Shared JSON-over-HTTP transport with typed failure kinds.

use crate::shared::error::{AppError, AppResult};
use crate::shared::security::sanitize_body_snippet;
use serde_json::{Map, Value};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Diagnostic split of a failed call; surfaced to users as `TRANSPORT_ERROR`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid JSON response from {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for AppError {
    fn from(value: TransportError) -> Self {
        let message = match &value {
            TransportError::Status { status, body } => {
                format!("HTTP {status}: {}", sanitize_body_snippet(body))
            }
            other => other.to_string(),
        };
        AppError::new("TRANSPORT_ERROR", message).with_source(value)
    }
}

pub(crate) fn http_client() -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("npt/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| format!("SYSTEM_ERROR: http client init failed: {e}").into())
}

/// Sends `body` as JSON and decodes a JSON object reply; an empty reply body is `{}`.
pub(crate) async fn request_json(
    request: reqwest::RequestBuilder,
    url: &str,
    body: Option<&Value>,
) -> Result<Map<String, Value>, TransportError> {
    let mut request = request.header(reqwest::header::ACCEPT, "application/json");
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request.send().await.map_err(TransportError::Network)?;
    let status = response.status();
    let text = response.text().await.map_err(TransportError::Network)?;

    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    if text.trim().is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_str(&text).map_err(|source| TransportError::InvalidJson {
        url: url.to_string(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(TransportError::InvalidJson {
            url: url.to_string(),
            source: serde::de::Error::custom(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_keeps_raw_body_but_masks_message() {
        let err = TransportError::Status {
            status: 400,
            body: r#"{"error":"invalid_grant","refresh_token":"nrt_abcdefghijklmnop"}"#.to_string(),
        };
        let app: AppError = err.into();
        assert_eq!(app.code(), "TRANSPORT_ERROR");
        assert!(app.message().starts_with("HTTP 400:"));
        assert!(!app.message().contains("nrt_abcdefghijklmnop"));

        let cause = app.source_as::<TransportError>().expect("typed cause");
        assert_eq!(cause.status(), Some(400));
        match cause {
            TransportError::Status { body, .. } => assert!(body.contains("nrt_abcdefghijklmnop")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_json_error_names_url() {
        let source = serde_json::from_str::<Value>("{").expect_err("bad json");
        let app: AppError = TransportError::InvalidJson {
            url: "http://127.0.0.1/token".to_string(),
            source,
        }
        .into();
        assert_eq!(app.code(), "TRANSPORT_ERROR");
        assert!(app.message().contains("http://127.0.0.1/token"));
        assert!(matches!(
            app.source_as::<TransportError>(),
            Some(TransportError::InvalidJson { .. })
        ));
    }
}
