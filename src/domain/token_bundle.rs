//! Usage: Persisted OAuth token bundle (provider token response + acquisition metadata).

use crate::shared::error::AppResult;
use crate::shared::security::sanitize_body_snippet;
use crate::shared::time::{from_unix_seconds, parse_iso, to_iso_z};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    OauthExchange,
    OauthRefresh,
}

impl TokenSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OauthExchange => "oauth_exchange",
            Self::OauthRefresh => "oauth_refresh",
        }
    }
}

/// Credentials plus metadata, always written wholesale.
///
/// `expires_at` is derived as `acquired_at + expires_in` when `expires_in` is positive and is
/// absent otherwise. Fields the provider returns that are not modelled here are kept in
/// `extra` so a stored document round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_i64"
    )]
    pub expires_in: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_timestamp_opt"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(with = "iso_timestamp")]
    pub acquired_at: DateTime<Utc>,
    pub source: TokenSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenBundle {
    /// Enriches a raw token endpoint response. Fails when `access_token` is missing or empty.
    pub(crate) fn from_token_response(
        raw: Map<String, Value>,
        source: TokenSource,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let mut extra = raw;
        let Some(access_token) = extra
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
        else {
            let snippet = sanitize_body_snippet(&Value::Object(extra).to_string());
            return Err(format!(
                "OAUTH_NO_ACCESS_TOKEN: token endpoint returned no access_token: {snippet}"
            )
            .into());
        };
        extra.remove("access_token");

        let refresh_token = extra.remove("refresh_token").and_then(non_empty_string);
        let expires_in = extra.remove("expires_in").as_ref().and_then(parse_i64_lossy);
        let workspace_id = extra.remove("workspace_id").and_then(non_empty_string);
        let workspace_name = extra.remove("workspace_name").and_then(non_empty_string);
        let owner = extra.remove("owner").filter(|v| !v.is_null());
        // Metadata is ours to derive; never trust provider-supplied values for it.
        for key in ["expires_at", "acquired_at", "source"] {
            extra.remove(key);
        }

        Ok(Self {
            access_token,
            refresh_token,
            expires_in,
            expires_at: derive_expires_at(now, expires_in),
            acquired_at: now,
            source,
            workspace_id,
            workspace_name,
            owner,
            extra,
        })
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Providers may not rotate the refresh token; keep the previous one when none came back.
    pub(crate) fn inherit_refresh_token(&mut self, previous: &str) {
        if self.refresh_token().is_none() {
            self.refresh_token = Some(previous.to_string());
        }
    }

    pub fn owner_type(&self) -> Option<&str> {
        self.owner
            .as_ref()
            .and_then(|owner| owner.get("type"))
            .and_then(Value::as_str)
    }

    pub fn expires_at_iso(&self) -> String {
        self.expires_at.as_ref().map(to_iso_z).unwrap_or_default()
    }
}

fn derive_expires_at(now: DateTime<Utc>, expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    let secs = expires_in.filter(|v| *v > 0)?;
    now.checked_add_signed(TimeDelta::try_seconds(secs)?)
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn parse_i64_lossy(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_i64_lossy))
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_iso(s),
        Value::Number(n) => n.as_i64().and_then(from_unix_seconds),
        _ => None,
    }
}

mod iso_timestamp {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_iso_z(value))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        timestamp_from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {value}")))
    }
}

/// Unparseable stored values become `None` (treated as never-expiring).
mod iso_timestamp_opt {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&to_iso_z(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(timestamp_from_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        from_unix_seconds(secs).expect("ts")
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn token_response_is_enriched_with_metadata() {
        let raw = object(json!({
            "access_token": "ntn_access",
            "refresh_token": "nrt_refresh",
            "expires_in": 3600,
            "token_type": "bearer",
            "bot_id": "bot-1",
            "workspace_id": "ws-1",
            "workspace_name": "Acme",
            "owner": {"type": "user", "user": {"id": "u-1"}}
        }));
        let bundle =
            TokenBundle::from_token_response(raw, TokenSource::OauthExchange, at(1_000)).unwrap();

        assert_eq!(bundle.access_token, "ntn_access");
        assert_eq!(bundle.refresh_token(), Some("nrt_refresh"));
        assert_eq!(bundle.acquired_at, at(1_000));
        assert_eq!(bundle.expires_at, Some(at(4_600)));
        assert_eq!(bundle.source, TokenSource::OauthExchange);
        assert_eq!(bundle.owner_type(), Some("user"));
        assert_eq!(bundle.extra.get("bot_id"), Some(&json!("bot-1")));
        assert_eq!(bundle.extra.get("token_type"), Some(&json!("bearer")));
    }

    #[test]
    fn non_positive_or_missing_expires_in_leaves_expires_at_absent() {
        for raw in [
            json!({"access_token": "a"}),
            json!({"access_token": "a", "expires_in": 0}),
            json!({"access_token": "a", "expires_in": -5}),
            json!({"access_token": "a", "expires_in": "soon"}),
            json!({"access_token": "a", "expires_at": "2030-01-01T00:00:00Z"}),
        ] {
            let bundle =
                TokenBundle::from_token_response(object(raw), TokenSource::OauthRefresh, at(0))
                    .unwrap();
            assert_eq!(bundle.expires_at, None);
            assert!(!bundle.extra.contains_key("expires_at"));
        }
    }

    #[test]
    fn missing_access_token_is_distinct_failure() {
        let raw = object(json!({"refresh_token": "nrt_abcdefghijklmnop"}));
        let err = TokenBundle::from_token_response(raw, TokenSource::OauthExchange, at(0))
            .expect_err("should fail");
        assert_eq!(err.code(), "OAUTH_NO_ACCESS_TOKEN");
        assert!(!err.to_string().contains("nrt_abcdefghijklmnop"));

        let raw = object(json!({"access_token": "  "}));
        let err = TokenBundle::from_token_response(raw, TokenSource::OauthExchange, at(0))
            .expect_err("should fail");
        assert_eq!(err.code(), "OAUTH_NO_ACCESS_TOKEN");
    }

    #[test]
    fn inherit_refresh_token_only_fills_gaps() {
        let raw = object(json!({"access_token": "A2", "expires_in": 3600}));
        let mut bundle =
            TokenBundle::from_token_response(raw, TokenSource::OauthRefresh, at(0)).unwrap();
        bundle.inherit_refresh_token("R1");
        assert_eq!(bundle.refresh_token(), Some("R1"));

        bundle.refresh_token = Some("R2".to_string());
        bundle.inherit_refresh_token("R1");
        assert_eq!(bundle.refresh_token(), Some("R2"));

        bundle.refresh_token = Some(String::new());
        bundle.inherit_refresh_token("R1");
        assert_eq!(bundle.refresh_token(), Some("R1"));
    }

    #[test]
    fn stored_document_uses_iso_timestamps_and_round_trips() {
        let raw = object(json!({"access_token": "A1", "refresh_token": "R1", "expires_in": 60, "bot_id": "b"}));
        let bundle =
            TokenBundle::from_token_response(raw, TokenSource::OauthExchange, at(1_700_000_000))
                .unwrap();
        let doc = serde_json::to_value(&bundle).unwrap();
        assert_eq!(doc["acquired_at"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(doc["expires_at"], json!("2023-11-14T22:14:20Z"));
        assert_eq!(doc["source"], json!("oauth_exchange"));
        assert_eq!(doc["bot_id"], json!("b"));

        let back: TokenBundle = serde_json::from_value(doc).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn unparseable_stored_expiry_is_treated_as_absent() {
        let doc = json!({
            "access_token": "A1",
            "expires_at": "not-a-date",
            "acquired_at": "2024-01-01T00:00:00Z",
            "source": "oauth_refresh"
        });
        let bundle: TokenBundle = serde_json::from_value(doc).unwrap();
        assert_eq!(bundle.expires_at, None);

        let doc = json!({
            "access_token": "A1",
            "expires_at": 1_700_000_000,
            "acquired_at": "2024-01-01T00:00:00Z",
            "source": "oauth_refresh"
        });
        let bundle: TokenBundle = serde_json::from_value(doc).unwrap();
        assert_eq!(bundle.expires_at, Some(at(1_700_000_000)));
    }
}
