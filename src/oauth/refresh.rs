//! Usage: Refresh-on-read orchestration for the stored token bundle.
//!
//! Concurrent CLI invocations are not coordinated: two processes that both see a near-expiry
//! bundle will both refresh and the last write wins.

use crate::domain::token_bundle::TokenBundle;
use crate::infra::token_store::TokenStore;
use crate::oauth::token_exchange::TokenExchangeClient;
use crate::shared::blocking;
use crate::shared::error::AppResult;
use crate::shared::time::now_utc;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

pub const REFRESH_MARGIN_SECS: i64 = 120;

/// True when `expires_at` is known and no more than the margin away (or already past).
pub fn needs_refresh(bundle: &TokenBundle, now: DateTime<Utc>) -> bool {
    let Some(expiry) = bundle.expires_at else {
        return false;
    };
    expiry - TimeDelta::seconds(REFRESH_MARGIN_SECS) <= now
}

/// Returns `bundle` untouched while it is fresh; otherwise refreshes once and persists.
///
/// A near-expiry bundle without a refresh token is returned as-is so the downstream call can
/// surface the provider's own expiry error.
pub async fn ensure_fresh(
    store: Arc<dyn TokenStore>,
    client: &TokenExchangeClient,
    bundle: TokenBundle,
) -> AppResult<TokenBundle> {
    if !needs_refresh(&bundle, now_utc()) {
        return Ok(bundle);
    }
    let Some(previous) = bundle.refresh_token().map(str::to_string) else {
        tracing::warn!(
            expires_at = %bundle.expires_at_iso(),
            "stored token is near expiry but has no refresh_token"
        );
        return Ok(bundle);
    };

    refresh_and_save(store, client, &previous).await
}

/// Unconditional refresh of the stored bundle (`oauth-refresh`).
pub async fn force_refresh(
    store: Arc<dyn TokenStore>,
    client: &TokenExchangeClient,
) -> AppResult<TokenBundle> {
    let loader = Arc::clone(&store);
    let stored = blocking::run("token_store.load", move || loader.load()).await?;
    let Some(bundle) = stored else {
        return Err(
            "TOKEN_MISSING: No stored OAuth token. Run oauth-login or oauth-start/oauth-exchange first.".into(),
        );
    };
    let Some(previous) = bundle.refresh_token().map(str::to_string) else {
        return Err(
            "TOKEN_MISSING: Stored token has no refresh_token. Re-authorize via oauth-login.".into(),
        );
    };

    refresh_and_save(store, client, &previous).await
}

async fn refresh_and_save(
    store: Arc<dyn TokenStore>,
    client: &TokenExchangeClient,
    previous_refresh_token: &str,
) -> AppResult<TokenBundle> {
    let mut refreshed = client.refresh(previous_refresh_token).await?;
    refreshed.inherit_refresh_token(previous_refresh_token);

    let to_save = refreshed.clone();
    blocking::run("token_store.save", move || store.save(&to_save)).await?;
    tracing::info!(
        expires_at = %refreshed.expires_at_iso(),
        "oauth token refreshed and saved"
    );
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token_bundle::TokenSource;
    use crate::shared::time::from_unix_seconds;
    use serde_json::json;

    fn bundle_expiring_in(secs: Option<i64>, now: DateTime<Utc>) -> TokenBundle {
        let mut raw = serde_json::Map::new();
        raw.insert("access_token".into(), json!("A1"));
        raw.insert("refresh_token".into(), json!("R1"));
        let mut bundle =
            TokenBundle::from_token_response(raw, TokenSource::OauthExchange, now).expect("bundle");
        bundle.expires_at = secs.map(|s| now + TimeDelta::seconds(s));
        bundle
    }

    #[test]
    fn unknown_expiry_never_needs_refresh() {
        let now = from_unix_seconds(1_700_000_000).expect("ts");
        assert!(!needs_refresh(&bundle_expiring_in(None, now), now));
    }

    #[test]
    fn margin_boundary_is_inclusive() {
        let now = from_unix_seconds(1_700_000_000).expect("ts");
        assert!(!needs_refresh(&bundle_expiring_in(Some(121), now), now));
        assert!(needs_refresh(&bundle_expiring_in(Some(120), now), now));
        assert!(needs_refresh(&bundle_expiring_in(Some(30), now), now));
        assert!(needs_refresh(&bundle_expiring_in(Some(-5), now), now));
    }
}
