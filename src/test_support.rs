//! Usage: Public test helpers for integration tests.

use crate::app::cli::Cli;
use crate::commands::{dispatch, EnvLookup};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;

pub use crate::commands::{resolve_access_token, AccessToken, CommandContext, CommandOutput};
pub use crate::domain::authorization_state::AuthorizationState;
pub use crate::domain::token_bundle::{TokenBundle, TokenSource};
pub use crate::infra::http::TransportError;
pub use crate::infra::settings::{OAuthCredentials, Settings, StoreMode};
pub use crate::infra::state_store::StateStore;
pub use crate::infra::token_store::{FileTokenStore, KeychainTokenStore, TokenStore};
pub use crate::oauth::authorize::{AuthorizationRequest, OwnerScope};
pub use crate::oauth::callback_server::{
    parse_loopback_redirect, AuthorizationGrant, CallbackListener, CallbackResult, LoopbackHost,
    LoopbackRedirect,
};
pub use crate::oauth::refresh::{ensure_fresh, force_refresh, needs_refresh, REFRESH_MARGIN_SECS};
pub use crate::oauth::token_exchange::TokenExchangeClient;
pub use crate::shared::error::{AppError, AppResult};

pub fn token_bundle_from_response(
    raw: serde_json::Value,
    source: TokenSource,
    acquired_at: DateTime<Utc>,
) -> AppResult<TokenBundle> {
    let serde_json::Value::Object(map) = raw else {
        return Err("INVALID_INPUT: token response must be a JSON object".into());
    };
    TokenBundle::from_token_response(map, source, acquired_at)
}

/// `127.0.0.1` redirect on a port picked at bind time; configured redirect URIs cannot ask for this.
pub fn ephemeral_redirect(path: &str) -> LoopbackRedirect {
    LoopbackRedirect {
        uri: format!("http://127.0.0.1:0{path}"),
        host: LoopbackHost::V4,
        port: 0,
        path: path.to_string(),
    }
}

pub fn env_lookup(pairs: &[(&str, &str)]) -> EnvLookup {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(move |key: &str| map.get(key).cloned())
}

/// Settings + context from explicit variables only; the keychain is never auto-selected.
pub fn context_from_pairs(pairs: &[(&str, &str)]) -> AppResult<CommandContext> {
    let env = env_lookup(pairs);
    let lookup = Arc::clone(&env);
    let settings = Settings::from_lookup(move |key| lookup(key), false)?;
    Ok(CommandContext::new(settings, env))
}

/// Parses `argv` (without the program name) and runs the command against `ctx`.
pub async fn run_command(ctx: &CommandContext, argv: &[&str]) -> AppResult<CommandOutput> {
    let cli = Cli::try_parse_from(std::iter::once("npt").chain(argv.iter().copied()))
        .map_err(|e| format!("INVALID_INPUT: {e}"))?;
    dispatch(ctx, cli.command).await
}

pub fn output_json(output: &CommandOutput) -> Option<&serde_json::Value> {
    match output {
        CommandOutput::Json(value) => Some(value),
        CommandOutput::Text(_) => None,
    }
}
