//! Usage: Command handlers. Each returns the text it wants on stdout; `lib::run` prints it.

mod notion;
mod oauth;

use crate::app::cli::Command;
use crate::infra::settings::{OAuthCredentials, Settings};
use crate::infra::state_store::StateStore;
use crate::infra::token_store::{open_token_store, TokenStore};
use crate::shared::error::AppResult;
use serde_json::Value;
use std::sync::Arc;

pub use notion::{create_comment, query_active, resolve_access_token, AccessToken};
pub use oauth::{oauth_exchange, oauth_login, oauth_refresh, oauth_start, oauth_token};

pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Everything a command needs, resolved once per process.
#[derive(Clone)]
pub struct CommandContext {
    pub settings: Settings,
    pub token_store: Arc<dyn TokenStore>,
    pub state_store: StateStore,
    env: EnvLookup,
}

impl CommandContext {
    pub fn from_env() -> AppResult<Self> {
        let settings = Settings::from_env()?;
        Ok(Self::new(settings, Arc::new(|key: &str| std::env::var(key).ok())))
    }

    pub fn new(settings: Settings, env: EnvLookup) -> Self {
        let token_store = open_token_store(&settings);
        let state_store = StateStore::new(settings.state_path.clone());
        Self {
            settings,
            token_store,
            state_store,
            env,
        }
    }

    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = store;
        self
    }

    pub fn credentials(&self, redirect_override: Option<&str>) -> AppResult<OAuthCredentials> {
        OAuthCredentials::from_lookup(|key| (self.env)(key), redirect_override)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Json(Value),
    Text(String),
}

impl CommandOutput {
    pub fn render(&self) -> AppResult<String> {
        match self {
            Self::Json(value) => serde_json::to_string_pretty(value)
                .map_err(|e| format!("SYSTEM_ERROR: failed to render output: {e}").into()),
            Self::Text(text) => Ok(text.clone()),
        }
    }
}

pub async fn dispatch(ctx: &CommandContext, command: Command) -> AppResult<CommandOutput> {
    tracing::debug!(store_mode = ctx.settings.store_mode.as_str(), "dispatching command");
    match command {
        Command::OauthLogin(args) => oauth_login(ctx, &args).await,
        Command::OauthStart(args) => oauth_start(ctx, &args).await,
        Command::OauthExchange(args) => oauth_exchange(ctx, &args).await,
        Command::OauthRefresh => oauth_refresh(ctx).await,
        Command::OauthToken => oauth_token(ctx).await,
        Command::QueryActive(args) => query_active(ctx, &args).await,
        Command::CreateComment(args) => create_comment(ctx, &args).await,
    }
}
