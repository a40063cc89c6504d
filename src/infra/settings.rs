//! Usage: Process settings resolved once from the environment (paths, store backend, endpoints).

use crate::shared::error::AppResult;
use crate::shared::security::mask_token;
use std::path::{Path, PathBuf};

pub const DEFAULT_NOTION_VERSION: &str = "2025-09-03";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://api.notion.com/v1/oauth/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.notion.com/v1/oauth/token";
pub const DEFAULT_API_BASE: &str = "https://api.notion.com/v1";
pub const KEYCHAIN_PROGRAM: &str = "security";
const DEFAULT_CONFIG_DIR: &str = "~/.config/npt";
const TOKEN_FILE_NAME: &str = "notion-oauth.json";
const STATE_FILE_NAME: &str = "notion-oauth-state.json";

const ENV_CLIENT_ID: [&str; 2] = ["NOTION_OAUTH_CLIENT_ID", "NPT_NOTION_CLIENT_ID"];
const ENV_CLIENT_SECRET: [&str; 2] = ["NOTION_OAUTH_CLIENT_SECRET", "NPT_NOTION_CLIENT_SECRET"];
const ENV_REDIRECT_URI: [&str; 2] = ["NOTION_OAUTH_REDIRECT_URI", "NPT_NOTION_REDIRECT_URI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    File,
    Keychain,
}

impl StoreMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Keychain => "keychain",
        }
    }

    /// `auto` prefers the OS secret store when its helper is usable, otherwise `file`.
    pub(crate) fn resolve(requested: Option<&str>, keychain_available: bool) -> AppResult<Self> {
        let requested = requested
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "auto".to_string());
        match requested.as_str() {
            "file" => Ok(Self::File),
            "keychain" if keychain_available => Ok(Self::Keychain),
            "keychain" => Err(
                "CONFIG_ERROR: NPT_TOKEN_STORE=keychain requires macOS `security` CLI".into(),
            ),
            "auto" if keychain_available => Ok(Self::Keychain),
            "auto" => Ok(Self::File),
            _ => Err(
                "CONFIG_ERROR: NPT_TOKEN_STORE must be one of: auto, file, keychain".into(),
            ),
        }
    }
}

pub(crate) fn keychain_available() -> bool {
    cfg!(target_os = "macos") && which::which(KEYCHAIN_PROGRAM).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub token_path: PathBuf,
    pub state_path: PathBuf,
    pub store_mode: StoreMode,
    pub notion_version: String,
    pub api_key: Option<String>,
    pub endpoints: ProviderEndpoints,
}

impl Settings {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), keychain_available())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        keychain_available: bool,
    ) -> AppResult<Self> {
        let get = |key: &str| non_empty(lookup(key));

        let config_dir = expand_home(
            get("NPT_CONFIG_DIR")
                .as_deref()
                .unwrap_or(DEFAULT_CONFIG_DIR),
        );
        let token_path = get("NPT_OAUTH_TOKEN_PATH")
            .map(|p| expand_home(&p))
            .unwrap_or_else(|| config_dir.join(TOKEN_FILE_NAME));
        let state_path = get("NPT_OAUTH_STATE_PATH")
            .map(|p| expand_home(&p))
            .unwrap_or_else(|| config_dir.join(STATE_FILE_NAME));
        let store_mode =
            StoreMode::resolve(get("NPT_TOKEN_STORE").as_deref(), keychain_available)?;

        let defaults = ProviderEndpoints::default();
        let endpoints = ProviderEndpoints {
            authorize_url: get("NPT_NOTION_AUTHORIZE_URL").unwrap_or(defaults.authorize_url),
            token_url: get("NPT_NOTION_TOKEN_URL").unwrap_or(defaults.token_url),
            api_base: get("NPT_NOTION_API_BASE").unwrap_or(defaults.api_base),
        };

        Ok(Self {
            token_path,
            state_path,
            store_mode,
            notion_version: get("NOTION_VERSION")
                .unwrap_or_else(|| DEFAULT_NOTION_VERSION.to_string()),
            api_key: get("NOTION_API_KEY"),
            endpoints,
        })
    }
}

/// Client identity for the provider token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &mask_token(&self.client_secret))
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl OAuthCredentials {
    pub fn from_env(redirect_override: Option<&str>) -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), redirect_override)
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        redirect_override: Option<&str>,
    ) -> AppResult<Self> {
        let first = |keys: [&str; 2]| keys.iter().find_map(|key| non_empty(lookup(key)));

        let client_id = first(ENV_CLIENT_ID)
            .ok_or("CONFIG_ERROR: Missing NOTION_OAUTH_CLIENT_ID (or NPT_NOTION_CLIENT_ID)")?;
        let client_secret = first(ENV_CLIENT_SECRET).ok_or(
            "CONFIG_ERROR: Missing NOTION_OAUTH_CLIENT_SECRET (or NPT_NOTION_CLIENT_SECRET)",
        )?;
        let redirect_uri = non_empty(redirect_override.map(str::to_string))
            .or_else(|| first(ENV_REDIRECT_URI))
            .ok_or(
                "CONFIG_ERROR: Missing NOTION_OAUTH_REDIRECT_URI (or NPT_NOTION_REDIRECT_URI)",
            )?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/")
    };
    match (rest, dirs_next::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(Path::new(rest)),
        _ => PathBuf::from(raw),
    }
}
