//! Usage: Authorization URL construction, `state` generation, and browser launch.

use crate::domain::authorization_state::AuthorizationState;
use crate::shared::error::{AppError, AppResult};
use crate::shared::time::now_utc;
use chrono::{DateTime, Utc};
use rand::RngCore;
use reqwest::Url;
use std::process::Command;
use std::str::FromStr;

const STATE_BYTES: usize = 32;

/// Audience the integration is installed for (`owner` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerScope {
    #[default]
    User,
    Workspace,
}

impl OwnerScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Workspace => "workspace",
        }
    }
}

impl FromStr for OwnerScope {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "user" => Ok(Self::User),
            "workspace" => Ok(Self::Workspace),
            _ => Err("INVALID_INPUT: --owner must be user or workspace".into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
    pub owner: OwnerScope,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationRequest {
    /// A blank or absent `state` is replaced by a fresh random token.
    pub fn build(
        authorize_endpoint: &str,
        client_id: &str,
        redirect_uri: &str,
        owner: OwnerScope,
        state: Option<&str>,
    ) -> AppResult<Self> {
        let state = state
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_state);

        let mut url = Url::parse(authorize_endpoint.trim())
            .map_err(|e| format!("CONFIG_ERROR: invalid oauth authorize url: {e}"))?;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("owner", owner.as_str())
            .append_pair("state", &state);

        Ok(Self {
            url: url.to_string(),
            state,
            redirect_uri: redirect_uri.to_string(),
            owner,
            created_at: now_utc(),
        })
    }

    pub fn persisted_state(&self) -> AuthorizationState {
        AuthorizationState::new(&self.state, &self.redirect_uri, self.created_at)
    }
}

pub fn generate_state() -> String {
    use rand::rngs::OsRng;
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn open_browser(url: &str) -> AppResult<()> {
    #[cfg(target_os = "windows")]
    {
        build_windows_open_browser_command(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[cfg(target_os = "macos")]
    {
        Command::new("open")
            .arg(url)
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        Command::new("xdg-open")
            .arg(url)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
        return Ok(());
    }

    #[allow(unreachable_code)]
    Err("SYSTEM_ERROR: browser open is unsupported on this platform".into())
}

#[cfg(target_os = "windows")]
fn build_windows_open_browser_command(url: &str) -> Command {
    let mut cmd = Command::new("rundll32.exe");
    // `explorer <url>` can open File Explorer for some URL shapes.
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    cmd
}
