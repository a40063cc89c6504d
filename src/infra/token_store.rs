//! Usage: Token bundle persistence behind a backend-agnostic `TokenStore` capability.
//!
//! Two backends: an owner-only JSON file, and the macOS keychain driven through the
//! `security` helper. The backend is picked once per process from `Settings::store_mode`.

use crate::domain::token_bundle::TokenBundle;
use crate::infra::secure_file::{read_json, to_pretty_json, write_json_secure};
use crate::infra::settings::{Settings, StoreMode, KEYCHAIN_PROGRAM};
use crate::shared::error::AppResult;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

pub const KEYCHAIN_SERVICE: &str = "npt.notion.oauth";
pub const KEYCHAIN_ACCOUNT: &str = "default";
/// `security` exit status for "item could not be found".
const KEYCHAIN_ITEM_NOT_FOUND: i32 = 44;

pub trait TokenStore: Send + Sync {
    fn mode(&self) -> StoreMode;

    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> AppResult<Option<TokenBundle>>;

    /// Replaces the stored bundle wholesale.
    fn save(&self, bundle: &TokenBundle) -> AppResult<()>;
}

pub fn open_token_store(settings: &Settings) -> Arc<dyn TokenStore> {
    match settings.store_mode {
        StoreMode::File => Arc::new(FileTokenStore::new(settings.token_path.clone())),
        StoreMode::Keychain => Arc::new(KeychainTokenStore::default()),
    }
}

#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn mode(&self) -> StoreMode {
        StoreMode::File
    }

    fn load(&self) -> AppResult<Option<TokenBundle>> {
        read_json(&self.path)
    }

    fn save(&self, bundle: &TokenBundle) -> AppResult<()> {
        write_json_secure(&self.path, bundle)?;
        tracing::debug!(path = %self.path.display(), "token bundle written");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct KeychainTokenStore {
    program: PathBuf,
    service: String,
    account: String,
}

impl Default for KeychainTokenStore {
    fn default() -> Self {
        Self::with_program(KEYCHAIN_PROGRAM)
    }
}

impl KeychainTokenStore {
    /// Same protocol as `security`, different executable (used by tests).
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            service: KEYCHAIN_SERVICE.to_string(),
            account: KEYCHAIN_ACCOUNT.to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> AppResult<std::process::Output> {
        Command::new(&self.program).args(args).output().map_err(|e| {
            format!(
                "TOKEN_STORE_ERROR: failed to execute keychain utility `{}`: {e}",
                self.program.display()
            )
            .into()
        })
    }
}

fn command_diagnostic(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    if text.is_empty() {
        "unknown keychain error".to_string()
    } else {
        text
    }
}

impl TokenStore for KeychainTokenStore {
    fn mode(&self) -> StoreMode {
        StoreMode::Keychain
    }

    fn load(&self) -> AppResult<Option<TokenBundle>> {
        let output = self.run(&[
            "find-generic-password",
            "-s",
            self.service.as_str(),
            "-a",
            self.account.as_str(),
            "-w",
        ])?;

        if !output.status.success() {
            let diagnostic = command_diagnostic(&output);
            let not_found = output.status.code() == Some(KEYCHAIN_ITEM_NOT_FOUND)
                || diagnostic.contains("could not be found");
            if not_found {
                return Ok(None);
            }
            return Err(format!(
                "TOKEN_STORE_ERROR: Failed to load token from macOS Keychain: {diagnostic}"
            )
            .into());
        }

        let payload = String::from_utf8_lossy(&output.stdout);
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(payload).map(Some).map_err(|e| {
            format!("TOKEN_STORE_ERROR: Stored keychain token payload is invalid JSON ({e})").into()
        })
    }

    fn save(&self, bundle: &TokenBundle) -> AppResult<()> {
        let payload = to_pretty_json(bundle)?;
        // `-U` updates the existing item instead of failing on a duplicate.
        let output = self.run(&[
            "add-generic-password",
            "-U",
            "-s",
            self.service.as_str(),
            "-a",
            self.account.as_str(),
            "-w",
            payload.as_str(),
        ])?;
        if !output.status.success() {
            return Err(format!(
                "TOKEN_STORE_ERROR: Failed to save token to macOS Keychain: {}",
                command_diagnostic(&output)
            )
            .into());
        }
        tracing::debug!(service = %self.service, "token bundle written to keychain");
        Ok(())
    }
}
