//! Usage: Persistence for the pending authorization `state` document.

use crate::domain::authorization_state::AuthorizationState;
use crate::infra::secure_file::{read_json, write_json_secure};
use crate::shared::error::AppResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, doc: &AuthorizationState) -> AppResult<()> {
        write_json_secure(&self.path, doc)?;
        tracing::debug!(path = %self.path.display(), "authorization state saved");
        Ok(())
    }

    pub fn load(&self) -> AppResult<Option<AuthorizationState>> {
        read_json(&self.path)
    }
}
