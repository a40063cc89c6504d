//! Usage: Pending authorization document written by `oauth-start`/`oauth-login`.

use crate::shared::time::{parse_iso, to_iso_z};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `{state, redirect_uri, created_at}`; each new authorization request replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub state: String,
    pub redirect_uri: String,
    pub created_at: String,
}

impl AuthorizationState {
    pub(crate) fn new(state: &str, redirect_uri: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            state: state.to_string(),
            redirect_uri: redirect_uri.to_string(),
            created_at: to_iso_z(&created_at),
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_iso(&self.created_at)
    }

    pub(crate) fn expected_state(&self) -> Option<&str> {
        Some(self.state.trim()).filter(|v| !v.is_empty())
    }
}
