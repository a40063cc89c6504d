//! Usage: Owner-only JSON document read/write helpers.

use crate::shared::error::AppResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// `Ok(None)` when the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> AppResult<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(format!(
                "TOKEN_STORE_ERROR: failed to read {}: {err}",
                path.display()
            )
            .into())
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| format!("TOKEN_STORE_ERROR: Invalid JSON file: {} ({e})", path.display()).into())
}

pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| format!("SYSTEM_ERROR: failed to serialize json: {e}").into())
}

/// Writes pretty JSON plus newline. New files are created 0600; permissions are restricted
/// again after the write for files that already existed with wider bits.
pub(crate) fn write_json_secure<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let text = to_pretty_json(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "TOKEN_STORE_ERROR: failed to create {}: {e}",
                parent.display()
            )
        })?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }

    let mut file = options
        .open(path)
        .map_err(|e| format!("TOKEN_STORE_ERROR: failed to open {}: {e}", path.display()))?;
    file.write_all(text.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| format!("TOKEN_STORE_ERROR: failed to write {}: {e}", path.display()))?;

    restrict_permissions(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE)).map_err(|e| {
        format!(
            "TOKEN_STORE_ERROR: failed to restrict permissions on {}: {e}",
            path.display()
        )
        .into()
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> AppResult<()> {
    Ok(())
}
