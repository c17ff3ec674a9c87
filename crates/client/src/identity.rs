// Local identity: the stable per-install client id and the display name
// announced on the presence channel.

use std::fs;
use std::path::{Path, PathBuf};

use mdroom_common::types::UserContext;
use thiserror::Error;
use tracing::info;

use crate::config::{client_dir, ensure_owner_only, ClientConfig};

const CLIENT_ID_FILE: &str = "client_id";
const CLIENT_ID_PREFIX: &str = "uid-";
const FALLBACK_DISPLAY_NAME: &str = "User";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("failed to access client id file `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("client id file `{path}` holds an invalid id `{value}`")]
    InvalidClientId { path: PathBuf, value: String },
}

/// Path to the client id file: `~/.mdroom/client_id`.
pub fn client_id_path() -> Option<PathBuf> {
    client_dir().map(|d| d.join(CLIENT_ID_FILE))
}

/// Read the client id at `path`, generating and storing one on first use.
pub fn load_or_create_client_id(path: &Path) -> Result<String, IdentityError> {
    let io_err = |source| IdentityError::Io { path: path.to_path_buf(), source };

    match fs::read_to_string(path) {
        Ok(contents) => {
            let value = contents.trim().to_string();
            if !is_valid_client_id(&value) {
                return Err(IdentityError::InvalidClientId { path: path.to_path_buf(), value });
            }
            Ok(value)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
                ensure_owner_only(parent, 0o700).map_err(io_err)?;
            }
            let id = generate_client_id();
            fs::write(path, format!("{id}\n")).map_err(io_err)?;
            ensure_owner_only(path, 0o600).map_err(io_err)?;
            info!(client_id = %id, path = %path.display(), "generated client id");
            Ok(id)
        }
        Err(error) => Err(io_err(error)),
    }
}

/// `uid-` followed by eight lowercase hex digits.
pub fn generate_client_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("{CLIENT_ID_PREFIX}{}", &simple[..8])
}

fn is_valid_client_id(value: &str) -> bool {
    value.strip_prefix(CLIENT_ID_PREFIX).is_some_and(|rest| {
        !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// First non-blank of `display_name`, `email`, then `"User"`.
pub fn resolve_display_name(display_name: Option<&str>, email: Option<&str>) -> String {
    [display_name, email]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|name| !name.is_empty())
        .unwrap_or(FALLBACK_DISPLAY_NAME)
        .to_string()
}

/// Build the user context from config plus the stored client id.
pub fn user_context(config: &ClientConfig) -> Result<UserContext, IdentityError> {
    let path = client_id_path().ok_or(IdentityError::NoHomeDir)?;
    user_context_at(config, &path)
}

pub fn user_context_at(config: &ClientConfig, id_path: &Path) -> Result<UserContext, IdentityError> {
    Ok(UserContext {
        user_id: config.user_id.clone(),
        client_id: load_or_create_client_id(id_path)?,
        display_name: resolve_display_name(config.display_name.as_deref(), config.email.as_deref()),
    })
}
