// Client configuration at `~/.mdroom/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::buffer_cache::DEFAULT_CACHE_CAPACITY;

pub const DEFAULT_API_URL: &str = "http://localhost:9000";
pub const DEFAULT_COLLAB_URL: &str = "ws://localhost:1234";
pub const DEFAULT_DOCUMENT_CONTENT: &str = "# New document\n";

/// Root directory for client state: `~/.mdroom/`.
pub fn client_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".mdroom"))
}

/// Path to the config file: `~/.mdroom/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    client_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the document backend (permissions, room list, content).
    pub api_url: String,
    /// Base URL of the collaboration endpoint; the room id is appended.
    pub collab_url: String,
    /// Backend account id. Empty until the user signs in.
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Text seeded into an empty shared document after the first sync.
    pub default_content: String,
    pub cache: CacheConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            collab_url: DEFAULT_COLLAB_URL.to_string(),
            user_id: String::new(),
            display_name: None,
            email: None,
            default_content: DEFAULT_DOCUMENT_CONTENT.to_string(),
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from `~/.mdroom/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            ensure_owner_only(parent, 0o700)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        ensure_owner_only(path, 0o600)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of editor buffers kept alive.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_CACHE_CAPACITY }
    }
}

/// Timeouts in milliseconds. Zero disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub permission_ms: u64,
    pub connect_ms: u64,
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { permission_ms: 5_000, connect_ms: 10_000, request_ms: 10_000 }
    }
}

impl TimeoutConfig {
    pub fn permission(&self) -> Option<Duration> {
        millis(self.permission_ms)
    }

    pub fn connect(&self) -> Option<Duration> {
        millis(self.connect_ms)
    }

    pub fn request(&self) -> Option<Duration> {
        millis(self.request_ms)
    }
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

/// Restrict `path` to the owner (`0o700` for dirs, `0o600` for files).
pub(crate) fn ensure_owner_only(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let current = std::fs::metadata(path)?.permissions().mode() & 0o777;
        if current != mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}
