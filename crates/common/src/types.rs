// Core domain types shared across all mdroom crates.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier of a collaboratively-edited document.
///
/// The same value keys the buffer cache, the permission queries and the
/// collaboration endpoint path, so it is kept verbatim (no normalization).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: impl Into<String>) -> Result<Self, RoomIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(RoomIdError::Empty);
        }
        if value.contains('/') {
            return Err(RoomIdError::InvalidChar('/'));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomIdError {
    #[error("room id must not be empty")]
    Empty,
    #[error("room id must not contain `{0}`")]
    InvalidChar(char),
}

/// Connection status of the active collaboration session as seen by the UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No room attached.
    #[default]
    None,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the local user, injected into the controller and the permission gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// Backend account id used for permission and room-list queries.
    pub user_id: String,
    /// Stable per-install id announced on the presence channel.
    pub client_id: String,
    pub display_name: String,
}

impl UserContext {
    /// Uppercase first character of the display name, `U` when empty.
    pub fn avatar_initial(&self) -> char {
        self.display_name.chars().next().map(|c| c.to_ascii_uppercase()).unwrap_or('U')
    }

    /// Deterministic `hsl(..)` colour derived from the display name.
    pub fn avatar_color(&self) -> String {
        avatar_color(&self.display_name)
    }
}

/// Java-style string hash folded into a hue.
pub fn avatar_color(name: &str) -> String {
    let mut hash: i32 = 0;
    for unit in name.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    let hue = hash.unsigned_abs() % 360;
    format!("hsl({hue} 70% 45%)")
}

/// A room visible to the current user, as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub room_name: String,
    pub owner_name: String,
}

/// Stored content of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomContent {
    pub room_id: RoomId,
    pub content: String,
}

/// Result of creating a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRoom {
    pub room_id: RoomId,
    pub room_name: String,
    pub created_at: NaiveDate,
}
