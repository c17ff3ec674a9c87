use std::fmt;

use thiserror::Error;
use yrs::Origin;

/// Who produced a transaction on a shared document.
///
/// Encoded as the transaction origin so observers can tell local editor
/// input apart from updates applied on behalf of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnOrigin {
    /// Keystrokes from the local editor buffer.
    LocalEdit,
    /// One-time seeding of an empty shared text from the cached buffer.
    Seed,
    /// Updates received from the collaboration endpoint.
    Remote,
}

impl TxnOrigin {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalEdit => "mdroom:local-edit",
            Self::Seed => "mdroom:seed",
            Self::Remote => "mdroom:remote",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OriginDecodeError> {
        [Self::LocalEdit, Self::Seed, Self::Remote]
            .into_iter()
            .find(|origin| origin.as_str().as_bytes() == bytes)
            .ok_or_else(|| OriginDecodeError::Unknown(String::from_utf8_lossy(bytes).into_owned()))
    }

    /// Classify a yrs transaction origin; `None` for untagged transactions.
    pub fn classify(origin: Option<&Origin>) -> Option<Self> {
        origin.and_then(|value| Self::from_bytes(value.as_ref()).ok())
    }

    /// Whether updates with this origin must be forwarded to remote peers.
    pub fn is_outbound(origin: Option<&Origin>) -> bool {
        Self::classify(origin) != Some(Self::Remote)
    }
}

impl fmt::Display for TxnOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TxnOrigin> for Origin {
    fn from(origin: TxnOrigin) -> Self {
        Origin::from(origin.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OriginDecodeError {
    #[error("unknown transaction origin `{0}`")]
    Unknown(String),
}
