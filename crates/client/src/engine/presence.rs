// Presence records carried on the awareness channel.
//
// Web peers publish `{ user: { id, name, color } }`; other shapes are kept
// as anonymous peers so the head count stays in step with the room.

use serde::{Deserialize, Serialize};
use yrs::sync::Awareness;

use mdroom_common::types::UserContext;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUser {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceState {
    pub user: PresenceUser,
}

impl PresenceState {
    pub fn for_user(user: &UserContext) -> Self {
        Self {
            user: PresenceUser {
                id: user.client_id.clone(),
                name: user.display_name.clone(),
                color: Some(user.avatar_color()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresencePeer {
    pub client_id: u64,
    pub clock: u32,
    /// `None` when the peer's state is not a recognised presence record.
    pub presence: Option<PresenceState>,
}

impl PresencePeer {
    pub fn display_name(&self) -> Option<&str> {
        self.presence.as_ref().map(|state| state.user.name.as_str())
    }
}

/// Every awareness entry that currently carries a state, the local one included.
pub fn list_peers(awareness: &Awareness) -> Vec<PresencePeer> {
    let mut peers: Vec<PresencePeer> = awareness
        .iter()
        .filter_map(|(client_id, entry)| {
            let data = entry.data?;
            Some(PresencePeer {
                client_id,
                clock: entry.clock,
                presence: serde_json::from_str(data.as_ref()).ok(),
            })
        })
        .collect();
    peers.sort_unstable_by_key(|peer| peer.client_id);
    peers
}

pub fn peer_count(awareness: &Awareness) -> usize {
    awareness.iter().filter(|(_, entry)| entry.data.is_some()).count()
}
