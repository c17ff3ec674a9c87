// Collaboration endpoint conventions (y-websocket compatible).

use crate::types::RoomId;

/// Name of the shared text type every peer binds its editor to.
pub const SHARED_TEXT_NAME: &str = "monaco";

/// Build the websocket URL for a room: `{base}/{room_id}`.
pub fn room_endpoint(base_url: &str, room: &RoomId) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), room.as_str())
}
