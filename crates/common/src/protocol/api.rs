// REST contract with the document backend.
//
// Field names follow the backend's JSON; conversions into the domain types
// in `crate::types` live next to each wire struct.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{CreatedRoom, RoomContent, RoomId, RoomSummary};

// ── Paths ──────────────────────────────────────────────────────────
pub const VIEW_PERMISSION_PATH: &str = "/main/read_permission";
pub const EDIT_PERMISSION_PATH: &str = "/main/edit_permission";
pub const ROOM_LIST_PATH: &str = "/rooms";
pub const ROOM_CONTENT_PATH: &str = "/content/getcontent";
pub const ROOM_CONTENT_UPDATE_PATH: &str = "/content/update";
pub const ROOM_CREATE_PATH: &str = "/content/createdoc";

// ── Query parameters ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PermissionQuery<'a> {
    pub room_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomListQuery<'a> {
    pub userid: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomContentQuery<'a> {
    pub room_id: &'a str,
}

// ── Bodies ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentUpdateRequest {
    pub room_id: RoomId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomRequest {
    pub room_name: String,
    pub user_id: String,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomListEntry {
    pub room_id: RoomId,
    pub room_name: String,
    pub owner_user_name: String,
    #[serde(default)]
    pub permission: i64,
}

impl From<RoomListEntry> for RoomSummary {
    fn from(entry: RoomListEntry) -> Self {
        Self { room_id: entry.room_id, room_name: entry.room_name, owner_name: entry.owner_user_name }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomContentResponse {
    pub room_id: RoomId,
    #[serde(default)]
    pub room_name: String,
    #[serde(default)]
    pub content: String,
}

impl From<RoomContentResponse> for RoomContent {
    fn from(response: RoomContentResponse) -> Self {
        Self { room_id: response.room_id, content: response.content }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomResponse {
    pub room_id: RoomId,
    pub room_name: String,
    #[serde(alias = "create_time")]
    pub created_at: NaiveDate,
}

impl From<CreateRoomResponse> for CreatedRoom {
    fn from(response: CreateRoomResponse) -> Self {
        Self {
            room_id: response.room_id,
            room_name: response.room_name,
            created_at: response.created_at,
        }
    }
}
