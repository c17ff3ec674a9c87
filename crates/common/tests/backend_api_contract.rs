use mdroom_common::protocol::api::{
    ContentUpdateRequest, CreateRoomRequest, CreateRoomResponse, RoomContentResponse,
    RoomListEntry, EDIT_PERMISSION_PATH, ROOM_CONTENT_PATH, ROOM_CONTENT_UPDATE_PATH,
    ROOM_CREATE_PATH, ROOM_LIST_PATH, VIEW_PERMISSION_PATH,
};
use mdroom_common::protocol::collab::{room_endpoint, SHARED_TEXT_NAME};
use mdroom_common::types::RoomId;
use serde_json::json;

/// Backend routes as served by the document backend.
fn contract() -> serde_json::Value {
    json!({
        "routes": {
            "view_permission": "/main/read_permission",
            "edit_permission": "/main/edit_permission",
            "room_list": "/rooms",
            "room_content": "/content/getcontent",
            "content_update": "/content/update",
            "room_create": "/content/createdoc"
        },
        "shared_text": "monaco"
    })
}

#[test]
fn route_constants_match_backend() {
    let contract = contract();
    let routes = &contract["routes"];
    assert_eq!(VIEW_PERMISSION_PATH, routes["view_permission"]);
    assert_eq!(EDIT_PERMISSION_PATH, routes["edit_permission"]);
    assert_eq!(ROOM_LIST_PATH, routes["room_list"]);
    assert_eq!(ROOM_CONTENT_PATH, routes["room_content"]);
    assert_eq!(ROOM_CONTENT_UPDATE_PATH, routes["content_update"]);
    assert_eq!(ROOM_CREATE_PATH, routes["room_create"]);
}

#[test]
fn shared_text_name_matches_web_peers() {
    assert_eq!(SHARED_TEXT_NAME, contract()["shared_text"]);
    let room: RoomId = "042113".parse().unwrap();
    assert_eq!(room_endpoint("ws://collab.local:1234", &room), "ws://collab.local:1234/042113");
}

#[test]
fn request_bodies_use_backend_field_names() {
    let update = ContentUpdateRequest { room_id: "042113".parse().unwrap(), content: "x".into() };
    assert_eq!(serde_json::to_value(update).unwrap(), json!({ "room_id": "042113", "content": "x" }));

    let create = CreateRoomRequest { room_name: "Plan".into(), user_id: "7".into() };
    assert_eq!(serde_json::to_value(create).unwrap(), json!({ "room_name": "Plan", "user_id": "7" }));
}

#[test]
fn backend_responses_decode() {
    let rooms: Vec<RoomListEntry> = serde_json::from_value(json!([
        { "room_id": "042113", "room_name": "Notes", "owner_user_name": "ada" }
    ]))
    .unwrap();
    assert_eq!(rooms[0].permission, 0);

    let content: RoomContentResponse =
        serde_json::from_value(json!({ "room_id": "042113", "room_name": "Notes", "content": "# Notes\n" }))
            .unwrap();
    assert_eq!(content.content, "# Notes\n");

    let created: CreateRoomResponse = serde_json::from_value(
        json!({ "room_id": "123456", "room_name": "Plan", "created_at": "2026-10-19" }),
    )
    .unwrap();
    assert_eq!(created.room_id.as_str(), "123456");
}
