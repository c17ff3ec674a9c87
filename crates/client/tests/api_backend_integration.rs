use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mdroom_client::api::{ApiClient, ApiError, RoomDirectory};
use mdroom_client::permission::{Access, GuardedGate, PermissionError, PermissionGate};
use mdroom_common::protocol::api::ContentUpdateRequest;
use mdroom_common::types::RoomId;
use serde_json::{json, Value};
use tokio::net::TcpListener;

type Params = Query<HashMap<String, String>>;

#[derive(Clone, Default)]
struct Backend {
    updates: Arc<Mutex<Vec<ContentUpdateRequest>>>,
}

async fn read_permission(Query(params): Params) -> Json<Value> {
    let allowed = params.get("user_id").map(String::as_str) == Some("7");
    match params.get("room_id").map(String::as_str) {
        Some("open") => Json(json!(allowed)),
        Some("closed") => Json(json!(false)),
        _ => Json(Value::Null),
    }
}

async fn edit_permission() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable")
}

async fn rooms(Query(params): Params) -> Json<Value> {
    assert_eq!(params.get("userid").map(String::as_str), Some("7"));
    Json(json!([
        { "room_id": "042113", "room_name": "Notes", "owner_user_name": "ada", "permission": 2 },
        { "room_id": "771002", "room_name": "Plan", "owner_user_name": "grace", "permission": 1 }
    ]))
}

async fn content(Query(params): Params) -> Json<Value> {
    let room_id = params.get("room_id").cloned().unwrap_or_default();
    Json(json!({ "room_id": room_id, "room_name": "Notes", "content": "# Notes\n" }))
}

async fn update(State(backend): State<Backend>, Json(body): Json<ContentUpdateRequest>) -> Json<Value> {
    let room_id = body.room_id.to_string();
    backend.updates.lock().unwrap().push(body);
    Json(json!({ "msg": "ok", "room_id": room_id }))
}

async fn create(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["user_id"], "7");
    Json(json!({ "room_id": "123456", "room_name": body["room_name"], "create_time": "2026-10-19" }))
}

async fn spawn_backend() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/main/read_permission", get(read_permission))
        .route("/main/edit_permission", get(edit_permission))
        .route("/rooms", get(rooms))
        .route("/content/getcontent", get(content))
        .route("/content/update", post(update))
        .route("/content/createdoc", post(create))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("backend should bind");
    let addr = listener.local_addr().expect("backend address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("backend should serve");
    });
    (format!("http://{addr}"), backend)
}

fn room(id: &str) -> RoomId {
    id.parse().expect("room id should parse")
}

#[tokio::test]
async fn view_permission_reads_boolean_and_null() {
    let (base, _) = spawn_backend().await;
    let client = ApiClient::new(&base, "7", Some(Duration::from_secs(5))).unwrap();

    assert!(client.check_view(&room("open")).await.unwrap());
    assert!(!client.check_view(&room("closed")).await.unwrap());
    assert!(!client.check_view(&room("unknown")).await.unwrap());

    let stranger = ApiClient::new(&base, "8", None).unwrap();
    assert!(!stranger.check_view(&room("open")).await.unwrap());
}

#[tokio::test]
async fn server_error_surfaces_as_status_and_gate_denies() {
    let (base, _) = spawn_backend().await;
    let client = Arc::new(ApiClient::new(&base, "7", None).unwrap());

    match client.check_edit(&room("open")).await {
        Err(PermissionError::Api(ApiError::Status { status, body, .. })) => {
            assert_eq!(status, 500);
            assert_eq!(body, "database unavailable");
        }
        other => panic!("unexpected result {other:?}"),
    }

    let gate = GuardedGate::new(client, Some(Duration::from_secs(5)));
    assert!(!gate.allows(Access::Edit, &room("open")).await);
    assert!(gate.allows(Access::View, &room("open")).await);
}

#[tokio::test]
async fn directory_calls_map_backend_payloads() {
    let (base, backend) = spawn_backend().await;
    let client = ApiClient::new(&base, "7", None).unwrap();

    let rooms = client.list_rooms().await.unwrap();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].room_id, room("042113"));
    assert_eq!(rooms[1].owner_name, "grace");

    let stored = client.fetch_content(&room("042113")).await.unwrap();
    assert_eq!(stored.content, "# Notes\n");

    client.update_content(&room("042113"), "# Notes\nmore\n").await.unwrap();
    assert_eq!(
        backend.updates.lock().unwrap().clone(),
        vec![ContentUpdateRequest { room_id: room("042113"), content: "# Notes\nmore\n".into() }]
    );

    let created = client.create_room("Roadmap").await.unwrap();
    assert_eq!(created.room_id, room("123456"));
    assert_eq!(created.room_name, "Roadmap");
}

#[tokio::test]
async fn unreachable_backend_is_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ApiClient::new(&format!("http://{addr}"), "7", Some(Duration::from_secs(2))).unwrap();
    assert!(matches!(client.list_rooms().await, Err(ApiError::Request { .. })));
}
