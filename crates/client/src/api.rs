// REST client for the document backend.
//
// One `ApiClient` is bound to one user: it answers permission queries for
// the `PermissionGate` seam and room-directory calls for the CLI and the
// save path of the runtime.

use std::time::Duration;

use async_trait::async_trait;
use mdroom_common::protocol::api::{
    ContentUpdateRequest, CreateRoomRequest, CreateRoomResponse, PermissionQuery,
    RoomContentQuery, RoomContentResponse, RoomListEntry, RoomListQuery, EDIT_PERMISSION_PATH,
    ROOM_CONTENT_PATH, ROOM_CONTENT_UPDATE_PATH, ROOM_CREATE_PATH, ROOM_LIST_PATH,
    VIEW_PERMISSION_PATH,
};
use mdroom_common::types::{CreatedRoom, RoomContent, RoomId, RoomSummary};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::permission::{PermissionError, PermissionGate};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid api_url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {path} failed: {source}")]
    Request {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path} returned {status}: {body}")]
    Status { path: &'static str, status: u16, body: String },
    #[error("failed to decode {path} response: {source}")]
    Decode {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Room listing, content and creation calls.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError>;

    async fn fetch_content(&self, room: &RoomId) -> Result<RoomContent, ApiError>;

    async fn update_content(&self, room: &RoomId, content: &str) -> Result<(), ApiError>;

    async fn create_room(&self, room_name: &str) -> Result<CreatedRoom, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    user_id: String,
}

impl ApiClient {
    /// `request_timeout` of `None` leaves requests unbounded.
    pub fn new(
        base_url: &str,
        user_id: impl Into<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|error| ApiError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: error.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "expected an http or https url".to_string(),
            });
        }

        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ApiError::Client)?;

        Ok(Self { http, base_url, user_id: user_id.into() })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Join an absolute API path onto the base URL, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn check_permission(&self, path: &'static str, room: &RoomId) -> Result<bool, ApiError> {
        let query = PermissionQuery { room_id: room.as_str(), user_id: &self.user_id };
        let response = self
            .http
            .get(self.endpoint(path))
            .query(&query)
            .send()
            .await
            .map_err(|source| ApiError::Request { path, source })?;
        // The backend may answer `null` for unknown rooms.
        let allowed: Option<bool> = decode(path, response).await?;
        Ok(allowed.unwrap_or(false))
    }
}

async fn decode<T: DeserializeOwned>(path: &'static str, response: Response) -> Result<T, ApiError> {
    let response = ensure_success(path, response).await?;
    response.json::<T>().await.map_err(|source| ApiError::Decode { path, source })
}

async fn ensure_success(path: &'static str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| status.to_string());
    Err(ApiError::Status { path, status: status.as_u16(), body })
}

#[async_trait]
impl PermissionGate for ApiClient {
    async fn check_view(&self, room: &RoomId) -> Result<bool, PermissionError> {
        Ok(self.check_permission(VIEW_PERMISSION_PATH, room).await?)
    }

    async fn check_edit(&self, room: &RoomId) -> Result<bool, PermissionError> {
        Ok(self.check_permission(EDIT_PERMISSION_PATH, room).await?)
    }
}

#[async_trait]
impl RoomDirectory for ApiClient {
    async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        let path = ROOM_LIST_PATH;
        let response = self
            .http
            .get(self.endpoint(path))
            .query(&RoomListQuery { userid: &self.user_id })
            .send()
            .await
            .map_err(|source| ApiError::Request { path, source })?;
        let entries: Vec<RoomListEntry> = decode(path, response).await?;
        debug!(count = entries.len(), "listed rooms");
        Ok(entries.into_iter().map(Into::into).collect())
    }

    async fn fetch_content(&self, room: &RoomId) -> Result<RoomContent, ApiError> {
        let path = ROOM_CONTENT_PATH;
        let response = self
            .http
            .get(self.endpoint(path))
            .query(&RoomContentQuery { room_id: room.as_str() })
            .send()
            .await
            .map_err(|source| ApiError::Request { path, source })?;
        let content: RoomContentResponse = decode(path, response).await?;
        Ok(content.into())
    }

    async fn update_content(&self, room: &RoomId, content: &str) -> Result<(), ApiError> {
        let path = ROOM_CONTENT_UPDATE_PATH;
        let body = ContentUpdateRequest { room_id: room.clone(), content: content.to_string() };
        let response = self
            .http
            .post(self.endpoint(path))
            .json(&body)
            .send()
            .await
            .map_err(|source| ApiError::Request { path, source })?;
        ensure_success(path, response).await?;
        debug!(room = %room, bytes = content.len(), "room content saved");
        Ok(())
    }

    async fn create_room(&self, room_name: &str) -> Result<CreatedRoom, ApiError> {
        let path = ROOM_CREATE_PATH;
        let body =
            CreateRoomRequest { room_name: room_name.to_string(), user_id: self.user_id.clone() };
        let response = self
            .http
            .post(self.endpoint(path))
            .json(&body)
            .send()
            .await
            .map_err(|source| ApiError::Request { path, source })?;
        let created: CreateRoomResponse = decode(path, response).await?;
        Ok(created.into())
    }
}
