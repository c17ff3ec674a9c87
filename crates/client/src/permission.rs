// Permission gate: asynchronous view/edit authorization for the local user.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdroom_common::types::RoomId;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::ApiError;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("permission service unavailable: {0}")]
    Unavailable(String),
}

/// Pure queries against the permission authority; implementations bind the
/// user identity themselves.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check_view(&self, room: &RoomId) -> Result<bool, PermissionError>;

    async fn check_edit(&self, room: &RoomId) -> Result<bool, PermissionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    View,
    Edit,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::View => "view",
            Self::Edit => "edit",
        })
    }
}

/// Fail-closed wrapper: errors and timeouts both read as "denied".
#[derive(Clone)]
pub struct GuardedGate {
    inner: Arc<dyn PermissionGate>,
    timeout: Option<Duration>,
}

impl GuardedGate {
    /// `timeout` of `None` waits for the authority indefinitely.
    pub fn new(inner: Arc<dyn PermissionGate>, timeout: Option<Duration>) -> Self {
        Self { inner, timeout }
    }

    pub async fn allows(&self, access: Access, room: &RoomId) -> bool {
        let check = async {
            match access {
                Access::View => self.inner.check_view(room).await,
                Access::Edit => self.inner.check_edit(room).await,
            }
        };

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, check).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(room = %room, %access, ?limit, "permission check timed out, denying");
                    return false;
                }
            },
            None => check.await,
        };

        match outcome {
            Ok(allowed) => {
                debug!(room = %room, %access, allowed, "permission resolved");
                allowed
            }
            Err(error) => {
                warn!(room = %room, %access, %error, "permission check failed, denying");
                false
            }
        }
    }
}
