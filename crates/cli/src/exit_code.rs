// Consistent exit codes for the mdroom CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/configuration error
//   11 = permission denied
//   13 = network error

use std::process;

use mdroom_client::api::ApiError;
use mdroom_client::config::ConfigError;
use mdroom_client::identity::IdentityError;
use mdroom_client::permission::PermissionError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Denied = 11,
    Network = 13,
}

/// Marker error for a room the backend refused to show or edit.
#[derive(Debug)]
pub struct AccessDenied(pub String);

impl std::fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "permission denied for room `{}`", self.0)
    }
}

impl std::error::Error for AccessDenied {}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<AccessDenied>().is_some() {
                return Self::Denied;
            }
            if let Some(api) = cause.downcast_ref::<ApiError>() {
                return Self::from_api(api);
            }
            if let Some(PermissionError::Api(api)) = cause.downcast_ref::<PermissionError>() {
                return Self::from_api(api);
            }
            if cause.downcast_ref::<ConfigError>().is_some()
                || cause.downcast_ref::<IdentityError>().is_some()
            {
                return Self::Usage;
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut => {
                        Self::Network
                    }
                    _ => Self::Error,
                };
            }
        }

        let msg = format!("{err:#}");
        if msg.contains("user_id") {
            return Self::Usage;
        }
        Self::Error
    }

    fn from_api(err: &ApiError) -> Self {
        match err {
            ApiError::InvalidBaseUrl { .. } => Self::Usage,
            ApiError::Request { .. } => Self::Network,
            ApiError::Status { status: 401 | 403, .. } => Self::Denied,
            ApiError::Client(_) | ApiError::Status { .. } | ApiError::Decode { .. } => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
