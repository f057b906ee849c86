//! Error types for the control plane

use http::StatusCode;
use thiserror::Error;

/// Credential resolution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credential")]
    Invalid,

    #[error("credential has been revoked")]
    Revoked,

    #[error("credential has expired")]
    Expired,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Invalid => "AuthInvalid",
            AuthError::Revoked => "AuthRevoked",
            AuthError::Expired => "AuthExpired",
        }
    }
}

/// Remote execution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteExecError {
    #[error("command on {host} timed out after {timeout_ms}ms")]
    Timeout { host: String, timeout_ms: u64 },

    #[error("command on {host} exited with {exit_code}: {stderr}")]
    CommandFailed {
        host: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("no connection to {host}: {reason}")]
    ConnectionUnavailable { host: String, reason: String },

    #[error("host {0} is not in the allow-list")]
    HostNotAllowed(String),
}

impl RemoteExecError {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteExecError::Timeout { .. } => "RemoteTimeout",
            RemoteExecError::CommandFailed { .. } => "RemoteCommandFailed",
            RemoteExecError::ConnectionUnavailable { .. } => "RemoteConnectionUnavailable",
            RemoteExecError::HostNotAllowed(_) => "RemoteHostNotAllowed",
        }
    }
}

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum PlaneError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("slot registry version conflict for {project}/{environment}")]
    SlotConflict { project: String, environment: String },

    #[error("invalid slot transition: {0}")]
    InvalidTransition(String),

    #[error("slot not ready for promotion: {0}")]
    NotReady(String),

    #[error("no grace slot to roll back to for {project}/{environment}")]
    NoGraceSlot { project: String, environment: String },

    #[error("health check failed on {slot} (port {port}): {reason}")]
    HealthCheckFailed {
        slot: String,
        port: u16,
        reason: String,
    },

    #[error("team still owns {0} project environment(s)")]
    TeamNotEmpty(usize),

    #[error("remote execution failed: {0}")]
    RemoteExec(#[from] RemoteExecError),

    #[error("slot registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaneError {
    /// Stable kind string surfaced to callers and written to the audit log
    pub fn kind(&self) -> &'static str {
        match self {
            PlaneError::Auth(e) => e.kind(),
            PlaneError::PermissionDenied(_) => "PermissionDenied",
            PlaneError::Validation(_) => "ValidationError",
            PlaneError::SlotConflict { .. } => "SlotConflict",
            PlaneError::InvalidTransition(_) => "InvalidTransition",
            PlaneError::NotReady(_) => "NotReady",
            PlaneError::NoGraceSlot { .. } => "NoGraceSlot",
            PlaneError::HealthCheckFailed { .. } => "HealthCheckFailed",
            PlaneError::TeamNotEmpty(_) => "TeamNotEmpty",
            PlaneError::RemoteExec(e) => e.kind(),
            PlaneError::RegistryUnavailable(_) => "RegistryUnavailable",
            PlaneError::NotFound(_) => "NotFound",
            PlaneError::IoError(_) => "IoError",
            PlaneError::JsonError(_) => "JsonError",
            PlaneError::HttpError(_) => "HttpError",
            PlaneError::ConfigError(_) => "ConfigError",
            PlaneError::ServerError(_) => "ServerError",
            PlaneError::ShutdownError(_) => "ShutdownError",
            PlaneError::Internal(_) => "Internal",
        }
    }

    /// HTTP status for the tool endpoint
    pub fn status_code(&self) -> StatusCode {
        match self {
            PlaneError::Auth(_) => StatusCode::UNAUTHORIZED,
            PlaneError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            PlaneError::Validation(_) => StatusCode::BAD_REQUEST,
            PlaneError::SlotConflict { .. }
            | PlaneError::InvalidTransition(_)
            | PlaneError::NotReady(_)
            | PlaneError::NoGraceSlot { .. }
            | PlaneError::TeamNotEmpty(_) => StatusCode::CONFLICT,
            PlaneError::HealthCheckFailed { .. } | PlaneError::RemoteExec(_) => {
                StatusCode::BAD_GATEWAY
            }
            PlaneError::RegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PlaneError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rejected before any side effect took place
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PlaneError::Auth(_) | PlaneError::PermissionDenied(_) | PlaneError::Validation(_)
        )
    }
}

impl From<anyhow::Error> for PlaneError {
    fn from(err: anyhow::Error) -> Self {
        PlaneError::Internal(err.to_string())
    }
}
