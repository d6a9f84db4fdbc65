//! Error handling for the relay server

use std::fmt;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay server error types
///
/// Errors are always local to the offending connection: a failure while
/// handling one client never propagates to another session beyond a
/// departure notice.
#[derive(Debug, Clone)]
pub enum RelayError {
    /// Bad credentials on the first frame
    Auth(String),
    /// Private message or command referencing an unknown user or group
    UnknownTarget(String),
    /// Group operation by a user outside the permanent roster
    PermissionDenied(String),
    /// Invalid or interrupted file transfer
    Transfer(String),
    /// Requested file does not exist
    NotFound(String),
    /// I/O failure on a connection
    Transport(String),
    /// Malformed frame or command
    Protocol(String),
    /// Configuration error
    Config(String),
    /// Server internal error
    Internal(String),
}

impl RelayError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            RelayError::Auth(_) => 1000,
            RelayError::UnknownTarget(_) => 1001,
            RelayError::PermissionDenied(_) => 1002,
            RelayError::Transfer(_) => 1003,
            RelayError::NotFound(_) => 1004,
            RelayError::Transport(_) => 1005,
            RelayError::Protocol(_) => 1006,
            RelayError::Config(_) => 1007,
            RelayError::Internal(_) => 1008,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            RelayError::Auth(msg) => msg,
            RelayError::UnknownTarget(msg) => msg,
            RelayError::PermissionDenied(msg) => msg,
            RelayError::Transfer(msg) => msg,
            RelayError::NotFound(msg) => msg,
            RelayError::Transport(msg) => msg,
            RelayError::Protocol(msg) => msg,
            RelayError::Config(msg) => msg,
            RelayError::Internal(msg) => msg,
        }
    }

    /// Create a transfer error
    pub fn transfer<T: Into<String>>(msg: T) -> Self {
        RelayError::Transfer(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        RelayError::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        RelayError::Config(msg.into())
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            RelayError::UnknownTarget(msg) => write!(f, "Unknown target: {}", msg),
            RelayError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            RelayError::Transfer(msg) => write!(f, "Transfer error: {}", msg),
            RelayError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            RelayError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RelayError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Transport(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Config(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Internal(format!("{}", err))
    }
}
