//! Error types for the OpenAgents network node

use thiserror::Error;

/// Result type alias using the node's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the network node
///
/// Every variant that can cross a transport boundary maps onto a stable
/// wire code (see [`Error::code`]); HTTP responses carry the code in
/// `error_message` and streaming connections send it in a terminating
/// `error` frame.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Registration requires a group password and none matched
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Presented secret did not match the stored secret
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Agent id is already registered and force_reconnect was not set
    #[error("Duplicate agent: {0}")]
    DuplicateAgent(String),

    /// Agent id is not registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Event failed structural validation
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Mod path does not resolve to a loaded or loadable mod
    #[error("Unknown mod: {0}")]
    UnknownMod(String),

    /// Mod resolved but failed to initialize
    #[error("Mod load failed: {0}")]
    ModLoadFailed(String),

    /// Workspace write or read failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Deadline exceeded
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Caller's group does not permit the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Transport-level failure (connection reset, frame decode)
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable wire code for this error, shared by the HTTP and streaming
    /// surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Error::AuthenticationRequired(_) => "authentication_required",
            Error::AuthenticationFailed(_) => "authentication_failed",
            Error::DuplicateAgent(_) => "duplicate_agent",
            Error::UnknownAgent(_) => "unknown_agent",
            Error::InvalidEvent(_) => "invalid_event",
            Error::UnknownMod(_) => "unknown_mod",
            Error::ModLoadFailed(_) => "mod_load_failed",
            Error::StorageUnavailable(_) | Error::Io(_) => "storage_unavailable",
            Error::Timeout(_) => "timeout",
            Error::Forbidden(_) => "forbidden",
            _ => "internal",
        }
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::AuthenticationRequired(_)
                | Error::AuthenticationFailed(_)
                | Error::DuplicateAgent(_)
                | Error::UnknownAgent(_)
                | Error::InvalidEvent(_)
                | Error::UnknownMod(_)
                | Error::Forbidden(_)
        )
    }

    /// Process exit code for the binary: 1 configuration, 2 port in use,
    /// 3 storage, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Io(e) if e.kind() == std::io::ErrorKind::AddrInUse => 2,
            Error::Transport(msg) if msg.contains("address in use") => 2,
            Error::StorageUnavailable(_) => 3,
            _ => 1,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(
            Error::AuthenticationFailed("bad secret".into()).code(),
            "authentication_failed"
        );
        assert_eq!(Error::StorageUnavailable("disk".into()).code(), "storage_unavailable");
        assert_eq!(Error::Internal("oops".into()).code(), "internal");
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Forbidden("announcement".into()).is_client_error());
        assert!(!Error::StorageUnavailable("disk".into()).is_client_error());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Config("bad yaml".into()).exit_code(), 1);
        assert_eq!(Error::StorageUnavailable("disk".into()).exit_code(), 3);
        let port = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        assert_eq!(Error::Io(port).exit_code(), 2);
    }
}
