// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum RegionServerError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("IO Error: {0}")]
    IoString(String),

    #[error("Region '{0}' is not served by this server")]
    NotServingRegion(String),

    #[error("Unknown scanner id {0}")]
    UnknownScanner(u64),

    #[error("Region server already running: log directory '{0}' exists")]
    RegionServerRunning(String),

    #[error("Dropped memtable snapshot, log replay required: {0}")]
    DroppedSnapshot(String),

    #[error("Master still holds a lease for this server identity")]
    LeaseStillHeld,

    #[error("Filesystem is unavailable")]
    FilesystemUnavailable,

    #[error("Server is not running")]
    ServerNotRunning,

    #[error("Remote error ({kind}): {message}")]
    Remote { kind: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl RegionServerError {
    /// A short stable tag for the error, used on the wire so clients can
    /// reconstruct typed errors without parsing messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RegionServerError::Io(_) | RegionServerError::IoString(_) => "Io",
            RegionServerError::NotServingRegion(_) => "NotServingRegion",
            RegionServerError::UnknownScanner(_) => "UnknownScanner",
            RegionServerError::RegionServerRunning(_) => "RegionServerRunning",
            RegionServerError::DroppedSnapshot(_) => "DroppedSnapshot",
            RegionServerError::LeaseStillHeld => "LeaseStillHeld",
            RegionServerError::FilesystemUnavailable => "FilesystemUnavailable",
            RegionServerError::ServerNotRunning => "ServerNotRunning",
            RegionServerError::Remote { .. } => "Remote",
            RegionServerError::InvalidRequest(_) => "InvalidRequest",
            RegionServerError::Protocol(_) => "Protocol",
            RegionServerError::Internal(_) => "Internal",
        }
    }

    /// Rebuilds a typed error from its wire representation.
    pub fn from_wire(kind: &str, message: String) -> Self {
        match kind {
            "Io" => RegionServerError::IoString(message),
            "NotServingRegion" => RegionServerError::NotServingRegion(message),
            "RegionServerRunning" => RegionServerError::RegionServerRunning(message),
            "DroppedSnapshot" => RegionServerError::DroppedSnapshot(message),
            "LeaseStillHeld" => RegionServerError::LeaseStillHeld,
            "FilesystemUnavailable" => RegionServerError::FilesystemUnavailable,
            "ServerNotRunning" => RegionServerError::ServerNotRunning,
            "InvalidRequest" => RegionServerError::InvalidRequest(message),
            "Protocol" => RegionServerError::Protocol(message),
            _ => RegionServerError::Remote {
                kind: kind.to_string(),
                message,
            },
        }
    }

    /// Whether this error is an IO-class failure that should trigger a
    /// filesystem probe and is eligible for worker-queue retry.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            RegionServerError::Io(_)
                | RegionServerError::IoString(_)
                | RegionServerError::Remote { .. }
        )
    }

    /// Unwraps a remote error to its underlying IO cause; other errors pass through.
    pub fn unwrap_remote(self) -> Self {
        match self {
            RegionServerError::Remote { message, .. } => RegionServerError::IoString(message),
            other => other,
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for RegionServerError {
    fn clone(&self) -> Self {
        match self {
            RegionServerError::Io(e) => RegionServerError::Io(Arc::clone(e)),
            RegionServerError::IoString(s) => RegionServerError::IoString(s.clone()),
            RegionServerError::NotServingRegion(s) => RegionServerError::NotServingRegion(s.clone()),
            RegionServerError::UnknownScanner(id) => RegionServerError::UnknownScanner(*id),
            RegionServerError::RegionServerRunning(s) => {
                RegionServerError::RegionServerRunning(s.clone())
            }
            RegionServerError::DroppedSnapshot(s) => RegionServerError::DroppedSnapshot(s.clone()),
            RegionServerError::LeaseStillHeld => RegionServerError::LeaseStillHeld,
            RegionServerError::FilesystemUnavailable => RegionServerError::FilesystemUnavailable,
            RegionServerError::ServerNotRunning => RegionServerError::ServerNotRunning,
            RegionServerError::Remote { kind, message } => RegionServerError::Remote {
                kind: kind.clone(),
                message: message.clone(),
            },
            RegionServerError::InvalidRequest(s) => RegionServerError::InvalidRequest(s.clone()),
            RegionServerError::Protocol(s) => RegionServerError::Protocol(s.clone()),
            RegionServerError::Internal(s) => RegionServerError::Internal(s.clone()),
        }
    }
}

impl PartialEq for RegionServerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RegionServerError::Io(e1), RegionServerError::Io(e2)) => {
                e1.to_string() == e2.to_string()
            }
            (RegionServerError::IoString(s1), RegionServerError::IoString(s2)) => s1 == s2,
            (RegionServerError::NotServingRegion(s1), RegionServerError::NotServingRegion(s2)) => {
                s1 == s2
            }
            (RegionServerError::UnknownScanner(a), RegionServerError::UnknownScanner(b)) => a == b,
            (
                RegionServerError::RegionServerRunning(s1),
                RegionServerError::RegionServerRunning(s2),
            ) => s1 == s2,
            (RegionServerError::DroppedSnapshot(s1), RegionServerError::DroppedSnapshot(s2)) => {
                s1 == s2
            }
            (
                RegionServerError::Remote {
                    kind: k1,
                    message: m1,
                },
                RegionServerError::Remote {
                    kind: k2,
                    message: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (RegionServerError::InvalidRequest(s1), RegionServerError::InvalidRequest(s2)) => {
                s1 == s2
            }
            (RegionServerError::Protocol(s1), RegionServerError::Protocol(s2)) => s1 == s2,
            (RegionServerError::Internal(s1), RegionServerError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for RegionServerError {
    fn from(e: std::io::Error) -> Self {
        RegionServerError::Io(Arc::new(e))
    }
}

impl From<String> for RegionServerError {
    fn from(s: String) -> Self {
        RegionServerError::IoString(s)
    }
}

impl From<serde_json::Error> for RegionServerError {
    fn from(e: serde_json::Error) -> Self {
        RegionServerError::Protocol(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<bincode::error::EncodeError> for RegionServerError {
    fn from(e: bincode::error::EncodeError) -> Self {
        RegionServerError::Internal(format!("encode error: {e}"))
    }
}

impl From<bincode::error::DecodeError> for RegionServerError {
    fn from(e: bincode::error::DecodeError) -> Self {
        RegionServerError::IoString(format!("corrupt record: {e}"))
    }
}
