//! Error handling for the weave node
//!
//! This module provides the error type shared by the peer transport,
//! the performance store and the local node actor.

use std::fmt;

/// Result type alias for weave node operations
pub type Result<T> = std::result::Result<T, WeaveError>;

/// Error types for peer transport and node operations
#[derive(Debug, Clone)]
pub enum WeaveError {
    /// Performance store / database errors
    Database(String),
    /// Connection-level failures talking to a peer
    Network(String),
    /// A peer did not answer within the request budget
    Timeout(String),
    /// Malformed or incomplete payloads
    Decode(String),
    /// Serialization errors on our own data
    Serialization(String),
    /// Block failed validation
    InvalidBlock(String),
    /// Transaction failed validation
    InvalidTransaction(String),
    /// Mining errors
    Mining(String),
    /// The node actor is gone or not bound
    NodeUnavailable(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
}

impl WeaveError {
    /// True for failures where no response was obtained from the peer.
    pub fn is_transport(&self) -> bool {
        matches!(self, WeaveError::Network(_) | WeaveError::Timeout(_))
    }
}

impl fmt::Display for WeaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeaveError::Database(msg) => write!(f, "Database error: {msg}"),
            WeaveError::Network(msg) => write!(f, "Network error: {msg}"),
            WeaveError::Timeout(msg) => write!(f, "Timeout: {msg}"),
            WeaveError::Decode(msg) => write!(f, "Decode error: {msg}"),
            WeaveError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            WeaveError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            WeaveError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            WeaveError::Mining(msg) => write!(f, "Mining error: {msg}"),
            WeaveError::NodeUnavailable(msg) => write!(f, "Node unavailable: {msg}"),
            WeaveError::Config(msg) => write!(f, "Configuration error: {msg}"),
            WeaveError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for WeaveError {}

impl From<std::io::Error> for WeaveError {
    fn from(err: std::io::Error) -> Self {
        WeaveError::Io(err.to_string())
    }
}

impl From<sled::Error> for WeaveError {
    fn from(err: sled::Error) -> Self {
        WeaveError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for WeaveError {
    fn from(err: bincode::error::EncodeError) -> Self {
        WeaveError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for WeaveError {
    fn from(err: bincode::error::DecodeError) -> Self {
        WeaveError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(err: serde_json::Error) -> Self {
        WeaveError::Decode(err.to_string())
    }
}

impl From<hyper::Error> for WeaveError {
    fn from(err: hyper::Error) -> Self {
        WeaveError::Network(err.to_string())
    }
}

impl From<hyper::http::Error> for WeaveError {
    fn from(err: hyper::http::Error) -> Self {
        WeaveError::Network(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for WeaveError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        WeaveError::Timeout(err.to_string())
    }
}
