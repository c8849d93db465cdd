//! Error types
//!
//! Protocol failures are local to one connection: the dispatcher logs and
//! drops them. Nothing here is ever written back over the wire.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure (bind, accept, socket configuration)
    Io(io::Error),
    /// Malformed or unparseable wire message
    Protocol(ProtocolError),
    /// Client runtime misuse or transport failure
    Client(ClientError),
    /// WebSocket transport failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
}

/// Reasons an inbound frame is rejected
#[derive(Debug)]
pub enum ProtocolError {
    /// Frame is not valid JSON or has the wrong shape
    InvalidJson(serde_json::Error),
    /// `type` field absent
    MissingType,
    /// `type` field names no known message kind
    UnknownType(String),
    /// `key` absent on a message kind that requires one
    MissingKey(&'static str),
    /// `key` present but has no segments
    EmptyKey(&'static str),
}

/// Client runtime errors
#[derive(Debug)]
pub enum ClientError {
    /// A binding was requested for a key with no segments
    EmptyKey,
    /// The operation needs an open socket
    NotConnected,
    /// The runtime's connection task has shut down
    Closed,
    /// The configured URL could not be used
    InvalidUrl(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Client(e) => write!(f, "Client error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidJson(e) => write!(f, "invalid message: {}", e),
            ProtocolError::MissingType => write!(f, "message has no type"),
            ProtocolError::UnknownType(t) => write!(f, "unknown message type: {}", t),
            ProtocolError::MissingKey(kind) => write!(f, "{} message requires a key", kind),
            ProtocolError::EmptyKey(kind) => write!(f, "{} message has an empty key", kind),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::EmptyKey => write!(f, "keys must have at least one segment"),
            ClientError::NotConnected => write!(f, "not connected to server"),
            ClientError::Closed => write!(f, "client runtime is closed"),
            ClientError::InvalidUrl(url) => write!(f, "invalid server URL: {}", url),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Client(e) => Some(e),
            Error::WebSocket(e) => Some(e),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::InvalidJson(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        Error::Client(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::InvalidJson(e)
    }
}
