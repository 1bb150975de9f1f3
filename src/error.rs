//! Error types for the pubstream client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the pubstream client
///
/// Every variant maps to a stable wire code via [`Error::code`]. Variants
/// carry owned strings rather than source errors so a single failure can
/// settle a connection gate and be returned to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The handshake request could not be transported
    #[error("handshake request failed: {0}")]
    RequestFailed(String),

    /// The handshake endpoint returned a non-2xx status with no error body
    #[error("server returned HTTP {0}")]
    HttpStatus(u16),

    /// The server returned a structured error response
    #[error("{code}: {msg}")]
    Api { code: String, msg: String },

    /// The socket did not finish opening within the connect timeout
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// Socket-level failure (open, send, or protocol error)
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// No acknowledgement arrived within the ack timeout
    #[error("acknowledgement timed out")]
    AckTimeout,

    /// A send was attempted while no connection is live
    #[error("not connected")]
    NoConnection,

    /// A subscription was attempted before any connect() call
    #[error("no connection gate, call connect() first")]
    NoGate,

    /// Envelope could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Failure with no more specific classification
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// The stable wire code for this error
    pub fn code(&self) -> String {
        match self {
            Error::RequestFailed(_) => "request_failed".to_string(),
            Error::HttpStatus(status) => format!("http_error_{status}"),
            Error::Api { code, .. } => code.clone(),
            Error::ConnectTimeout => "connect_timeout".to_string(),
            Error::WebSocket(_) => "websocket_error".to_string(),
            Error::AckTimeout => "timeout".to_string(),
            Error::NoConnection => "no_connection".to_string(),
            Error::NoGate => "no_gate".to_string(),
            Error::Codec(_) => "websocket_error".to_string(),
            Error::Unknown => "unknown_error".to_string(),
        }
    }

    /// Whether this is the forbidden handshake condition that permanently
    /// disables reconnection
    pub fn is_forbidden(&self) -> bool {
        match self {
            Error::HttpStatus(status) => *status == 403,
            Error::Api { code, .. } => code == "http_error_403",
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
