//! Client configuration

use std::time::Duration;

use url::Url;

/// Authorization credentials attached to the handshake request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Authorization type, e.g. `Bearer`
    pub scheme: String,
    /// Credential value
    pub token: String,
}

impl Authorization {
    /// Create bearer-style credentials
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: "Bearer".to_string(),
            token: token.into(),
        }
    }

    /// The value for the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

/// Configuration for a [`StreamClient`](crate::StreamClient)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the handshake endpoint
    pub base_url: Url,
    /// Optional credentials for the handshake request
    pub authorization: Option<Authorization>,
    /// How long a socket open may take before the attempt fails
    pub connect_timeout: Duration,
    /// Interval between protocol-level pings on an open socket
    pub heartbeat_interval: Duration,
    /// Upper bound on the backoff delay between reconnect attempts
    pub max_reconnect_interval: Duration,
    /// Whether the client reconnects automatically on failure
    pub reconnect_enabled: bool,
    /// Multiplier for exponential backoff growth
    pub reconnect_factor: f64,
    /// Base delay before a reconnect attempt
    pub reconnect_interval: Duration,
    /// Width of the uniform random jitter added to backoff delays
    pub reconnect_spreader: Duration,
    /// Default wait for a server acknowledgement
    pub stream_ack_timeout: Duration,
}

impl Config {
    /// Create a configuration with the default knobs for the given endpoint
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            authorization: None,
            connect_timeout: Duration::from_millis(5000),
            heartbeat_interval: Duration::from_millis(5000),
            max_reconnect_interval: Duration::from_millis(30000),
            reconnect_enabled: true,
            reconnect_factor: 1.5,
            reconnect_interval: Duration::from_millis(1000),
            reconnect_spreader: Duration::from_millis(500),
            stream_ack_timeout: Duration::from_millis(20000),
        }
    }

    /// Attach credentials to the handshake request
    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = Some(authorization);
        self
    }

    /// Disable automatic reconnection
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_enabled = false;
        self
    }
}
