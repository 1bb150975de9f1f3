//! Realtime stream connection: lifecycle, correlation, and transport
//!
//! This module contains the connection engine: the [`StreamClient`]
//! orchestrator plus the reconnect scheduler, message correlator,
//! subscription gate, and event dispatcher it composes.
//!
//! # Example
//!
//! ```ignore
//! use pubstream::{Config, StreamClient};
//!
//! let config = Config::new("https://stream.example.com".parse()?);
//! let client = StreamClient::new(config)?;
//! client.connect().await?;
//!
//! // Subscribe to topics; resolves once the server acknowledges
//! client.sub(vec!["alerts".to_string()]).await?;
//! ```

mod client;
mod correlate;
mod dispatch;
mod gate;
mod reconnect;
mod transport;

pub use client::{Status, StreamClient};
pub use dispatch::{ErrorNotice, Notification, StateSnapshot, StreamEvent};
pub use transport::{
    resolve_stream_url, MessageSink, SocketConn, SocketEvent, Transport, WsTransport,
};
