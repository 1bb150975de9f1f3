//! Realtime publish/subscribe stream client
//!
//! An HTTP handshake yields a streaming endpoint, a persistent WebSocket is
//! held open against it, and topic subscriptions are multiplexed over the
//! single socket with request/acknowledgement correlation. The connection
//! survives failures through backoff-based reconnection:
//! - Handshake endpoint discovery with optional authorization
//! - Exponential backoff with jitter, and a forbidden kill switch
//! - Exactly one live socket; superseded sockets cannot corrupt state
//! - Subscription requests deferred until the connection is ready

pub mod config;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod stream;

pub use config::{Authorization, Config};
pub use envelope::{Envelope, EnvelopeInfo, EnvelopeKind};
pub use error::{Error, Result};
pub use handshake::{Handshake, HttpHandshake};
pub use stream::{Status, StreamClient};
