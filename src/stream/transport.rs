//! Socket transport capability and its tokio-tungstenite implementation

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::error::{Error, Result};

/// Event produced by an open socket
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A text frame arrived
    Message(String),
    /// The socket closed, either gracefully or because the stream ended
    Closed,
    /// The socket failed with a protocol or IO error
    Error(String),
}

/// Write half of an open socket
#[async_trait]
pub trait MessageSink: Send {
    /// Transmit a text frame
    async fn send(&mut self, text: String) -> Result<()>;
    /// Close the socket
    async fn close(&mut self);
}

/// Write half of the current socket, shared between the client surface and
/// the correlation engine
pub(crate) type SharedSink = Arc<Mutex<Box<dyn MessageSink>>>;

/// An open socket: a write half plus the stream of events it produces
pub struct SocketConn {
    /// Write half
    pub sink: Box<dyn MessageSink>,
    /// Events read from the socket until it closes
    pub events: mpsc::Receiver<SocketEvent>,
}

/// Capability interface for opening sockets
///
/// `open` resolves once the socket is open; the caller applies its own
/// connect timeout around it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a socket to the given endpoint
    async fn open(&self, url: &Url) -> Result<SocketConn>;
}

/// Resolve the handshake's stream URL to an absolute socket endpoint
///
/// Joins relative URLs against the base, maps `http`/`https` to `ws`/`wss`,
/// and appends the fixed `v=1` query parameter.
pub fn resolve_stream_url(base: &Url, stream_url: &str) -> Result<Url> {
    let mut resolved = base
        .join(stream_url)
        .map_err(|e| Error::WebSocket(format!("invalid stream url: {e}")))?;

    let scheme = match resolved.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" => "ws",
        "wss" => "wss",
        other => {
            return Err(Error::WebSocket(format!(
                "unsupported stream scheme: {other}"
            )))
        }
    };
    if resolved.scheme() != scheme && resolved.set_scheme(scheme).is_err() {
        let rebuilt = format!(
            "{}{}",
            scheme,
            &resolved.as_str()[resolved.scheme().len()..]
        );
        resolved =
            Url::parse(&rebuilt).map_err(|e| Error::WebSocket(format!("invalid stream url: {e}")))?;
    }

    resolved.query_pairs_mut().append_pair("v", "1");
    Ok(resolved)
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// tokio-tungstenite transport with protocol-level heartbeat
#[derive(Debug, Clone)]
pub struct WsTransport {
    heartbeat_interval: std::time::Duration,
}

impl WsTransport {
    /// Create a transport that pings every `heartbeat_interval`
    pub fn new(heartbeat_interval: std::time::Duration) -> Self {
        Self { heartbeat_interval }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &Url) -> Result<SocketConn> {
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (sink, stream) = ws_stream.split();
        let sink = Arc::new(Mutex::new(sink));
        let (events_tx, events_rx) = mpsc::channel(64);

        tokio::spawn(pump(
            stream,
            sink.clone(),
            events_tx,
            self.heartbeat_interval,
        ));

        Ok(SocketConn {
            sink: Box::new(WsMessageSink { sink }),
            events: events_rx,
        })
    }
}

/// Read frames into socket events, answer pings, and send heartbeats
async fn pump(
    mut stream: WsStream,
    sink: Arc<Mutex<WsSink>>,
    events: mpsc::Sender<SocketEvent>,
    heartbeat_interval: std::time::Duration,
) {
    let mut heartbeat = interval(heartbeat_interval);
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Message(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.lock().await.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(SocketEvent::Closed).await;
                    break;
                }
                Some(Ok(_)) => {
                    tracing::debug!("ignoring non-text frame");
                }
                Some(Err(e)) => {
                    let _ = events.send(SocketEvent::Error(e.to_string())).await;
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if sink
                    .lock()
                    .await
                    .send(Message::Ping(Vec::new()))
                    .await
                    .is_err()
                {
                    // reader side will observe the failure and emit it
                    tracing::debug!("heartbeat ping failed");
                }
            }
        }
    }
}

struct WsMessageSink {
    sink: Arc<Mutex<WsSink>>,
}

#[async_trait]
impl MessageSink for WsMessageSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn close(&mut self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}
