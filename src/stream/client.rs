//! Stream client: connection lifecycle and request orchestration
//!
//! `StreamClient` performs the HTTP handshake, owns the single live socket,
//! drives the connect/reconnect/teardown state machine, and composes the
//! reconnect scheduler, message correlator, subscription gate, and event
//! dispatcher.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use url::Url;

use crate::config::Config;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::{Error, Result};
use crate::handshake::{Handshake, HttpHandshake};
use crate::stream::correlate::MessageCorrelator;
use crate::stream::dispatch::{
    ErrorNotice, EventDispatcher, Notification, StateSnapshot, StreamEvent,
};
use crate::stream::gate::ConnectionGate;
use crate::stream::reconnect::ReconnectScheduler;
use crate::stream::transport::{
    resolve_stream_url, SharedSink, SocketConn, SocketEvent, Transport, WsTransport,
};

/// Collapsed view of the connection flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No connection and no attempt in flight
    Idle,
    /// A connection attempt is in flight
    Connecting,
    /// A socket is open and usable
    Connected,
    /// Waiting to retry after a failure
    Reconnecting,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Idle => write!(f, "Idle"),
            Status::Connecting => write!(f, "Connecting"),
            Status::Connected => write!(f, "Connected"),
            Status::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

#[derive(Clone)]
struct ActiveSocket {
    id: u64,
    sink: SharedSink,
}

#[derive(Default)]
struct ConnState {
    connecting: bool,
    connected: bool,
    reconnecting: bool,
    /// Latched by a forbidden handshake; never cleared for this instance
    reconnect_blocked: bool,
    closing: bool,
    socket_seq: u64,
    socket: Option<ActiveSocket>,
    gate: Option<ConnectionGate>,
}

struct Inner {
    config: Config,
    handshake: Arc<dyn Handshake>,
    transport: Arc<dyn Transport>,
    scheduler: ReconnectScheduler,
    correlator: MessageCorrelator,
    dispatcher: EventDispatcher,
    state: Mutex<ConnState>,
    status_tx: watch::Sender<Status>,
}

/// Realtime publish/subscribe stream client
///
/// Cheaply cloneable; all clones share the same connection and state.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client using the reqwest handshake and tungstenite transport
    pub fn new(config: Config) -> Result<Self> {
        let handshake = Arc::new(HttpHandshake::new(&config.base_url)?);
        let transport = Arc::new(WsTransport::new(config.heartbeat_interval));
        Ok(Self::with_collaborators(config, handshake, transport))
    }

    /// Create a client with substituted handshake/transport capabilities
    pub fn with_collaborators(
        config: Config,
        handshake: Arc<dyn Handshake>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let scheduler = ReconnectScheduler::new(
            config.reconnect_interval,
            config.max_reconnect_interval,
            config.reconnect_factor,
            config.reconnect_spreader,
        );
        let correlator = MessageCorrelator::new(config.stream_ack_timeout);
        let (status_tx, _) = watch::channel(Status::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                handshake,
                transport,
                scheduler,
                correlator,
                dispatcher: EventDispatcher::new(),
                state: Mutex::new(ConnState::default()),
                status_tx,
            }),
        }
    }

    /// Current collapsed connection status
    pub fn status(&self) -> Status {
        *self.inner.status_tx.borrow()
    }

    /// Whether a socket is open and usable
    pub fn is_connected(&self) -> bool {
        self.status() == Status::Connected
    }

    /// Subscribe to status changes
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.inner.status_tx.subscribe()
    }

    /// Register the handler for state-change notifications
    pub fn on_state_changed<F>(&self, handler: F)
    where
        F: Fn(StateSnapshot) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_state_changed_handler(handler);
    }

    /// Register the handler for pushed stream data
    pub fn on_stream<F>(&self, handler: F)
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_stream_handler(handler);
    }

    /// Register the handler for out-of-band errors
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(ErrorNotice) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_error_handler(handler);
    }

    /// Establish the connection
    ///
    /// Cancels any pending reconnect timer, creates a fresh readiness gate,
    /// and settles when this call's attempt either produces a live socket
    /// or is abandoned. While reconnection is enabled, intermediate
    /// failures retry with backoff instead of settling the gate. Calling
    /// this while connected replaces the socket.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.scheduler.cancel();

        let gate = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.closing = false;
            s.connecting = true;
            s.reconnecting = inner.config.reconnect_enabled && !s.reconnect_blocked;
            if let Some(old) = s.gate.take() {
                old.abort(Error::WebSocket("superseded by a newer connect call".into()));
            }
            let gate = ConnectionGate::new();
            s.gate = Some(gate.clone());
            gate
        };
        inner.notify_state();

        Inner::run_attempt(inner.clone()).await;
        gate.wait().await
    }

    /// Subscribe to the given topics, waiting for the server acknowledgement
    pub async fn sub(&self, topics: Vec<String>) -> Result<Envelope> {
        self.subscription_request(Envelope::sub(topics)).await
    }

    /// Unsubscribe from the given topics, waiting for the server
    /// acknowledgement
    pub async fn unsub(&self, topics: Vec<String>) -> Result<Envelope> {
        self.subscription_request(Envelope::unsub(topics)).await
    }

    async fn subscription_request(&self, envelope: Envelope) -> Result<Envelope> {
        let gate = {
            let s = self.inner.state.lock().expect("state lock poisoned");
            s.gate.clone().ok_or(Error::NoGate)?
        };
        gate.wait().await?;
        let reply = self
            .inner
            .dispatch_send(envelope, Duration::ZERO, true)
            .await?;
        reply.ok_or(Error::Unknown)
    }

    /// Transmit an envelope on the live socket
    ///
    /// A zero timeout settles as soon as transmission succeeds; a positive
    /// timeout waits for the matching acknowledgement and returns it.
    pub async fn send(&self, envelope: Envelope, timeout: Duration) -> Result<Option<Envelope>> {
        let wait_for_reply = !timeout.is_zero();
        self.inner
            .dispatch_send(envelope, timeout, wait_for_reply)
            .await
    }

    /// Tear the client down: stop retrying, close the socket, abort a
    /// still-pending gate
    ///
    /// A closed client can be brought back with a fresh `connect()` call.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.scheduler.cancel();
        let (old, gate) = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.closing = true;
            s.reconnecting = false;
            s.connecting = false;
            s.connected = false;
            (s.socket.take(), s.gate.take())
        };
        if let Some(gate) = gate {
            gate.abort(Error::WebSocket("client closed".into()));
        }
        if let Some(old) = old {
            old.sink.lock().await.close().await;
        }
        inner.notify_state();
    }
}

impl Inner {
    fn snapshot(s: &ConnState) -> StateSnapshot {
        StateSnapshot {
            connecting: s.connecting,
            connected: s.connected,
            reconnecting: s.reconnecting,
        }
    }

    fn status_of(s: &ConnState) -> Status {
        if s.connected {
            Status::Connected
        } else if s.connecting {
            Status::Connecting
        } else if s.reconnecting {
            Status::Reconnecting
        } else {
            Status::Idle
        }
    }

    fn notify_state(&self) {
        let (snapshot, status) = {
            let s = self.state.lock().expect("state lock poisoned");
            (Self::snapshot(&s), Self::status_of(&s))
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
        self.dispatcher
            .dispatch(Notification::StateChanged(snapshot));
    }

    /// One full connect sequence: handshake, endpoint resolution, socket
    /// open. Never settles the gate while a retry is still coming.
    async fn run_attempt(inner: Arc<Inner>) {
        let auth = inner.config.authorization.clone();
        match inner.handshake.stream_endpoint(auth.as_ref()).await {
            Err(err) => Inner::handle_handshake_failure(&inner, err),
            Ok(stream_url) => match resolve_stream_url(&inner.config.base_url, &stream_url) {
                Err(err) => Inner::handle_attempt_failure(&inner, err),
                Ok(endpoint) => Inner::open_socket(&inner, endpoint).await,
            },
        }
    }

    fn handle_handshake_failure(inner: &Arc<Inner>, err: Error) {
        if err.is_forbidden() {
            tracing::warn!(code = %err.code(), "handshake forbidden, disabling reconnection");
            inner.dispatcher.dispatch(Notification::Error(ErrorNotice {
                code: err.code(),
                msg: err.to_string(),
            }));
            let gate = {
                let mut s = inner.state.lock().expect("state lock poisoned");
                s.reconnecting = false;
                s.reconnect_blocked = true;
                s.connecting = false;
                s.gate.clone()
            };
            inner.notify_state();
            if let Some(gate) = gate {
                gate.abort(err);
            }
            return;
        }

        let (reconnecting, gate) = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.connecting = false;
            (s.reconnecting, s.gate.clone())
        };
        inner.notify_state();
        if reconnecting {
            tracing::debug!(error = %err, "handshake failed, will retry");
            Inner::schedule_retry(inner, false);
        } else if let Some(gate) = gate {
            gate.abort(err);
        }
    }

    /// Socket-level attempt failure: open error, resolution error, or
    /// connect timeout
    fn handle_attempt_failure(inner: &Arc<Inner>, err: Error) {
        let (reconnecting, gate) = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.connecting = false;
            s.connected = false;
            (s.reconnecting, s.gate.clone())
        };
        inner.notify_state();
        if reconnecting {
            tracing::debug!(error = %err, "socket attempt failed, will retry");
            Inner::schedule_retry(inner, false);
        } else if let Some(gate) = gate {
            gate.abort(err);
        }
    }

    async fn open_socket(inner: &Arc<Inner>, endpoint: Url) {
        // Detach any attached socket before the open starts; its remaining
        // events are stale from this point on.
        let old = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.socket.take()
        };
        if let Some(old) = old {
            tokio::spawn(async move {
                old.sink.lock().await.close().await;
            });
        }

        match tokio::time::timeout(
            inner.config.connect_timeout,
            inner.transport.open(&endpoint),
        )
        .await
        {
            Err(_) => {
                tracing::warn!("socket open timed out");
                Inner::handle_attempt_failure(inner, Error::ConnectTimeout);
            }
            Ok(Err(err)) => Inner::handle_attempt_failure(inner, err),
            Ok(Ok(conn)) => Inner::attach(inner, conn),
        }
    }

    fn attach(inner: &Arc<Inner>, conn: SocketConn) {
        let SocketConn { sink, events } = conn;
        let (id, gate) = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.socket_seq += 1;
            let id = s.socket_seq;
            s.socket = Some(ActiveSocket {
                id,
                sink: Arc::new(tokio::sync::Mutex::new(sink)),
            });
            s.connected = true;
            s.connecting = false;
            (id, s.gate.clone())
        };
        inner.scheduler.reset_attempts();
        tracing::info!(socket_id = id, "stream connected");
        inner.notify_state();
        if let Some(gate) = gate {
            gate.open();
        }
        tokio::spawn(Inner::read_loop(inner.clone(), id, events));
    }

    async fn read_loop(
        inner: Arc<Inner>,
        socket_id: u64,
        mut events: mpsc::Receiver<SocketEvent>,
    ) {
        while let Some(event) = events.recv().await {
            Inner::on_socket_event(&inner, socket_id, event);
        }
    }

    fn on_socket_event(inner: &Arc<Inner>, socket_id: u64, event: SocketEvent) {
        let is_current = {
            let s = inner.state.lock().expect("state lock poisoned");
            s.socket.as_ref().map(|active| active.id) == Some(socket_id)
        };
        if !is_current {
            Inner::on_stale_event(inner, socket_id, event);
            return;
        }
        match event {
            SocketEvent::Message(text) => Inner::handle_message(inner, text),
            SocketEvent::Closed => Inner::handle_connection_loss(inner, None),
            SocketEvent::Error(reason) => Inner::handle_connection_loss(inner, Some(reason)),
        }
    }

    /// Events from a superseded socket never mutate instance state. The one
    /// exception: its close, observed while nothing else is driving
    /// progress, is the signal that the network recovered, so retry without
    /// backoff.
    fn on_stale_event(inner: &Arc<Inner>, socket_id: u64, event: SocketEvent) {
        if !matches!(event, SocketEvent::Closed) {
            tracing::debug!(socket_id, "ignoring event from superseded socket");
            return;
        }
        let eligible = {
            let s = inner.state.lock().expect("state lock poisoned");
            s.socket.is_none() && !s.connecting && s.reconnecting && !s.closing
        };
        if eligible && !inner.scheduler.has_pending_timer() {
            tracing::debug!(socket_id, "stale socket closed while idle, reconnecting now");
            Inner::schedule_retry(inner, true);
        }
    }

    fn handle_connection_loss(inner: &Arc<Inner>, reason: Option<String>) {
        match &reason {
            Some(reason) => tracing::warn!(%reason, "socket failed"),
            None => tracing::info!("socket closed"),
        }
        let (reconnecting, closing) = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            s.socket = None;
            s.connected = false;
            (s.reconnecting, s.closing)
        };
        inner.notify_state();
        if reconnecting && !closing {
            Inner::schedule_retry(inner, false);
        }
    }

    fn handle_message(inner: &Arc<Inner>, text: String) {
        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "discarding undecodable message");
                return;
            }
        };
        match envelope.kind {
            EnvelopeKind::Hello => {
                tracing::debug!("server hello");
            }
            EnvelopeKind::Goodbye => Inner::handle_goodbye(inner),
            EnvelopeKind::Ack => {
                inner.correlator.on_ack(envelope);
            }
            EnvelopeKind::Event => {
                let info = envelope.info.unwrap_or_default();
                inner.dispatcher.dispatch(Notification::Stream(StreamEvent {
                    data: envelope.data,
                    reference: info.reference,
                    topics: info.topics,
                }));
            }
            EnvelopeKind::Sub | EnvelopeKind::Unsub | EnvelopeKind::Unknown => {
                tracing::warn!(kind = ?envelope.kind, "discarding unexpected message type");
            }
        }
    }

    /// Server-initiated graceful close. The attempt count is forced to at
    /// least one first, so the follow-up reconnect always backs off instead
    /// of hammering a server that just said goodbye.
    fn handle_goodbye(inner: &Arc<Inner>) {
        tracing::info!("server goodbye, closing socket");
        inner.scheduler.ensure_min_attempt();
        let (old, reconnecting, closing) = {
            let mut s = inner.state.lock().expect("state lock poisoned");
            let old = s.socket.take();
            s.connected = false;
            (old, s.reconnecting, s.closing)
        };
        if let Some(old) = old {
            tokio::spawn(async move {
                old.sink.lock().await.close().await;
            });
        }
        inner.notify_state();
        if reconnecting && !closing {
            Inner::schedule_retry(inner, false);
        }
    }

    fn schedule_retry(inner: &Arc<Inner>, fast: bool) {
        let retry_inner = inner.clone();
        inner.scheduler.schedule(fast, async move {
            // the reconnecting flag may have been cleared since scheduling
            let still_reconnecting = {
                let s = retry_inner.state.lock().expect("state lock poisoned");
                s.reconnecting && !s.closing
            };
            if !still_reconnecting {
                tracing::debug!("reconnect timer fired after reconnection was disabled");
                return;
            }
            Inner::run_attempt(retry_inner).await;
        });
    }

    async fn dispatch_send(
        &self,
        envelope: Envelope,
        timeout: Duration,
        wait_for_reply: bool,
    ) -> Result<Option<Envelope>> {
        let sink = {
            let s = self.state.lock().expect("state lock poisoned");
            if s.closing || !s.connected {
                return Err(Error::NoConnection);
            }
            match &s.socket {
                Some(active) => active.sink.clone(),
                None => return Err(Error::NoConnection),
            }
        };
        self.correlator
            .send(&sink, envelope, timeout, wait_for_reply)
            .await
    }
}
