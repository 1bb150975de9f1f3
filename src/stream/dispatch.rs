//! Notification routing to registered handlers

use std::sync::Mutex;

use serde_json::Value;

/// Snapshot of the connection flags at the time of a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    /// A connection attempt is in flight
    pub connecting: bool,
    /// A socket is open and usable
    pub connected: bool,
    /// The client will retry on failure
    pub reconnecting: bool,
}

/// Data pushed by the server on a subscribed topic
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Message payload
    pub data: Option<Value>,
    /// Opaque server reference
    pub reference: Option<String>,
    /// Topics the payload belongs to
    pub topics: Option<Vec<String>>,
}

/// An error surfaced out-of-band rather than to a specific caller
#[derive(Debug, Clone)]
pub struct ErrorNotice {
    /// Stable wire code
    pub code: String,
    /// Human-readable description
    pub msg: String,
}

/// The closed set of notification kinds
#[derive(Debug, Clone)]
pub enum Notification {
    /// Connection flags changed
    StateChanged(StateSnapshot),
    /// Pushed stream data arrived
    Stream(StreamEvent),
    /// An out-of-band error occurred
    Error(ErrorNotice),
}

type Slot<T> = Mutex<Option<Box<dyn Fn(T) + Send + Sync>>>;

/// Routes notifications to at most one registered handler per kind
///
/// Dispatching a kind with no registered handler is a silent no-op.
#[derive(Default)]
pub(crate) struct EventDispatcher {
    state_changed: Slot<StateSnapshot>,
    stream: Slot<StreamEvent>,
    error: Slot<ErrorNotice>,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_state_changed_handler<F>(&self, handler: F)
    where
        F: Fn(StateSnapshot) + Send + Sync + 'static,
    {
        *self.state_changed.lock().expect("handler lock poisoned") = Some(Box::new(handler));
    }

    pub(crate) fn set_stream_handler<F>(&self, handler: F)
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        *self.stream.lock().expect("handler lock poisoned") = Some(Box::new(handler));
    }

    pub(crate) fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ErrorNotice) + Send + Sync + 'static,
    {
        *self.error.lock().expect("handler lock poisoned") = Some(Box::new(handler));
    }

    pub(crate) fn dispatch(&self, notification: Notification) {
        match notification {
            Notification::StateChanged(snapshot) => {
                if let Some(handler) = &*self.state_changed.lock().expect("handler lock poisoned")
                {
                    handler(snapshot);
                }
            }
            Notification::Stream(event) => {
                if let Some(handler) = &*self.stream.lock().expect("handler lock poisoned") {
                    handler(event);
                }
            }
            Notification::Error(notice) => {
                if let Some(handler) = &*self.error.lock().expect("handler lock poisoned") {
                    handler(notice);
                }
            }
        }
    }
}
