//! Outbound request correlation and acknowledgement matching

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::stream::transport::SharedSink;

/// Assigns correlation ids to outbound requests and resolves waiting
/// callers when the matching acknowledgement arrives
///
/// The id counter is owned by the instance, so independent clients never
/// share correlation state. The caller is responsible for only handing in a
/// sink that belongs to the live connection.
pub(crate) struct MessageCorrelator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    default_ack_timeout: Duration,
}

impl MessageCorrelator {
    pub(crate) fn new(default_ack_timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            default_ack_timeout,
        }
    }

    fn next_correlation_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn register(&self, id: &str) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.insert(id.to_string(), tx);
        rx
    }

    fn remove(&self, id: &str) -> bool {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.remove(id).is_some()
    }

    /// Transmit an envelope, assigning it the next correlation id
    ///
    /// With `wait_for_reply` the call settles when the acknowledgement
    /// arrives or the ack timeout expires; otherwise it settles as soon as
    /// transmission succeeds. A zero timeout selects the default ack
    /// timeout.
    pub(crate) async fn send(
        &self,
        sink: &SharedSink,
        mut envelope: Envelope,
        timeout: Duration,
        wait_for_reply: bool,
    ) -> Result<Option<Envelope>> {
        let effective = if timeout.is_zero() {
            self.default_ack_timeout
        } else {
            timeout
        };

        let id = self.next_correlation_id();
        envelope.state = id.clone();
        let text = serde_json::to_string(&envelope)?;

        if !wait_for_reply {
            sink.lock().await.send(text).await?;
            return Ok(None);
        }

        let rx = self.register(&id);
        if let Err(err) = sink.lock().await.send(text).await {
            self.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(effective, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(Error::WebSocket("reply channel closed".into())),
            Err(_) => {
                self.remove(&id);
                tracing::debug!(correlation_id = %id, "acknowledgement wait timed out");
                Err(Error::AckTimeout)
            }
        }
    }

    /// Route an inbound acknowledgement to its waiting caller
    ///
    /// Unmatched acknowledgements are logged and discarded; they are
    /// expected when the local timeout already fired.
    pub(crate) fn on_ack(&self, envelope: Envelope) -> bool {
        let waiter = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.remove(&envelope.state)
        };
        match waiter {
            Some(tx) => tx.send(envelope).is_ok(),
            None => {
                tracing::debug!(correlation_id = %envelope.state, "unmatched acknowledgement discarded");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}
