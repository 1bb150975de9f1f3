//! One-shot readiness barrier for a connection attempt

use tokio::sync::watch;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum GateState {
    Pending,
    Ready,
    Aborted(Error),
}

/// Defers subscription traffic until the connection attempt it belongs to
/// has a live socket
///
/// A gate settles at most once: `open` and `abort` are no-ops after the
/// first settlement. Any number of waiters may block on `wait`; late
/// waiters observe the settled outcome immediately.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionGate {
    tx: watch::Sender<GateState>,
}

impl ConnectionGate {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx }
    }

    /// Settle the gate successfully; returns false if already settled
    pub(crate) fn open(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, GateState::Pending) {
                *state = GateState::Ready;
                true
            } else {
                false
            }
        })
    }

    /// Settle the gate with an error; returns false if already settled
    pub(crate) fn abort(&self, err: Error) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, GateState::Pending) {
                *state = GateState::Aborted(err);
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.tx.borrow(), GateState::Pending)
    }

    /// Wait until the gate settles
    pub(crate) async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            match &*rx.borrow_and_update() {
                GateState::Pending => {}
                GateState::Ready => return Ok(()),
                GateState::Aborted(err) => return Err(err.clone()),
            }
            if rx.changed().await.is_err() {
                // sender dropped while pending: the attempt was abandoned
                return Err(Error::WebSocket("connection attempt dropped".into()));
            }
        }
    }
}
