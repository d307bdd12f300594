//! Readiness gate
//!
//! Flips once from pending to ready after the first successful discovery and
//! never reverts. Closing the gate releases pending waiters with a negative
//! answer; a gate that is already ready stays ready.

use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Ready,
    Closed,
}

/// Lets callers wait, bounded, until the transport has endpoints
pub struct ReadinessGate {
    state: watch::Sender<GateState>,
}

impl ReadinessGate {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self { state }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == GateState::Ready
    }

    /// Wait up to `timeout` for readiness; returns the ready state at wake time
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        match *rx.borrow_and_update() {
            GateState::Ready => return true,
            GateState::Closed => return false,
            GateState::Pending => {}
        }
        if timeout.is_zero() {
            return false;
        }

        let ready = match tokio::time::timeout(timeout, rx.wait_for(|s| *s != GateState::Pending)).await {
            Ok(Ok(state)) => *state == GateState::Ready,
            Ok(Err(_)) | Err(_) => self.is_ready(),
        };
        ready
    }

    /// Mark ready and wake every waiter. Idempotent.
    pub fn signal(&self) {
        let changed = self.state.send_if_modified(|s| {
            if *s == GateState::Pending {
                *s = GateState::Ready;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("Transport is ready");
        }
    }

    /// Release pending waiters with a negative answer
    pub fn close(&self) {
        self.state.send_if_modified(|s| {
            if *s == GateState::Pending {
                *s = GateState::Closed;
                true
            } else {
                false
            }
        });
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
