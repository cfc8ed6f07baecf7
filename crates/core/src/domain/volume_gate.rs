//! Safe-volume confirmation gate
//!
//! The volume path blocks here while an external dialog asks the user to
//! confirm a loud volume on a headset. Never used from the fetch path.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accepted,
    Rejected,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct SafeVolumeGate {
    decision: Mutex<Option<bool>>,
    cond: Condvar,
}

impl SafeVolumeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until [`resolve`](Self::resolve) is called or `timeout` elapses.
    /// A decision is consumed by the waiter that observes it.
    pub fn wait_for_decision(&self, timeout: Duration) -> GateDecision {
        let guard = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, result) = self
            .cond
            .wait_timeout_while(guard, timeout, |decision| decision.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        if result.timed_out() {
            warn!(timeout_ms = timeout.as_millis() as u64, "Safe volume dialog timed out");
            return GateDecision::TimedOut;
        }

        match guard.take() {
            Some(true) => GateDecision::Accepted,
            Some(false) => GateDecision::Rejected,
            None => GateDecision::TimedOut,
        }
    }

    pub fn resolve(&self, accepted: bool) {
        let mut guard = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(accepted);
        debug!(accepted, "Safe volume dialog resolved");
        self.cond.notify_all();
    }
}
