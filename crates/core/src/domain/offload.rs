//! A2DP hardware offload state machine
//!
//! Tracks whether A2DP playback goes through the software mixer or the
//! offload DSP and drives the handoff between the two paths. Transitions
//! are serialized by a transition lock that ranks above the state lock.
//! `current` and `previous` only ever change together in
//! [`OffloadFlags::commit`].

use crate::domain::bluetooth::BluetoothActivationAdapter;
use crate::domain::config::ModuleClass;
use crate::domain::context::{PolicyContext, PolicyState};
use crate::domain::device::{DeviceDescriptor, DeviceRole, DeviceType};
use crate::domain::ports::HardwarePortManager;
use crate::domain::stream::StreamRoutingInfo;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OffloadState {
    #[default]
    NoA2dpDevice,
    A2dpNotOffload,
    A2dpOffload,
}

/// Current and previous offload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffloadFlags {
    pub current: OffloadState,
    pub previous: OffloadState,
}

impl OffloadFlags {
    pub fn commit(&mut self, next: OffloadState) {
        self.previous = self.current;
        self.current = next;
    }
}

/// Running session as reported to the offload negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffloadSession {
    pub session_id: u32,
    pub spatialization_enabled: bool,
}

impl From<&StreamRoutingInfo> for OffloadSession {
    fn from(stream: &StreamRoutingInfo) -> Self {
        Self {
            session_id: stream.session_id,
            spatialization_enabled: stream.spatialization_enabled,
        }
    }
}

/// Result of one offload evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadOutcome {
    /// Requested state equals the current one; nothing was called
    Unchanged,
    Transitioned(OffloadState),
    /// Offload was left; the active output must be fetched again
    RefetchRequired,
    /// A2DP offload requested without an active A2DP output
    Refused,
    /// An adapter call failed; the previous state is kept
    Failed,
}

pub struct OffloadStateMachine {
    context: Arc<PolicyContext>,
    bluetooth: BluetoothActivationAdapter,
    ports: Arc<dyn HardwarePortManager>,
    transition: Mutex<()>,
}

impl OffloadStateMachine {
    pub fn new(
        context: Arc<PolicyContext>,
        bluetooth: BluetoothActivationAdapter,
        ports: Arc<dyn HardwarePortManager>,
    ) -> Self {
        Self {
            context,
            bluetooth,
            ports,
            transition: Mutex::new(()),
        }
    }

    /// Re-negotiate offload after the set of running sessions changed
    pub fn on_active_sessions_changed(&self, sessions: &[OffloadSession]) -> OffloadOutcome {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let output = self.context.active_output();
        let requested = if output.device_type == DeviceType::BluetoothA2dp {
            match self.bluetooth.request_offload_session(sessions) {
                Ok(state) => state,
                Err(_) => return OffloadOutcome::Failed,
            }
        } else {
            OffloadState::NoA2dpDevice
        };

        self.transition_locked(requested, sessions)
    }

    /// Leave A2DP: drain offload playback, then commit the new active output
    /// together with `NoA2dpDevice` in one state critical section.
    pub fn switch_away_from_a2dp<F>(&self, sessions: &[OffloadSession], commit: F)
    where
        F: FnOnce(&mut PolicyState),
    {
        let _transition = self.transition.lock().unwrap_or_else(PoisonError::into_inner);

        if self.context.offload_state() == OffloadState::A2dpOffload {
            let ids = session_ids(sessions);
            if let Err(e) = self.bluetooth.offload_stop_playing(&ids) {
                warn!(error = %e, "Draining offload failed, switching anyway");
            }
            if let Some(port) = self.a2dp_port() {
                if let Err(e) = self.ports.suspend_port(&port, false) {
                    warn!(port = %port, error = %e, "Failed to resume A2DP sink");
                }
            }
        }

        self.context.with_state(|state| {
            commit(state);
            if state.active.output.device_type != DeviceType::BluetoothA2dp
                && state.offload.current != OffloadState::NoA2dpDevice
            {
                state.offload.commit(OffloadState::NoA2dpDevice);
            }
        });
        info!("Switched active output away from A2DP");
    }

    fn transition_locked(&self, requested: OffloadState, sessions: &[OffloadSession]) -> OffloadOutcome {
        let (current, output) = self
            .context
            .with_state(|s| (s.offload.current, s.active.output.clone()));

        if requested == current {
            debug!(state = ?current, "Offload state unchanged");
            return OffloadOutcome::Unchanged;
        }

        if requested == OffloadState::A2dpOffload && output.device_type != DeviceType::BluetoothA2dp {
            warn!(output = %output, "Refusing A2DP offload without an active A2DP output");
            return OffloadOutcome::Refused;
        }

        info!(from = ?current, to = ?requested, "Offload transition");
        match (current, requested) {
            (_, OffloadState::A2dpOffload) => self.enter_offload(sessions, &output),
            (OffloadState::A2dpOffload, next) => self.leave_offload(sessions, next),
            (_, next) => {
                self.context.with_state(|s| s.offload.commit(next));
                OffloadOutcome::Transitioned(next)
            }
        }
    }

    fn enter_offload(&self, sessions: &[OffloadSession], output: &DeviceDescriptor) -> OffloadOutcome {
        let Some(port) = self.a2dp_port() else {
            error!("No A2DP sink configured, cannot enter offload");
            return OffloadOutcome::Failed;
        };
        let ids = session_ids(sessions);

        for id in &ids {
            if let Err(e) = self.ports.reset_offload_mode(*id) {
                error!(session_id = id, error = %e, "Failed to reset offload mode");
                return OffloadOutcome::Failed;
            }
        }

        // The software sink must be quiet before the DSP starts rendering
        if let Err(e) = self.ports.suspend_port(&port, true) {
            error!(port = %port, error = %e, "Failed to suspend A2DP sink");
            return OffloadOutcome::Failed;
        }

        let started = self
            .ports
            .push_offload_codec(&output.capability)
            .map_err(|e| error!(error = %e, "Failed to push offload codec"))
            .and_then(|_| {
                self.bluetooth
                    .offload_start_playing(&ids)
                    .map_err(|_| ())
            });

        if started.is_err() {
            if let Err(e) = self.ports.suspend_port(&port, false) {
                warn!(port = %port, error = %e, "Failed to roll back A2DP sink suspend");
            }
            return OffloadOutcome::Failed;
        }

        let committed = self.context.with_state(|s| {
            if s.active.output.device_type == DeviceType::BluetoothA2dp {
                s.offload.commit(OffloadState::A2dpOffload);
                true
            } else {
                false
            }
        });

        if !committed {
            warn!("Active output left A2DP during offload entry, rolling back");
            if let Err(e) = self.bluetooth.offload_stop_playing(&ids) {
                warn!(error = %e, "Offload stop during rollback failed");
            }
            if let Err(e) = self.ports.suspend_port(&port, false) {
                warn!(port = %port, error = %e, "Failed to roll back A2DP sink suspend");
            }
            return OffloadOutcome::Refused;
        }

        info!(sessions = ids.len(), "A2DP offload engaged");
        OffloadOutcome::Transitioned(OffloadState::A2dpOffload)
    }

    fn leave_offload(&self, sessions: &[OffloadSession], next: OffloadState) -> OffloadOutcome {
        let ids = session_ids(sessions);

        if self.bluetooth.offload_stop_playing(&ids).is_err() {
            return OffloadOutcome::Failed;
        }

        if let Some(port) = self.a2dp_port() {
            if let Err(e) = self.ports.suspend_port(&port, false) {
                warn!(port = %port, error = %e, "Failed to resume A2DP sink");
            }
        }

        self.context.with_state(|s| s.offload.commit(next));
        info!(state = ?next, "A2DP offload released");
        OffloadOutcome::RefetchRequired
    }

    fn a2dp_port(&self) -> Option<String> {
        let config = self.context.config();
        let name = config
            .modules_of(ModuleClass::A2dp)
            .find(|m| m.role == DeviceRole::Output)
            .map(|m| m.name.clone());
        name
    }
}

fn session_ids(sessions: &[OffloadSession]) -> Vec<u32> {
    sessions.iter().map(|s| s.session_id).collect()
}
