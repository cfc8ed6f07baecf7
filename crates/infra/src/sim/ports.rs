//! Simulated audio HAL

use super::call_log::{CallLog, SimCall};
use conductor_core::domain::{
    DeviceCapability, DeviceDescriptor, HardwarePortManager, ModuleSpec, MoveTarget, PortError,
    PortHandle,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct PortState {
    next_handle: PortHandle,
    open: HashMap<PortHandle, String>,
    suspended: HashSet<String>,
    muted: HashSet<String>,
    fail_open: HashSet<String>,
    fail_moves: HashSet<u32>,
    moves: HashMap<u32, MoveTarget>,
}

/// Port manager that hands out sequential handles and records every call
pub struct SimulatedPortManager {
    log: CallLog,
    state: Mutex<PortState>,
}

impl SimulatedPortManager {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(PortState {
                next_handle: 1,
                ..PortState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name_of(&self, handle: PortHandle) -> Result<String, PortError> {
        self.state()
            .open
            .get(&handle)
            .cloned()
            .ok_or(PortError::UnknownHandle(handle))
    }

    pub fn fail_open(&self, port: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.fail_open.insert(port.to_string());
        } else {
            state.fail_open.remove(port);
        }
    }

    /// Make every move of `session_id` fail until cleared
    pub fn fail_moves_for(&self, session_id: u32, fail: bool) {
        let mut state = self.state();
        if fail {
            state.fail_moves.insert(session_id);
        } else {
            state.fail_moves.remove(&session_id);
        }
    }

    pub fn is_open(&self, port: &str) -> bool {
        self.state().open.values().any(|name| name == port)
    }

    pub fn open_ports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().open.values().cloned().collect();
        names.sort();
        names
    }

    pub fn is_suspended(&self, port: &str) -> bool {
        self.state().suspended.contains(port)
    }

    pub fn is_muted(&self, sink: &str) -> bool {
        self.state().muted.contains(sink)
    }

    /// Last successful move target of a session
    pub fn location_of(&self, session_id: u32) -> Option<MoveTarget> {
        self.state().moves.get(&session_id).cloned()
    }
}

impl HardwarePortManager for SimulatedPortManager {
    fn open_port(&self, spec: &ModuleSpec) -> Result<PortHandle, PortError> {
        self.log.record(SimCall::OpenPort(spec.name.clone()));
        let mut state = self.state();
        if state.fail_open.contains(&spec.name) {
            return Err(PortError::OpenFailed(spec.name.clone()));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.open.insert(handle, spec.name.clone());
        Ok(handle)
    }

    fn close_port(&self, handle: PortHandle) -> Result<(), PortError> {
        let name = self.name_of(handle)?;
        self.log.record(SimCall::ClosePort(name));
        self.state().open.remove(&handle);
        Ok(())
    }

    fn set_port_active(
        &self,
        handle: PortHandle,
        device: &DeviceDescriptor,
        active: bool,
    ) -> Result<(), PortError> {
        let port = self.name_of(handle)?;
        self.log.record(SimCall::SetPortActive {
            port,
            device: device.device_type,
            active,
        });
        Ok(())
    }

    fn suspend_port(&self, name: &str, suspend: bool) -> Result<(), PortError> {
        self.log.record(SimCall::SuspendPort {
            port: name.to_string(),
            suspend,
        });
        let mut state = self.state();
        if suspend {
            state.suspended.insert(name.to_string());
        } else {
            state.suspended.remove(name);
        }
        Ok(())
    }

    fn move_stream(&self, session_id: u32, target: &MoveTarget) -> Result<(), PortError> {
        self.log.record(SimCall::MoveStream {
            session_id,
            target: target.clone(),
        });
        let mut state = self.state();
        if state.fail_moves.contains(&session_id) {
            return Err(PortError::MoveFailed {
                session_id,
                reason: "simulated failure".to_string(),
            });
        }
        state.moves.insert(session_id, target.clone());
        Ok(())
    }

    fn set_sink_mute(&self, name: &str, mute: bool) -> Result<(), PortError> {
        self.log.record(SimCall::SetSinkMute {
            sink: name.to_string(),
            mute,
        });
        let mut state = self.state();
        if mute {
            state.muted.insert(name.to_string());
        } else {
            state.muted.remove(name);
        }
        Ok(())
    }

    fn reset_offload_mode(&self, session_id: u32) -> Result<(), PortError> {
        self.log.record(SimCall::ResetOffloadMode(session_id));
        Ok(())
    }

    fn push_offload_codec(&self, _capability: &DeviceCapability) -> Result<(), PortError> {
        self.log.record(SimCall::PushOffloadCodec);
        Ok(())
    }
}
