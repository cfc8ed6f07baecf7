//! Shared, ordered record of collaborator calls

use conductor_core::domain::{DeviceType, MoveTarget, ScoCategory};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    // HAL ports
    OpenPort(String),
    ClosePort(String),
    SetPortActive {
        port: String,
        device: DeviceType,
        active: bool,
    },
    SuspendPort {
        port: String,
        suspend: bool,
    },
    MoveStream {
        session_id: u32,
        target: MoveTarget,
    },
    SetSinkMute {
        sink: String,
        mute: bool,
    },
    ResetOffloadMode(u32),
    PushOffloadCodec,

    // Bluetooth profile
    SetActiveA2dp(String),
    SetActiveSco(String),
    ConnectSco(ScoCategory),
    DisconnectSco(ScoCategory),
    RequestOffloadSession(Vec<u32>),
    OffloadStartPlaying(Vec<u32>),
    OffloadStopPlaying(Vec<u32>),

    // Stream tracker
    RecordDevice {
        session_id: u32,
        device: DeviceType,
    },

    // Event dispatcher
    NotifyPreferredOutput(DeviceType),
    NotifyPreferredInput(DeviceType),
    NotifyDeviceList {
        count: usize,
        connected: bool,
    },
}

impl SimCall {
    /// Calls into the HAL or the Bluetooth stack
    pub fn is_adapter_call(&self) -> bool {
        !matches!(
            self,
            SimCall::RecordDevice { .. }
                | SimCall::NotifyPreferredOutput(_)
                | SimCall::NotifyPreferredInput(_)
                | SimCall::NotifyDeviceList { .. }
        )
    }
}

impl fmt::Display for SimCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimCall::OpenPort(port) => write!(f, "hal.open_port({})", port),
            SimCall::ClosePort(port) => write!(f, "hal.close_port({})", port),
            SimCall::SetPortActive { port, device, active } => {
                write!(f, "hal.set_port_active({}, {}, {})", port, device, active)
            }
            SimCall::SuspendPort { port, suspend } => write!(f, "hal.suspend_port({}, {})", port, suspend),
            SimCall::MoveStream { session_id, target } => {
                write!(f, "hal.move_stream({}, {})", session_id, target)
            }
            SimCall::SetSinkMute { sink, mute } => write!(f, "hal.set_sink_mute({}, {})", sink, mute),
            SimCall::ResetOffloadMode(id) => write!(f, "hal.reset_offload_mode({})", id),
            SimCall::PushOffloadCodec => write!(f, "hal.push_offload_codec"),
            SimCall::SetActiveA2dp(mac) => write!(f, "bt.set_active_a2dp({})", mac),
            SimCall::SetActiveSco(mac) => write!(f, "bt.set_active_sco({})", mac),
            SimCall::ConnectSco(category) => write!(f, "bt.connect_sco({:?})", category),
            SimCall::DisconnectSco(category) => write!(f, "bt.disconnect_sco({:?})", category),
            SimCall::RequestOffloadSession(ids) => write!(f, "bt.request_offload_session({:?})", ids),
            SimCall::OffloadStartPlaying(ids) => write!(f, "bt.offload_start_playing({:?})", ids),
            SimCall::OffloadStopPlaying(ids) => write!(f, "bt.offload_stop_playing({:?})", ids),
            SimCall::RecordDevice { session_id, device } => {
                write!(f, "tracker.record_device({}, {})", session_id, device)
            }
            SimCall::NotifyPreferredOutput(device) => write!(f, "event.preferred_output({})", device),
            SimCall::NotifyPreferredInput(device) => write!(f, "event.preferred_input({})", device),
            SimCall::NotifyDeviceList { count, connected } => {
                write!(f, "event.device_list({}, connected={})", count, connected)
            }
        }
    }
}

/// Cheaply clonable handle to one call sequence
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<SimCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: SimCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn snapshot(&self) -> Vec<SimCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the log, returning what was recorded
    pub fn take(&self) -> Vec<SimCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn adapter_calls(&self) -> Vec<SimCall> {
        self.snapshot()
            .into_iter()
            .filter(SimCall::is_adapter_call)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&SimCall) -> bool) -> usize {
        self.snapshot().iter().filter(|c| pred(c)).count()
    }

    /// Index of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&SimCall) -> bool) -> Option<usize> {
        self.snapshot().iter().position(pred)
    }
}
