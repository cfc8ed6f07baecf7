//! Collaborator interfaces consumed by the policy engine
//!
//! Implementations live outside the core crate (see `conductor-infra` for
//! the simulated ones). Every call may block briefly on hardware or the
//! profile stack, so callers must not hold the policy state lock.

use crate::domain::config::ModuleSpec;
use crate::domain::device::{DeviceCapability, DeviceDescriptor};
use crate::domain::error::{BluetoothError, PortError};
use crate::domain::offload::{OffloadSession, OffloadState};
use crate::domain::sco::ScoCategory;
use crate::domain::stream::StreamRoutingInfo;
use std::fmt;

/// Opaque handle returned when a hardware module port is opened
pub type PortHandle = u32;

/// Where a stream is moved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    /// A port on this node, by port name
    Local { port: String },
    /// A distributed node, by network id
    Remote { network_id: String },
}

impl fmt::Display for MoveTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveTarget::Local { port } => write!(f, "port:{}", port),
            MoveTarget::Remote { network_id } => write!(f, "network:{}", network_id),
        }
    }
}

/// Read-only view of tracked streams
pub trait StreamTracker: Send + Sync {
    fn snapshot_running_renderer_streams(&self) -> Vec<StreamRoutingInfo>;

    fn snapshot_running_capturer_streams(&self) -> Vec<StreamRoutingInfo>;

    /// Record the device a stream now plays on after a successful move
    fn record_device_for_stream(&self, session_id: u32, device: &DeviceDescriptor);
}

/// Audio HAL port operations
pub trait HardwarePortManager: Send + Sync {
    fn open_port(&self, spec: &ModuleSpec) -> Result<PortHandle, PortError>;

    fn close_port(&self, handle: PortHandle) -> Result<(), PortError>;

    fn set_port_active(
        &self,
        handle: PortHandle,
        device: &DeviceDescriptor,
        active: bool,
    ) -> Result<(), PortError>;

    fn suspend_port(&self, name: &str, suspend: bool) -> Result<(), PortError>;

    fn move_stream(&self, session_id: u32, target: &MoveTarget) -> Result<(), PortError>;

    fn set_sink_mute(&self, name: &str, mute: bool) -> Result<(), PortError>;

    fn reset_offload_mode(&self, session_id: u32) -> Result<(), PortError>;

    /// Push codec parameters to the offload DSP
    fn push_offload_codec(&self, capability: &DeviceCapability) -> Result<(), PortError>;
}

/// Bluetooth profile stack (A2DP source + HFP audio gateway)
pub trait BluetoothProfileClient: Send + Sync {
    fn set_active_a2dp(&self, mac: &str) -> Result<(), BluetoothError>;

    /// Mac of the active A2DP sink, empty when none
    fn active_a2dp(&self) -> String;

    fn set_active_sco(&self, mac: &str) -> Result<(), BluetoothError>;

    fn connect_sco(&self, category: ScoCategory) -> Result<(), BluetoothError>;

    fn disconnect_sco(&self, category: ScoCategory) -> Result<(), BluetoothError>;

    fn request_offload_session(
        &self,
        sessions: &[OffloadSession],
    ) -> Result<OffloadState, BluetoothError>;

    fn offload_start_playing(&self, session_ids: &[u32]) -> Result<(), BluetoothError>;

    fn offload_stop_playing(&self, session_ids: &[u32]) -> Result<(), BluetoothError>;

    fn in_band_ringing(&self) -> bool;
}

/// Outbound notifications to clients
pub trait EventDispatcher: Send + Sync {
    fn notify_preferred_output_device_changed(&self, device: &DeviceDescriptor);

    fn notify_preferred_input_device_changed(&self, device: &DeviceDescriptor);

    fn notify_device_list_changed(&self, devices: &[DeviceDescriptor], connected: bool);
}
