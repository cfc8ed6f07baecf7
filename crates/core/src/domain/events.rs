//! Events accepted by the policy engine
//!
//! Every orchestrator entry point has a matching variant so that IPC, PnP
//! and Bluetooth callback threads can hand their events to a single
//! serializing worker instead of calling in concurrently.

use crate::domain::config::PolicyConfig;
use crate::domain::device::{DeviceDescriptor, DeviceType};
use crate::domain::orchestrator::FetchReason;
use crate::domain::router::DistributedRoutingInfo;
use crate::domain::stream::{AudioScene, RouterCategory};

#[derive(Debug, Clone)]
pub enum PolicyEvent {
    DeviceConnected(DeviceDescriptor),
    DeviceDisconnected {
        device_type: DeviceType,
        mac: String,
        network_id: String,
    },
    DeviceEnabledChanged {
        device: DeviceDescriptor,
        enabled: bool,
    },
    ScoStateChanged {
        mac: String,
        connected: bool,
    },
    SceneChanged(AudioScene),
    SelectOutput {
        category: RouterCategory,
        device: DeviceDescriptor,
    },
    SelectInput {
        category: RouterCategory,
        device: DeviceDescriptor,
    },
    DistributedRoutingChanged(Option<DistributedRoutingInfo>),
    StreamChanged,
    ActiveSessionsChanged,
    ConfigReloaded(Box<PolicyConfig>),
    /// Explicit fetch of both roles
    Fetch(FetchReason),
}

impl PolicyEvent {
    /// Short label for logging
    pub fn name(&self) -> &'static str {
        match self {
            PolicyEvent::DeviceConnected(_) => "device_connected",
            PolicyEvent::DeviceDisconnected { .. } => "device_disconnected",
            PolicyEvent::DeviceEnabledChanged { .. } => "device_enabled_changed",
            PolicyEvent::ScoStateChanged { .. } => "sco_state_changed",
            PolicyEvent::SceneChanged(_) => "scene_changed",
            PolicyEvent::SelectOutput { .. } => "select_output",
            PolicyEvent::SelectInput { .. } => "select_input",
            PolicyEvent::DistributedRoutingChanged(_) => "distributed_routing_changed",
            PolicyEvent::StreamChanged => "stream_changed",
            PolicyEvent::ActiveSessionsChanged => "active_sessions_changed",
            PolicyEvent::ConfigReloaded(_) => "config_reloaded",
            PolicyEvent::Fetch(_) => "fetch",
        }
    }
}
