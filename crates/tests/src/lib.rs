//! Shared harness for the end-to-end routing tests
//!
//! [`PolicyHarness`] wires a [`DeviceFetchOrchestrator`] to a
//! [`SimulatedPlatform`], brings up the built-in speaker and microphone and
//! clears the call log, so each test only sees the calls its own events
//! cause.

use conductor_core::domain::{
    DeviceDescriptor, DeviceFetchOrchestrator, DeviceRole, DeviceType, MoveTarget, PolicyConfig,
    SourceType, StreamRoutingInfo, StreamState, StreamUsage, LOCAL_NETWORK_ID,
};
use conductor_infra::{SimCall, SimulatedPlatform};

pub const HEADSET_MAC: &str = "00:1A:7D:DA:71:13";
pub const OTHER_MAC: &str = "00:1A:7D:DA:71:42";
pub const APP_UID: i32 = 10_042;

pub fn speaker() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output)
}

pub fn earpiece() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::Earpiece, DeviceRole::Output)
}

pub fn mic() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input)
}

pub fn a2dp(mac: &str) -> DeviceDescriptor {
    DeviceDescriptor::bluetooth(DeviceType::BluetoothA2dp, DeviceRole::Output, mac)
}

pub fn sco(mac: &str, role: DeviceRole) -> DeviceDescriptor {
    DeviceDescriptor::bluetooth(DeviceType::BluetoothSco, role, mac)
}

pub fn wired_headset() -> DeviceDescriptor {
    DeviceDescriptor::new(DeviceType::WiredHeadset, DeviceRole::Output)
}

/// Factory policy with the lost-device mute disabled so no background
/// thread writes to the call log
pub fn quiet_config() -> PolicyConfig {
    PolicyConfig {
        mute_on_device_lost_ms: 0,
        ..PolicyConfig::factory_default()
    }
}

pub struct PolicyHarness {
    pub platform: SimulatedPlatform,
    pub orchestrator: DeviceFetchOrchestrator,
}

impl PolicyHarness {
    /// Speaker and mic connected, log cleared
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        let harness = Self::bare(config);
        harness.connect(speaker());
        harness.connect(mic());
        harness.platform.log.clear();
        harness
    }

    /// Initialized engine with an empty registry
    pub fn bare(config: PolicyConfig) -> Self {
        let platform = SimulatedPlatform::new();
        let orchestrator = DeviceFetchOrchestrator::new(config, platform.collaborators());
        orchestrator.init().expect("init");
        Self {
            platform,
            orchestrator,
        }
    }

    pub fn connect(&self, device: DeviceDescriptor) -> DeviceDescriptor {
        self.orchestrator
            .on_device_connected(device)
            .expect("device connect")
    }

    pub fn disconnect(&self, device: &DeviceDescriptor) {
        self.orchestrator
            .on_device_disconnected(device.device_type, &device.mac_address, &device.network_id)
            .expect("device disconnect");
    }

    pub fn disconnect_local(&self, device_type: DeviceType) {
        self.orchestrator
            .on_device_disconnected(device_type, "", LOCAL_NETWORK_ID)
            .expect("device disconnect");
    }

    /// Start a running renderer and let the engine route it
    pub fn play(&self, session_id: u32, usage: StreamUsage) {
        self.platform
            .tracker
            .add(StreamRoutingInfo::renderer(session_id, APP_UID, usage));
        self.orchestrator.on_stream_changed().expect("stream change");
    }

    pub fn play_spatial(&self, session_id: u32) {
        let mut stream = StreamRoutingInfo::renderer(session_id, APP_UID, StreamUsage::Music);
        stream.spatialization_enabled = true;
        self.platform.tracker.add(stream);
        self.orchestrator.on_stream_changed().expect("stream change");
    }

    pub fn record(&self, session_id: u32, source: SourceType) {
        self.platform
            .tracker
            .add(StreamRoutingInfo::capturer(session_id, APP_UID, source));
        self.orchestrator.on_stream_changed().expect("stream change");
    }

    pub fn stop(&self, session_id: u32) {
        self.platform
            .tracker
            .update_state(session_id, StreamState::Stopped);
        self.orchestrator.on_stream_changed().expect("stream change");
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.platform.log.snapshot()
    }

    pub fn adapter_calls(&self) -> Vec<SimCall> {
        self.platform.log.adapter_calls()
    }

    pub fn clear_log(&self) {
        self.platform.log.clear();
    }

    /// Device type the tracker last recorded for a session
    pub fn stream_device(&self, session_id: u32) -> Option<DeviceType> {
        self.platform
            .tracker
            .stream(session_id)
            .map(|s| s.device.device_type)
    }

    pub fn location(&self, session_id: u32) -> Option<MoveTarget> {
        self.platform.ports.location_of(session_id)
    }

    pub fn registry_entry(&self, device: &DeviceDescriptor) -> Option<DeviceDescriptor> {
        self.orchestrator.context().find_device(device)
    }

    pub fn output_type(&self) -> DeviceType {
        self.orchestrator.active_output().device_type
    }

    pub fn input_type(&self) -> DeviceType {
        self.orchestrator.active_input().device_type
    }
}

impl Default for PolicyHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Local port move target
pub fn port(name: &str) -> MoveTarget {
    MoveTarget::Local {
        port: name.to_string(),
    }
}
