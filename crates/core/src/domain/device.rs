//! Device descriptors and hardware categories
//!
//! A [`DeviceDescriptor`] is the policy engine's view of one connected
//! physical or logical endpoint. Descriptors are owned by the
//! [`DeviceRegistry`](crate::domain::registry::DeviceRegistry); every other
//! component works on clones.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network id carried by devices attached to this node
pub const LOCAL_NETWORK_ID: &str = "LocalDevice";

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz16000,
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            16000 => SampleRate::Hz16000,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }
}

/// Number of audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }
}

/// Supported audio sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    S16Le,
    S24Le,
    S32Le,
    F32Le,
}

/// Stream capability advertised by a device (used as A2DP codec parameters)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub sample_rates: Vec<SampleRate>,
    pub channels: Vec<ChannelCount>,
    pub format: SampleFormat,
}

impl Default for DeviceCapability {
    fn default() -> Self {
        Self {
            sample_rates: vec![SampleRate::Hz48000],
            channels: vec![ChannelCount::Stereo],
            format: SampleFormat::S16Le,
        }
    }
}

/// Direction of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceRole {
    #[default]
    None,
    Output,
    Input,
}

/// Hardware category of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceType {
    #[default]
    None,
    Earpiece,
    Speaker,
    WiredHeadset,
    WiredHeadphones,
    BluetoothSco,
    BluetoothA2dp,
    UsbHeadset,
    Dp,
    Mic,
    WakeUp,
    FileSink,
    FileSource,
    RemoteCast,
}

impl DeviceType {
    /// Whether the device is reached through the Bluetooth profile stack
    pub fn is_bluetooth(&self) -> bool {
        matches!(self, DeviceType::BluetoothA2dp | DeviceType::BluetoothSco)
    }

    /// Role a freshly connected device of this type plays when the event
    /// source does not say
    pub fn default_role(&self) -> DeviceRole {
        match self {
            DeviceType::None => DeviceRole::None,
            DeviceType::Mic | DeviceType::WakeUp | DeviceType::FileSource => DeviceRole::Input,
            _ => DeviceRole::Output,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Connection state of a descriptor held by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectState {
    #[default]
    Connected,
    /// Connected at the profile level but not the active device
    DeactiveConnected,
    SuspendConnected,
    Disconnected,
}

/// Product category, used by the cockpit (car phone) router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceCategory {
    #[default]
    Unknown,
    Headphone,
    Glasses,
    Watch,
    Car,
    Soundbox,
}

/// Policy view of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Registry-assigned id, 0 for the "none" sentinel
    pub id: u32,
    pub device_type: DeviceType,
    pub role: DeviceRole,
    pub mac_address: String,
    pub network_id: String,
    pub name: String,
    pub connect_state: ConnectState,
    pub enabled: bool,
    /// Set after a failed activation; excludes the device from selection
    pub exception_flag: bool,
    pub capability: DeviceCapability,
    pub category: DeviceCategory,
    /// Monotonic connect stamp, larger is more recent
    pub connect_time: u64,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self::none()
    }
}

impl DeviceDescriptor {
    /// The "no decision" sentinel
    pub fn none() -> Self {
        Self {
            id: 0,
            device_type: DeviceType::None,
            role: DeviceRole::None,
            mac_address: String::new(),
            network_id: LOCAL_NETWORK_ID.to_string(),
            name: String::new(),
            connect_state: ConnectState::Disconnected,
            enabled: true,
            exception_flag: false,
            capability: DeviceCapability::default(),
            category: DeviceCategory::Unknown,
            connect_time: 0,
        }
    }

    /// Local device of the given type and role
    pub fn new(device_type: DeviceType, role: DeviceRole) -> Self {
        Self {
            device_type,
            role,
            name: device_type.to_string(),
            connect_state: ConnectState::Connected,
            ..Self::none()
        }
    }

    /// Bluetooth device identified by its mac address
    pub fn bluetooth(device_type: DeviceType, role: DeviceRole, mac: &str) -> Self {
        Self::new(device_type, role).with_mac(mac)
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.mac_address = mac.to_string();
        self
    }

    pub fn with_network_id(mut self, network_id: &str) -> Self {
        self.network_id = network_id.to_string();
        self
    }

    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_capability(mut self, capability: DeviceCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn is_none(&self) -> bool {
        self.device_type == DeviceType::None
    }

    pub fn is_local(&self) -> bool {
        self.network_id == LOCAL_NETWORK_ID
    }

    /// Identity comparison: type, mac address and network id
    pub fn same_device(&self, other: &DeviceDescriptor) -> bool {
        self.device_type == other.device_type
            && self.mac_address == other.mac_address
            && self.network_id == other.network_id
    }

    /// Whether a router may return this device
    pub fn is_selectable(&self) -> bool {
        self.enabled
            && !self.exception_flag
            && matches!(
                self.connect_state,
                ConnectState::Connected | ConnectState::DeactiveConnected
            )
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(f, "none");
        }
        write!(f, "{}#{}", self.device_type, self.id)?;
        if !self.mac_address.is_empty() {
            write!(f, "[{}]", self.mac_address)?;
        }
        if !self.is_local() {
            write!(f, "@{}", self.network_id)?;
        }
        Ok(())
    }
}
