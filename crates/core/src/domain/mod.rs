//! Domain entities and policy rules

pub mod bluetooth;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod offload;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod router;
pub mod sco;
pub mod stream;
pub mod volume_gate;

// Re-export specific items to avoid ambiguous glob imports
pub use bluetooth::BluetoothActivationAdapter;
pub use config::{
    ConfigError, ConfigManager, ConfigWatcher, DevicePrivacyRule, DeviceUsage, ModuleClass,
    ModuleSpec, PolicyConfig, PrivacyClass,
};
pub use context::{ActiveDevices, PolicyContext, PolicyState, UserPreferences};
pub use device::{
    ChannelCount, ConnectState, DeviceCapability, DeviceCategory, DeviceDescriptor, DeviceRole,
    DeviceType, SampleFormat, SampleRate, LOCAL_NETWORK_ID,
};
pub use error::{ActivationError, BluetoothError, PolicyError, PortError, ScoError};
pub use events::PolicyEvent;
pub use offload::{OffloadFlags, OffloadOutcome, OffloadSession, OffloadState, OffloadStateMachine};
pub use orchestrator::{
    Collaborators, DeviceFetchOrchestrator, FetchReason, FetchSummary, MAX_ACTIVATION_RETRIES,
};
pub use ports::{
    BluetoothProfileClient, EventDispatcher, HardwarePortManager, MoveTarget, PortHandle,
    StreamTracker,
};
pub use registry::DeviceRegistry;
pub use router::{
    CastType, CustomRouter, DistributedRoutingInfo, RouteDecision, RouteRequest, RouterChain,
    RouterKind, RoutingSnapshot,
};
pub use sco::{ScoCategory, ScoSceneManager};
pub use stream::{
    AudioScene, RouterCategory, SourceType, StreamKind, StreamRoutingInfo, StreamState,
    StreamUsage, NO_CLIENT_UID,
};
pub use volume_gate::{GateDecision, SafeVolumeGate};
