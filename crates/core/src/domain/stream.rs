//! Stream descriptions supplied by the stream tracker

use crate::domain::device::DeviceDescriptor;
use serde::{Deserialize, Serialize};

/// Client uid used for the idle fallback fetch when nothing is running
pub const NO_CLIENT_UID: i32 = -1;

/// Platform call/audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioScene {
    #[default]
    Default,
    Ringing,
    PhoneCall,
    PhoneChat,
}

impl AudioScene {
    /// Ringing, phone call and chat all count as "in call" for routing
    pub fn is_in_call(&self) -> bool {
        !matches!(self, AudioScene::Default)
    }
}

/// Ordering selected by the router chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouterCategory {
    MediaRender,
    CallRender,
    RecordCapture,
    CallCapture,
}

/// What a renderer is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StreamUsage {
    #[default]
    Unknown,
    Media,
    Music,
    VoiceCommunication,
    VoiceAssistant,
    Alarm,
    VoiceMessage,
    NotificationRingtone,
    Ringtone,
    Notification,
    Accessibility,
    System,
    Movie,
    Game,
    Audiobook,
    Navigation,
    Dtmf,
    EnforcedTone,
    Ultrasonic,
    VoiceModemCommunication,
}

impl StreamUsage {
    pub fn router_category(&self) -> RouterCategory {
        match self {
            StreamUsage::VoiceCommunication
            | StreamUsage::VoiceAssistant
            | StreamUsage::VoiceMessage
            | StreamUsage::VoiceModemCommunication => RouterCategory::CallRender,
            _ => RouterCategory::MediaRender,
        }
    }
}

/// What a capturer records from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceType {
    #[default]
    Mic,
    VoiceRecognition,
    PlaybackCapture,
    Wakeup,
    VoiceCommunication,
    Ultrasonic,
    VirtualCapture,
}

impl SourceType {
    pub fn router_category(&self) -> RouterCategory {
        match self {
            SourceType::VoiceCommunication | SourceType::VirtualCapture => {
                RouterCategory::CallCapture
            }
            _ => RouterCategory::RecordCapture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Render(StreamUsage),
    Capture(SourceType),
}

impl StreamKind {
    pub fn router_category(&self) -> RouterCategory {
        match self {
            StreamKind::Render(usage) => usage.router_category(),
            StreamKind::Capture(source) => source.router_category(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    New,
    Prepared,
    Running,
    Paused,
    Stopped,
    Released,
}

/// Snapshot of one tracked stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRoutingInfo {
    pub session_id: u32,
    pub client_uid: i32,
    pub kind: StreamKind,
    /// Device the stream was last moved to
    pub device: DeviceDescriptor,
    pub state: StreamState,
    pub spatialization_enabled: bool,
}

impl StreamRoutingInfo {
    pub fn renderer(session_id: u32, client_uid: i32, usage: StreamUsage) -> Self {
        Self {
            session_id,
            client_uid,
            kind: StreamKind::Render(usage),
            device: DeviceDescriptor::none(),
            state: StreamState::Running,
            spatialization_enabled: false,
        }
    }

    pub fn capturer(session_id: u32, client_uid: i32, source: SourceType) -> Self {
        Self {
            session_id,
            client_uid,
            kind: StreamKind::Capture(source),
            device: DeviceDescriptor::none(),
            state: StreamState::Running,
            spatialization_enabled: false,
        }
    }

    pub fn with_device(mut self, device: DeviceDescriptor) -> Self {
        self.device = device;
        self
    }

    pub fn with_state(mut self, state: StreamState) -> Self {
        self.state = state;
        self
    }

    /// Running predicate used by the fetch loop.
    ///
    /// A modem call stream has no renderer of its own, so it counts as
    /// running exactly while the scene is a phone call.
    pub fn is_running(&self, scene: AudioScene) -> bool {
        match self.kind {
            StreamKind::Render(StreamUsage::VoiceModemCommunication) => {
                scene == AudioScene::PhoneCall
            }
            _ => self.state == StreamState::Running,
        }
    }
}
