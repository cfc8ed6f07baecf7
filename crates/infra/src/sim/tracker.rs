//! In-memory stream tracker

use super::call_log::{CallLog, SimCall};
use conductor_core::domain::{
    DeviceDescriptor, StreamKind, StreamRoutingInfo, StreamState, StreamTracker,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Streams keyed by session id, iterated in session order
pub struct InMemoryStreamTracker {
    log: CallLog,
    streams: Mutex<BTreeMap<u32, StreamRoutingInfo>>,
}

impl InMemoryStreamTracker {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            streams: Mutex::new(BTreeMap::new()),
        }
    }

    fn streams_guard(&self) -> MutexGuard<'_, BTreeMap<u32, StreamRoutingInfo>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a stream, replacing any with the same session id
    pub fn add(&self, stream: StreamRoutingInfo) {
        self.streams_guard().insert(stream.session_id, stream);
    }

    pub fn update_state(&self, session_id: u32, state: StreamState) -> bool {
        match self.streams_guard().get_mut(&session_id) {
            Some(stream) => {
                stream.state = state;
                true
            }
            None => false,
        }
    }

    pub fn set_spatialization(&self, session_id: u32, enabled: bool) -> bool {
        match self.streams_guard().get_mut(&session_id) {
            Some(stream) => {
                stream.spatialization_enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, session_id: u32) -> Option<StreamRoutingInfo> {
        self.streams_guard().remove(&session_id)
    }

    pub fn stream(&self, session_id: u32) -> Option<StreamRoutingInfo> {
        self.streams_guard().get(&session_id).cloned()
    }

    pub fn streams(&self) -> Vec<StreamRoutingInfo> {
        self.streams_guard().values().cloned().collect()
    }

    /// Streams of one direction that are not released. The fetch loop
    /// applies the scene-aware running predicate itself.
    fn live(&self, render: bool) -> Vec<StreamRoutingInfo> {
        self.streams_guard()
            .values()
            .filter(|s| matches!(s.kind, StreamKind::Render(_)) == render)
            .filter(|s| s.state != StreamState::Released)
            .cloned()
            .collect()
    }
}

impl StreamTracker for InMemoryStreamTracker {
    fn snapshot_running_renderer_streams(&self) -> Vec<StreamRoutingInfo> {
        self.live(true)
    }

    fn snapshot_running_capturer_streams(&self) -> Vec<StreamRoutingInfo> {
        self.live(false)
    }

    fn record_device_for_stream(&self, session_id: u32, device: &DeviceDescriptor) {
        self.log.record(SimCall::RecordDevice {
            session_id,
            device: device.device_type,
        });
        if let Some(stream) = self.streams_guard().get_mut(&session_id) {
            stream.device = device.clone();
        }
    }
}
