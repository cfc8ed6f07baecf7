//! Event dispatcher fanning notifications out over a broadcast channel

use super::call_log::{CallLog, SimCall};
use conductor_core::domain::{DeviceDescriptor, EventDispatcher};
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 64;

/// Notification as seen by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchedEvent {
    PreferredOutputChanged(DeviceDescriptor),
    PreferredInputChanged(DeviceDescriptor),
    DeviceListChanged {
        devices: Vec<DeviceDescriptor>,
        connected: bool,
    },
}

pub struct BroadcastEventDispatcher {
    log: CallLog,
    sender: broadcast::Sender<DispatchedEvent>,
}

impl BroadcastEventDispatcher {
    pub fn new(log: CallLog) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { log, sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchedEvent> {
        self.sender.subscribe()
    }

    fn send(&self, event: DispatchedEvent) {
        // No subscriber is fine
        if self.sender.send(event).is_err() {
            trace!("Notification dropped, no subscribers");
        }
    }
}

impl EventDispatcher for BroadcastEventDispatcher {
    fn notify_preferred_output_device_changed(&self, device: &DeviceDescriptor) {
        self.log.record(SimCall::NotifyPreferredOutput(device.device_type));
        self.send(DispatchedEvent::PreferredOutputChanged(device.clone()));
    }

    fn notify_preferred_input_device_changed(&self, device: &DeviceDescriptor) {
        self.log.record(SimCall::NotifyPreferredInput(device.device_type));
        self.send(DispatchedEvent::PreferredInputChanged(device.clone()));
    }

    fn notify_device_list_changed(&self, devices: &[DeviceDescriptor], connected: bool) {
        self.log.record(SimCall::NotifyDeviceList {
            count: devices.len(),
            connected,
        });
        self.send(DispatchedEvent::DeviceListChanged {
            devices: devices.to_vec(),
            connected,
        });
    }
}
