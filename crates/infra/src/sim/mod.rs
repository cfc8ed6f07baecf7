//! Simulated collaborators
//!
//! Stand-ins for the audio HAL, the Bluetooth profile stack, the stream
//! tracker and the client notification bus. They back the CLI scenarios
//! and the integration tests.

mod bluetooth;
mod call_log;
mod events;
mod ports;
mod tracker;

pub use bluetooth::SimulatedBluetoothClient;
pub use call_log::{CallLog, SimCall};
pub use events::{BroadcastEventDispatcher, DispatchedEvent};
pub use ports::SimulatedPortManager;
pub use tracker::InMemoryStreamTracker;

use conductor_core::domain::Collaborators;
use std::sync::Arc;

/// One simulated platform; all parts share a single [`CallLog`]
#[derive(Clone)]
pub struct SimulatedPlatform {
    pub log: CallLog,
    pub tracker: Arc<InMemoryStreamTracker>,
    pub ports: Arc<SimulatedPortManager>,
    pub bluetooth: Arc<SimulatedBluetoothClient>,
    pub dispatcher: Arc<BroadcastEventDispatcher>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        let log = CallLog::new();
        Self {
            tracker: Arc::new(InMemoryStreamTracker::new(log.clone())),
            ports: Arc::new(SimulatedPortManager::new(log.clone())),
            bluetooth: Arc::new(SimulatedBluetoothClient::new(log.clone())),
            dispatcher: Arc::new(BroadcastEventDispatcher::new(log.clone())),
            log,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            tracker: self.tracker.clone(),
            ports: self.ports.clone(),
            bluetooth: self.bluetooth.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}
