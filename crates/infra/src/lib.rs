//! Infrastructure for the conductor policy engine
//!
//! - [`sim`]: in-process implementations of the collaborator traits, all
//!   writing to one shared [`CallLog`](sim::CallLog) so call ordering can be
//!   asserted across collaborators
//! - [`event_loop`]: a worker thread that serializes policy events

pub mod event_loop;
pub mod sim;

pub use event_loop::{EventLoopError, PolicyEventLoop, PolicyHandle};
pub use sim::{
    BroadcastEventDispatcher, CallLog, DispatchedEvent, InMemoryStreamTracker, SimCall,
    SimulatedBluetoothClient, SimulatedPlatform, SimulatedPortManager,
};
