//! Conductor: audio device routing and A2DP offload policy engine
//!
//! The crate decides which device every running stream should use, activates
//! the hardware and Bluetooth paths for that device, and negotiates A2DP
//! hardware offload. Hardware, Bluetooth, stream tracking and event delivery
//! are reached through the traits in [`domain::ports`].

pub mod domain;

pub use domain::*;
