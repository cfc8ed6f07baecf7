//! Error types shared across the policy engine

use crate::domain::config::ConfigError;
use crate::domain::device::DeviceType;
use crate::domain::sco::ScoCategory;
use thiserror::Error;

/// Failure reported by the Bluetooth profile client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BluetoothError {
    #[error("Bluetooth device {0} is not connected")]
    NotConnected(String),

    #[error("Profile call rejected: {0}")]
    Rejected(String),

    #[error("Profile stack unavailable")]
    Unavailable,
}

/// Failure reported by the audio HAL port manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("Failed to open port {0}")]
    OpenFailed(String),

    #[error("Unknown port handle {0}")]
    UnknownHandle(u32),

    #[error("Failed to move session {session_id}: {reason}")]
    MoveFailed { session_id: u32, reason: String },

    #[error("HAL operation failed: {0}")]
    Hal(String),
}

/// Device activation failed; the device gets its exception flag set
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Bluetooth activation of {device_type} [{mac}] failed: {source}")]
    Bluetooth {
        device_type: DeviceType,
        mac: String,
        #[source]
        source: BluetoothError,
    },

    #[error("Bluetooth device has no mac address")]
    MissingMac,

    #[error("Port activation failed: {0}")]
    Port(#[from] PortError),

    #[error("SCO link setup failed: {0}")]
    Sco(#[from] ScoError),
}

/// SCO link sequencing failure
#[derive(Debug, Error)]
pub enum ScoError {
    #[error("Disconnecting SCO for {category:?} failed: {source}")]
    DisconnectFailed {
        category: ScoCategory,
        #[source]
        source: BluetoothError,
    },

    #[error("Connecting SCO for {category:?} failed: {source}")]
    ConnectFailed {
        category: ScoCategory,
        #[source]
        source: BluetoothError,
    },
}

/// Top-level policy errors returned by orchestrator entry points
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Sco(#[from] ScoError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Policy engine is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, PolicyError>;
