//! Bluetooth activation adapter
//!
//! Thin façade over [`BluetoothProfileClient`] that logs every failure and
//! converts it into the policy error types. Callers must not hold the
//! policy state lock while calling in: the profile stack may block.

use crate::domain::device::{DeviceDescriptor, DeviceType};
use crate::domain::error::{ActivationError, BluetoothError};
use crate::domain::offload::{OffloadSession, OffloadState};
use crate::domain::ports::BluetoothProfileClient;
use crate::domain::sco::ScoCategory;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct BluetoothActivationAdapter {
    client: Arc<dyn BluetoothProfileClient>,
}

impl BluetoothActivationAdapter {
    pub fn new(client: Arc<dyn BluetoothProfileClient>) -> Self {
        Self { client }
    }

    /// Make an A2DP sink the active one; a no-op when it already is
    pub fn set_active_a2dp(&self, device: &DeviceDescriptor) -> Result<(), ActivationError> {
        if device.mac_address.is_empty() {
            error!(device = %device, "A2DP activation without mac address");
            return Err(ActivationError::MissingMac);
        }

        if self.client.active_a2dp() == device.mac_address {
            debug!(mac = %device.mac_address, "A2DP device already active");
            return Ok(());
        }

        self.client
            .set_active_a2dp(&device.mac_address)
            .map_err(|source| activation_failed(DeviceType::BluetoothA2dp, device, source))?;

        info!(mac = %device.mac_address, "A2DP device activated");
        Ok(())
    }

    pub fn active_a2dp(&self) -> Option<String> {
        let mac = self.client.active_a2dp();
        (!mac.is_empty()).then_some(mac)
    }

    pub fn set_active_sco(&self, device: &DeviceDescriptor) -> Result<(), ActivationError> {
        if device.mac_address.is_empty() {
            error!(device = %device, "SCO activation without mac address");
            return Err(ActivationError::MissingMac);
        }

        self.client
            .set_active_sco(&device.mac_address)
            .map_err(|source| activation_failed(DeviceType::BluetoothSco, device, source))?;

        info!(mac = %device.mac_address, "SCO device activated");
        Ok(())
    }

    pub fn connect_sco(&self, category: ScoCategory) -> Result<(), BluetoothError> {
        self.client.connect_sco(category).map_err(|e| {
            error!(?category, error = %e, "SCO connect failed");
            e
        })
    }

    pub fn disconnect_sco(&self, category: ScoCategory) -> Result<(), BluetoothError> {
        self.client.disconnect_sco(category).map_err(|e| {
            error!(?category, error = %e, "SCO disconnect failed");
            e
        })
    }

    pub fn request_offload_session(
        &self,
        sessions: &[OffloadSession],
    ) -> Result<OffloadState, BluetoothError> {
        self.client.request_offload_session(sessions).map_err(|e| {
            error!(sessions = sessions.len(), error = %e, "Offload session request failed");
            e
        })
    }

    pub fn offload_start_playing(&self, session_ids: &[u32]) -> Result<(), BluetoothError> {
        self.client.offload_start_playing(session_ids).map_err(|e| {
            error!(?session_ids, error = %e, "Offload start playing failed");
            e
        })
    }

    pub fn offload_stop_playing(&self, session_ids: &[u32]) -> Result<(), BluetoothError> {
        self.client.offload_stop_playing(session_ids).map_err(|e| {
            error!(?session_ids, error = %e, "Offload stop playing failed");
            e
        })
    }

    pub fn in_band_ringing(&self) -> bool {
        self.client.in_band_ringing()
    }
}

fn activation_failed(
    device_type: DeviceType,
    device: &DeviceDescriptor,
    source: BluetoothError,
) -> ActivationError {
    error!(%device_type, mac = %device.mac_address, error = %source, "Bluetooth activation failed");
    ActivationError::Bluetooth {
        device_type,
        mac: device.mac_address.clone(),
        source,
    }
}
