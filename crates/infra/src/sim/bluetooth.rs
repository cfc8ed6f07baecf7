//! Simulated Bluetooth profile stack

use super::call_log::{CallLog, SimCall};
use conductor_core::domain::{
    BluetoothError, BluetoothProfileClient, OffloadSession, OffloadState, ScoCategory,
};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct BluetoothState {
    active_a2dp: String,
    active_sco: String,
    connected_sco: Option<ScoCategory>,
    fail_a2dp: HashSet<String>,
    fail_sco: HashSet<String>,
    fail_connect: bool,
    fail_disconnect: bool,
    fail_offload_start: bool,
    offload_offer: Option<OffloadState>,
    in_band_ringing: bool,
}

/// Profile client that records every call and fails on demand
pub struct SimulatedBluetoothClient {
    log: CallLog,
    state: Mutex<BluetoothState>,
}

impl SimulatedBluetoothClient {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(BluetoothState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BluetoothState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `set_active_a2dp(mac)` fail until cleared
    pub fn fail_a2dp_activation(&self, mac: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.fail_a2dp.insert(mac.to_string());
        } else {
            state.fail_a2dp.remove(mac);
        }
    }

    pub fn fail_sco_activation(&self, mac: &str, fail: bool) {
        let mut state = self.state();
        if fail {
            state.fail_sco.insert(mac.to_string());
        } else {
            state.fail_sco.remove(mac);
        }
    }

    pub fn fail_sco_connect(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    pub fn fail_sco_disconnect(&self, fail: bool) {
        self.state().fail_disconnect = fail;
    }

    pub fn fail_offload_start(&self, fail: bool) {
        self.state().fail_offload_start = fail;
    }

    /// State answered to the next offload session requests.
    /// `None` answers offload when a spatialized session is present.
    pub fn offer_offload(&self, offer: Option<OffloadState>) {
        self.state().offload_offer = offer;
    }

    pub fn set_in_band_ringing(&self, enabled: bool) {
        self.state().in_band_ringing = enabled;
    }

    /// Profile-level reset, as when the stack restarts
    pub fn clear_active(&self) {
        let mut state = self.state();
        state.active_a2dp.clear();
        state.active_sco.clear();
    }

    pub fn active_sco(&self) -> String {
        self.state().active_sco.clone()
    }

    pub fn connected_sco(&self) -> Option<ScoCategory> {
        self.state().connected_sco
    }
}

impl BluetoothProfileClient for SimulatedBluetoothClient {
    fn set_active_a2dp(&self, mac: &str) -> Result<(), BluetoothError> {
        self.log.record(SimCall::SetActiveA2dp(mac.to_string()));
        let mut state = self.state();
        if state.fail_a2dp.contains(mac) {
            return Err(BluetoothError::Rejected(format!("a2dp activation of {}", mac)));
        }
        state.active_a2dp = mac.to_string();
        Ok(())
    }

    fn active_a2dp(&self) -> String {
        self.state().active_a2dp.clone()
    }

    fn set_active_sco(&self, mac: &str) -> Result<(), BluetoothError> {
        self.log.record(SimCall::SetActiveSco(mac.to_string()));
        let mut state = self.state();
        if state.fail_sco.contains(mac) {
            return Err(BluetoothError::Rejected(format!("sco activation of {}", mac)));
        }
        state.active_sco = mac.to_string();
        Ok(())
    }

    fn connect_sco(&self, category: ScoCategory) -> Result<(), BluetoothError> {
        self.log.record(SimCall::ConnectSco(category));
        let mut state = self.state();
        if state.fail_connect {
            return Err(BluetoothError::Rejected("sco connect".to_string()));
        }
        state.connected_sco = Some(category);
        Ok(())
    }

    fn disconnect_sco(&self, category: ScoCategory) -> Result<(), BluetoothError> {
        self.log.record(SimCall::DisconnectSco(category));
        let mut state = self.state();
        if state.fail_disconnect {
            return Err(BluetoothError::Rejected("sco disconnect".to_string()));
        }
        state.connected_sco = None;
        Ok(())
    }

    fn request_offload_session(
        &self,
        sessions: &[OffloadSession],
    ) -> Result<OffloadState, BluetoothError> {
        let ids: Vec<u32> = sessions.iter().map(|s| s.session_id).collect();
        self.log.record(SimCall::RequestOffloadSession(ids));

        let state = self.state();
        let answer = state.offload_offer.unwrap_or_else(|| {
            if sessions.iter().any(|s| s.spatialization_enabled) {
                OffloadState::A2dpOffload
            } else {
                OffloadState::A2dpNotOffload
            }
        });
        debug!(?answer, sessions = sessions.len(), "Simulated offload negotiation");
        Ok(answer)
    }

    fn offload_start_playing(&self, session_ids: &[u32]) -> Result<(), BluetoothError> {
        self.log.record(SimCall::OffloadStartPlaying(session_ids.to_vec()));
        if self.state().fail_offload_start {
            return Err(BluetoothError::Unavailable);
        }
        Ok(())
    }

    fn offload_stop_playing(&self, session_ids: &[u32]) -> Result<(), BluetoothError> {
        self.log.record(SimCall::OffloadStopPlaying(session_ids.to_vec()));
        Ok(())
    }

    fn in_band_ringing(&self) -> bool {
        self.state().in_band_ringing
    }
}
