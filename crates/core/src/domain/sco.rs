//! SCO link sequencing keyed off the call scene

use crate::domain::bluetooth::BluetoothActivationAdapter;
use crate::domain::context::PolicyContext;
use crate::domain::device::{DeviceRole, DeviceType};
use crate::domain::error::ScoError;
use crate::domain::stream::AudioScene;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// What the SCO link is connected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoCategory {
    #[default]
    Default,
    /// Ringing or a cellular phone call
    Cellular,
    /// VoIP chat
    Virtual,
}

impl ScoCategory {
    /// Ringing only needs the link when the headset plays the ringtone itself
    pub fn for_scene(scene: AudioScene, in_band_ringing: bool) -> Self {
        match scene {
            AudioScene::Default => ScoCategory::Default,
            AudioScene::Ringing if in_band_ringing => ScoCategory::Cellular,
            AudioScene::Ringing => ScoCategory::Default,
            AudioScene::PhoneCall => ScoCategory::Cellular,
            AudioScene::PhoneChat => ScoCategory::Virtual,
        }
    }
}

pub struct ScoSceneManager {
    context: Arc<PolicyContext>,
    bluetooth: BluetoothActivationAdapter,
    op: Mutex<()>,
}

impl ScoSceneManager {
    pub fn new(context: Arc<PolicyContext>, bluetooth: BluetoothActivationAdapter) -> Self {
        Self {
            context,
            bluetooth,
            op: Mutex::new(()),
        }
    }

    /// Bring the SCO link in line with `scene`, then commit the scene.
    ///
    /// The old category is disconnected before the new one is connected; a
    /// failed disconnect aborts without connecting and leaves the scene as
    /// it was.
    pub fn connect_sco_for_scene(&self, scene: AudioScene) -> Result<(), ScoError> {
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        self.apply_scene(scene)
    }

    /// Re-apply the committed scene. Connects the link when an SCO device
    /// became active after the scene change found none.
    pub fn resync(&self) -> Result<(), ScoError> {
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);
        let scene = self.context.scene();
        self.apply_scene(scene)
    }

    fn apply_scene(&self, scene: AudioScene) -> Result<(), ScoError> {
        let old = self.context.sco_category();
        let new = self.category_for(scene);

        if old == new {
            debug!(?scene, category = ?new, "SCO category unchanged");
            self.context.with_state(|s| s.scene = scene);
            return Ok(());
        }

        if old != ScoCategory::Default {
            self.bluetooth
                .disconnect_sco(old)
                .map_err(|source| ScoError::DisconnectFailed { category: old, source })?;
            self.context.with_state(|s| s.sco_category = ScoCategory::Default);
        }

        if new != ScoCategory::Default {
            self.bluetooth
                .connect_sco(new)
                .map_err(|source| ScoError::ConnectFailed { category: new, source })?;
        }

        self.context.with_state(|s| {
            s.sco_category = new;
            s.scene = scene;
        });
        info!(?scene, from = ?old, to = ?new, "SCO category switched");
        Ok(())
    }

    /// Drop the SCO link for whatever category it is connected for
    pub fn disconnect_sco(&self) -> Result<(), ScoError> {
        let _op = self.op.lock().unwrap_or_else(PoisonError::into_inner);

        let old = self.context.sco_category();
        if old == ScoCategory::Default {
            return Ok(());
        }

        self.bluetooth
            .disconnect_sco(old)
            .map_err(|source| ScoError::DisconnectFailed { category: old, source })?;
        self.context.with_state(|s| s.sco_category = ScoCategory::Default);
        info!(category = ?old, "SCO disconnected");
        Ok(())
    }

    fn category_for(&self, scene: AudioScene) -> ScoCategory {
        let has_sco = self.context.with_state(|s| {
            s.registry
                .selectable(DeviceRole::Output)
                .any(|d| d.device_type == DeviceType::BluetoothSco)
        });
        if !has_sco {
            return ScoCategory::Default;
        }

        let in_band = scene == AudioScene::Ringing && self.bluetooth.in_band_ringing();
        ScoCategory::for_scene(scene, in_band)
    }
}
