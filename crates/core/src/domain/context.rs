//! Shared policy state
//!
//! [`PolicyContext`] replaces the process-wide singletons of a classic
//! audio policy service. Registry, active devices, offload flags, scene,
//! user preferences, open ports and distributed routing sit behind one
//! mutex, so a mutation touching several of them is a single critical
//! section and their update order cannot invert.
//!
//! Lock hierarchy for callers: fetch lock, then offload transition lock,
//! then this state lock. Never call a collaborator while holding it.

use crate::domain::config::{ModuleClass, PolicyConfig};
use crate::domain::device::{DeviceDescriptor, DeviceRole, DeviceType};
use crate::domain::offload::{OffloadFlags, OffloadState};
use crate::domain::ports::PortHandle;
use crate::domain::registry::DeviceRegistry;
use crate::domain::router::{DistributedRoutingInfo, RoutingSnapshot};
use crate::domain::sco::ScoCategory;
use crate::domain::stream::{AudioScene, RouterCategory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The one active output and one active input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveDevices {
    pub output: DeviceDescriptor,
    pub input: DeviceDescriptor,
}

impl ActiveDevices {
    pub fn get(&self, role: DeviceRole) -> &DeviceDescriptor {
        match role {
            DeviceRole::Input => &self.input,
            _ => &self.output,
        }
    }

    pub fn set(&mut self, role: DeviceRole, device: DeviceDescriptor) {
        match role {
            DeviceRole::Input => self.input = device,
            _ => self.output = device,
        }
    }
}

/// Devices the user picked per router category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPreferences {
    selected: HashMap<RouterCategory, DeviceDescriptor>,
}

impl UserPreferences {
    pub fn get(&self, category: RouterCategory) -> Option<&DeviceDescriptor> {
        self.selected.get(&category)
    }

    /// Select a device; the none sentinel clears the selection
    pub fn set(&mut self, category: RouterCategory, device: DeviceDescriptor) {
        if device.is_none() {
            self.selected.remove(&category);
        } else {
            self.selected.insert(category, device);
        }
    }

    /// Forget every selection of a disconnected device
    pub fn drop_device(&mut self, device: &DeviceDescriptor) -> bool {
        let before = self.selected.len();
        self.selected.retain(|_, d| !d.same_device(device));
        before != self.selected.len()
    }
}

/// Everything guarded by the state lock
#[derive(Debug)]
pub struct PolicyState {
    pub config: Arc<PolicyConfig>,
    pub registry: DeviceRegistry,
    pub active: ActiveDevices,
    pub offload: OffloadFlags,
    pub scene: AudioScene,
    /// Category the SCO link is currently connected for
    pub sco_category: ScoCategory,
    pub preferences: UserPreferences,
    /// Open hardware ports by port name
    pub open_ports: HashMap<String, PortHandle>,
    pub distributed: Option<DistributedRoutingInfo>,
}

impl PolicyState {
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self {
            config,
            registry: DeviceRegistry::new(),
            active: ActiveDevices::default(),
            offload: OffloadFlags::default(),
            scene: AudioScene::Default,
            sco_category: ScoCategory::Default,
            preferences: UserPreferences::default(),
            open_ports: HashMap::new(),
            distributed: None,
        }
    }

    /// Whether any port of a module class is open
    pub fn module_loaded(&self, class: ModuleClass) -> bool {
        self.config
            .modules_of(class)
            .any(|m| self.open_ports.contains_key(&m.name))
    }

    /// Port name serving a device, if the device is local and mapped
    pub fn port_name_for(&self, device: &DeviceDescriptor) -> Option<String> {
        if !device.is_local() {
            return None;
        }
        self.config
            .module_for(device.device_type, device.role)
            .map(|m| m.name.clone())
    }

    /// A2DP target whose module is not loaded must be re-handled even when
    /// streams already point at it. Both facts are read under this one lock.
    pub fn needs_forced_rehandle(&self, target: &DeviceDescriptor) -> bool {
        target.device_type == DeviceType::BluetoothA2dp && !self.module_loaded(ModuleClass::A2dp)
    }

    pub fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            registry: self.registry.clone(),
            preferences: self.preferences.clone(),
            scene: self.scene,
            active: self.active.clone(),
            distributed: self.distributed.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

/// Owner of the shared policy state
#[derive(Debug)]
pub struct PolicyContext {
    state: Mutex<PolicyState>,
}

impl PolicyContext {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            state: Mutex::new(PolicyState::new(Arc::new(config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        // State stays consistent across a panic: every mutation is a plain
        // field assignment
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside the state critical section
    pub fn with_state<R>(&self, f: impl FnOnce(&mut PolicyState) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn config(&self) -> Arc<PolicyConfig> {
        Arc::clone(&self.lock().config)
    }

    pub fn replace_config(&self, config: PolicyConfig) {
        self.lock().config = Arc::new(config);
    }

    pub fn snapshot(&self) -> RoutingSnapshot {
        self.lock().snapshot()
    }

    pub fn active_output(&self) -> DeviceDescriptor {
        self.lock().active.output.clone()
    }

    pub fn active_input(&self) -> DeviceDescriptor {
        self.lock().active.input.clone()
    }

    pub fn active_devices(&self) -> ActiveDevices {
        self.lock().active.clone()
    }

    pub fn offload_flags(&self) -> OffloadFlags {
        self.lock().offload
    }

    pub fn offload_state(&self) -> OffloadState {
        self.lock().offload.current
    }

    pub fn scene(&self) -> AudioScene {
        self.lock().scene
    }

    pub fn sco_category(&self) -> ScoCategory {
        self.lock().sco_category
    }

    pub fn connected_devices(&self, role: DeviceRole) -> Vec<DeviceDescriptor> {
        self.lock().registry.devices(role)
    }

    pub fn find_device(&self, device: &DeviceDescriptor) -> Option<DeviceDescriptor> {
        self.lock().registry.find(device).cloned()
    }
}
