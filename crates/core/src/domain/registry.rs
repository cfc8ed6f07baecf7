//! Connected device registry
//!
//! The registry is the single owner of [`DeviceDescriptor`]s. A device that
//! plays both roles (a wired headset, an SCO headset) is held as two
//! entries sharing the same identity.

use crate::domain::config::{DeviceUsage, PolicyConfig, PrivacyClass};
use crate::domain::device::{ConnectState, DeviceDescriptor, DeviceRole, DeviceType};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
    next_id: u32,
    clock: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected device, replacing any entry with the same
    /// identity and role. Returns the stored copy.
    pub fn add_device(&mut self, mut device: DeviceDescriptor) -> DeviceDescriptor {
        self.clock += 1;
        device.connect_state = ConnectState::Connected;
        device.exception_flag = false;
        device.connect_time = self.clock;

        if let Some(existing) = self
            .devices
            .iter_mut()
            .find(|d| d.same_device(&device) && d.role == device.role)
        {
            device.id = existing.id;
            *existing = device.clone();
            debug!(device = %device, "Replaced registry entry");
            return device;
        }

        self.next_id += 1;
        device.id = self.next_id;
        debug!(device = %device, "Added registry entry");
        self.devices.push(device.clone());
        device
    }

    /// Remove every role registered for an identity
    pub fn remove_device(
        &mut self,
        device_type: DeviceType,
        mac: &str,
        network_id: &str,
    ) -> Vec<DeviceDescriptor> {
        let (removed, kept): (Vec<_>, Vec<_>) = self.devices.drain(..).partition(|d| {
            d.device_type == device_type && d.mac_address == mac && d.network_id == network_id
        });
        self.devices = kept;
        removed
    }

    pub fn find(&self, device: &DeviceDescriptor) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| d.same_device(device) && (device.role == DeviceRole::None || d.role == device.role))
    }

    pub fn contains_selectable(&self, device: &DeviceDescriptor) -> bool {
        self.find(device).is_some_and(DeviceDescriptor::is_selectable)
    }

    /// Update the connect state of every role sharing the identity
    pub fn update_connect_state(&mut self, device: &DeviceDescriptor, state: ConnectState) -> bool {
        self.for_each_role(device, |d| d.connect_state = state)
    }

    pub fn set_enabled(&mut self, device: &DeviceDescriptor, enabled: bool) -> bool {
        self.for_each_role(device, |d| d.enabled = enabled)
    }

    pub fn set_exception_flag(&mut self, device: &DeviceDescriptor, flag: bool) -> bool {
        self.for_each_role(device, |d| d.exception_flag = flag)
    }

    pub fn clear_exception_flags(&mut self) {
        for device in &mut self.devices {
            device.exception_flag = false;
        }
    }

    /// Make `device` the connected entry of its Bluetooth profile; other
    /// connected devices of the same type drop to `DeactiveConnected`.
    pub fn mark_profile_active(&mut self, device: &DeviceDescriptor) {
        for d in &mut self.devices {
            if d.device_type != device.device_type {
                continue;
            }
            if d.same_device(device) {
                d.connect_state = ConnectState::Connected;
            } else if d.connect_state == ConnectState::Connected {
                d.connect_state = ConnectState::DeactiveConnected;
            }
        }
    }

    fn for_each_role(&mut self, device: &DeviceDescriptor, mut f: impl FnMut(&mut DeviceDescriptor)) -> bool {
        let mut found = false;
        for d in self.devices.iter_mut().filter(|d| d.same_device(device)) {
            f(d);
            found = true;
        }
        found
    }

    /// All entries of a role, any state
    pub fn devices(&self, role: DeviceRole) -> Vec<DeviceDescriptor> {
        self.devices.iter().filter(|d| d.role == role).cloned().collect()
    }

    /// Selectable entries of a role
    pub fn selectable(&self, role: DeviceRole) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices
            .iter()
            .filter(move |d| d.role == role && d.is_selectable())
    }

    pub fn privacy_devices(
        &self,
        config: &PolicyConfig,
        role: DeviceRole,
        usage: DeviceUsage,
    ) -> Vec<DeviceDescriptor> {
        self.classified(config, role, usage, PrivacyClass::Privacy)
    }

    pub fn public_devices(
        &self,
        config: &PolicyConfig,
        role: DeviceRole,
        usage: DeviceUsage,
    ) -> Vec<DeviceDescriptor> {
        self.classified(config, role, usage, PrivacyClass::Public)
    }

    fn classified(
        &self,
        config: &PolicyConfig,
        role: DeviceRole,
        usage: DeviceUsage,
        class: PrivacyClass,
    ) -> Vec<DeviceDescriptor> {
        self.selectable(role)
            .filter(|d| config.privacy_class(d.device_type, d.category, role, usage) == Some(class))
            .cloned()
            .collect()
    }

    /// Selectable devices on other network nodes
    pub fn remote_devices(&self, role: DeviceRole) -> Vec<DeviceDescriptor> {
        self.selectable(role).filter(|d| !d.is_local()).cloned().collect()
    }

    /// Most recently connected entry of a list
    pub fn latest_connected<'a, I>(devices: I) -> Option<DeviceDescriptor>
    where
        I: IntoIterator<Item = &'a DeviceDescriptor>,
    {
        devices
            .into_iter()
            .max_by_key(|d| d.connect_time)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
