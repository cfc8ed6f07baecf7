//! Device fetch orchestrator
//!
//! Top-level coordinator. Every triggering event ends in a fetch: running
//! streams are routed through the [`RouterChain`], targets that differ from
//! the stream's current device are activated, streams are moved, and the
//! first change of a batch updates the active device and fires a single
//! notification.
//!
//! Locking follows the hierarchy documented on
//! [`PolicyContext`](crate::domain::context::PolicyContext): the per-role
//! fetch lock is taken first, the offload transition lock second and the
//! state lock last. Collaborators are never called under the state lock.

use crate::domain::bluetooth::BluetoothActivationAdapter;
use crate::domain::config::{ModuleClass, ModuleSpec, PolicyConfig};
use crate::domain::context::PolicyContext;
use crate::domain::device::{ConnectState, DeviceDescriptor, DeviceRole, DeviceType, LOCAL_NETWORK_ID};
use crate::domain::error::{ActivationError, PolicyError, PortError, Result};
use crate::domain::events::PolicyEvent;
use crate::domain::offload::{OffloadOutcome, OffloadSession, OffloadState, OffloadStateMachine};
use crate::domain::ports::{
    BluetoothProfileClient, EventDispatcher, HardwarePortManager, MoveTarget, PortHandle,
    StreamTracker,
};
use crate::domain::router::{DistributedRoutingInfo, RouteRequest, RouterChain};
use crate::domain::sco::{ScoCategory, ScoSceneManager};
use crate::domain::stream::{AudioScene, RouterCategory, StreamRoutingInfo};
use crate::domain::volume_gate::{GateDecision, SafeVolumeGate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Re-fetches allowed after an activation failure, per triggering event
pub const MAX_ACTIVATION_RETRIES: u8 = 1;

/// Why a fetch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchReason {
    Init,
    NewDeviceAvailable,
    OldDeviceUnavailable,
    OffloadChanged,
    UserSelect,
    SceneChanged,
    StreamChanged,
    ScoStateChanged,
    DeviceEnabledChanged,
    DistributedRoutingChanged,
    ConfigReloaded,
}

/// External collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub tracker: Arc<dyn StreamTracker>,
    pub ports: Arc<dyn HardwarePortManager>,
    pub bluetooth: Arc<dyn BluetoothProfileClient>,
    pub dispatcher: Arc<dyn EventDispatcher>,
}

/// What one fetch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub moved: usize,
    pub active_changed: bool,
    pub retried: bool,
    pub failed_activations: usize,
}

/// Explicit retry state of one fetch
enum FetchStep {
    Pass { retries_left: u8 },
    Retry { retries_left: u8 },
    Done,
}

pub struct DeviceFetchOrchestrator {
    context: Arc<PolicyContext>,
    routers: RouterChain,
    collaborators: Collaborators,
    bluetooth: BluetoothActivationAdapter,
    offload: OffloadStateMachine,
    sco: ScoSceneManager,
    safe_volume: SafeVolumeGate,
    output_fetch: Mutex<()>,
    input_fetch: Mutex<()>,
    running: AtomicBool,
}

impl DeviceFetchOrchestrator {
    pub fn new(config: PolicyConfig, collaborators: Collaborators) -> Self {
        Self::with_routers(config, collaborators, RouterChain::new())
    }

    /// Build with a router chain carrying custom strategies
    pub fn with_routers(config: PolicyConfig, collaborators: Collaborators, routers: RouterChain) -> Self {
        let context = Arc::new(PolicyContext::new(config));
        let bluetooth = BluetoothActivationAdapter::new(Arc::clone(&collaborators.bluetooth));
        let offload = OffloadStateMachine::new(
            Arc::clone(&context),
            bluetooth.clone(),
            Arc::clone(&collaborators.ports),
        );
        let sco = ScoSceneManager::new(Arc::clone(&context), bluetooth.clone());

        Self {
            context,
            routers,
            collaborators,
            bluetooth,
            offload,
            sco,
            safe_volume: SafeVolumeGate::new(),
            output_fetch: Mutex::new(()),
            input_fetch: Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    /// Open the preloaded modules and run the first fetch
    pub fn init(&self) -> Result<()> {
        let config = self.context.config();
        config.validate()?;

        for spec in config.modules.iter().filter(|m| m.preload) {
            self.open_module(spec)?;
        }
        self.context.with_state(|s| s.registry.clear_exception_flags());
        self.running.store(true, Ordering::SeqCst);
        info!(modules = config.modules.len(), "Policy engine initialized");

        self.fetch_output_devices(FetchReason::Init);
        self.fetch_input_devices(FetchReason::Init);
        Ok(())
    }

    /// Stop accepting events and close every open port
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let ports: Vec<(String, PortHandle)> =
            self.context.with_state(|s| s.open_ports.drain().collect());
        for (name, handle) in ports {
            if let Err(e) = self.collaborators.ports.close_port(handle) {
                warn!(port = %name, error = %e, "Failed to close port on shutdown");
            }
        }
        info!("Policy engine shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(PolicyError::NotRunning)
        }
    }

    pub fn context(&self) -> &Arc<PolicyContext> {
        &self.context
    }

    pub fn active_output(&self) -> DeviceDescriptor {
        self.context.active_output()
    }

    pub fn active_input(&self) -> DeviceDescriptor {
        self.context.active_input()
    }

    pub fn offload_state(&self) -> OffloadState {
        self.context.offload_state()
    }

    pub fn scene(&self) -> AudioScene {
        self.context.scene()
    }

    pub fn connected_devices(&self, role: DeviceRole) -> Vec<DeviceDescriptor> {
        self.context.connected_devices(role)
    }

    /// Dispatch one queued event to its entry point
    pub fn handle_event(&self, event: PolicyEvent) -> Result<()> {
        debug!(event = event.name(), "Handling policy event");
        match event {
            PolicyEvent::DeviceConnected(device) => self.on_device_connected(device).map(|_| ()),
            PolicyEvent::DeviceDisconnected {
                device_type,
                mac,
                network_id,
            } => self.on_device_disconnected(device_type, &mac, &network_id),
            PolicyEvent::DeviceEnabledChanged { device, enabled } => {
                self.on_device_enabled_changed(&device, enabled)
            }
            PolicyEvent::ScoStateChanged { mac, connected } => self.on_sco_state_changed(&mac, connected),
            PolicyEvent::SceneChanged(scene) => self.set_audio_scene(scene),
            PolicyEvent::SelectOutput { category, device } => self.select_output_device(category, device),
            PolicyEvent::SelectInput { category, device } => self.select_input_device(category, device),
            PolicyEvent::DistributedRoutingChanged(info) => self.set_distributed_routing(info),
            PolicyEvent::StreamChanged => self.on_stream_changed(),
            PolicyEvent::ActiveSessionsChanged => self.on_active_sessions_changed().map(|_| ()),
            PolicyEvent::ConfigReloaded(config) => self.reload_config(*config),
            PolicyEvent::Fetch(reason) => {
                self.ensure_running()?;
                self.fetch_output_devices(reason);
                self.fetch_input_devices(reason);
                Ok(())
            }
        }
    }

    // --- event entry points ---

    pub fn on_device_connected(&self, device: DeviceDescriptor) -> Result<DeviceDescriptor> {
        self.ensure_running()?;
        if device.is_none() || device.role == DeviceRole::None {
            return Err(PolicyError::InvalidDevice(device.to_string()));
        }
        if device.device_type.is_bluetooth() && device.mac_address.is_empty() {
            return Err(PolicyError::InvalidDevice(format!(
                "{} without mac address",
                device.device_type
            )));
        }

        let added = self.context.with_state(|s| s.registry.add_device(device));
        info!(device = %added, role = ?added.role, "Device connected");

        if added.device_type == DeviceType::BluetoothA2dp {
            if let Some(spec) = self.module_spec(&added) {
                if let Err(e) = self.open_module(&spec) {
                    warn!(port = %spec.name, error = %e, "A2DP module load failed, fetch will re-handle");
                }
            }
        }

        self.collaborators
            .dispatcher
            .notify_device_list_changed(std::slice::from_ref(&added), true);

        match added.role {
            DeviceRole::Input => {
                self.fetch_input_devices(FetchReason::NewDeviceAvailable);
            }
            _ => {
                let output = self.fetch_output_devices(FetchReason::NewDeviceAvailable);
                // Call capture pairs with the active output
                if output.active_changed {
                    self.fetch_input_devices(FetchReason::NewDeviceAvailable);
                }
            }
        }
        Ok(added)
    }

    pub fn on_device_disconnected(&self, device_type: DeviceType, mac: &str, network_id: &str) -> Result<()> {
        self.ensure_running()?;

        let removed = self.context.with_state(|s| {
            let removed = s.registry.remove_device(device_type, mac, network_id);
            for device in &removed {
                if s.preferences.drop_device(device) {
                    debug!(device = %device, "Dropped user selection of removed device");
                }
            }
            removed
        });
        if removed.is_empty() {
            return Err(PolicyError::DeviceNotFound(format!("{} [{}]", device_type, mac)));
        }
        info!(%device_type, mac, network_id, "Device disconnected");

        self.collaborators.dispatcher.notify_device_list_changed(&removed, false);

        if device_type == DeviceType::BluetoothSco {
            if let Err(e) = self.sco.disconnect_sco() {
                warn!(error = %e, "SCO link teardown failed for removed device");
                self.context.with_state(|s| s.sco_category = ScoCategory::Default);
            }
        }

        if removed.iter().any(|d| d.role == DeviceRole::Output) {
            self.fetch_output_devices(FetchReason::OldDeviceUnavailable);
        }
        if removed.iter().any(|d| d.role == DeviceRole::Input) {
            self.fetch_input_devices(FetchReason::OldDeviceUnavailable);
        }

        if device_type == DeviceType::BluetoothA2dp {
            self.unload_unused_a2dp();
        }
        if network_id != LOCAL_NETWORK_ID {
            self.unload_unused_remote(network_id);
        }
        self.clear_dangling_active(&removed);
        Ok(())
    }

    pub fn on_device_enabled_changed(&self, device: &DeviceDescriptor, enabled: bool) -> Result<()> {
        self.ensure_running()?;

        let found = self.context.with_state(|s| {
            let found = s.registry.set_enabled(device, enabled);
            if found && enabled {
                s.registry.set_exception_flag(device, false);
            }
            found
        });
        if !found {
            return Err(PolicyError::DeviceNotFound(device.to_string()));
        }
        info!(device = %device, enabled, "Device enable state changed");

        self.fetch_output_devices(FetchReason::DeviceEnabledChanged);
        self.fetch_input_devices(FetchReason::DeviceEnabledChanged);
        Ok(())
    }

    /// The SCO link of a headset came up or went down
    pub fn on_sco_state_changed(&self, mac: &str, connected: bool) -> Result<()> {
        self.ensure_running()?;

        let state = if connected {
            ConnectState::Connected
        } else {
            ConnectState::DeactiveConnected
        };
        let sco_device = DeviceDescriptor::bluetooth(DeviceType::BluetoothSco, DeviceRole::None, mac);
        let found = self
            .context
            .with_state(|s| s.registry.update_connect_state(&sco_device, state));
        if !found {
            return Err(PolicyError::DeviceNotFound(format!("SCO [{}]", mac)));
        }
        info!(mac, connected, "SCO state changed");

        self.fetch_output_devices(FetchReason::ScoStateChanged);
        self.fetch_input_devices(FetchReason::ScoStateChanged);
        Ok(())
    }

    pub fn set_audio_scene(&self, scene: AudioScene) -> Result<()> {
        self.ensure_running()?;

        let old = self.context.scene();
        if old == scene {
            debug!(?scene, "Scene unchanged");
            return Ok(());
        }

        self.sco.connect_sco_for_scene(scene)?;
        info!(from = ?old, to = ?scene, "Audio scene changed");

        self.fetch_output_devices(FetchReason::SceneChanged);
        self.fetch_input_devices(FetchReason::SceneChanged);
        Ok(())
    }

    pub fn select_output_device(&self, category: RouterCategory, device: DeviceDescriptor) -> Result<()> {
        self.select_device(DeviceRole::Output, category, device)
    }

    pub fn select_input_device(&self, category: RouterCategory, device: DeviceDescriptor) -> Result<()> {
        self.select_device(DeviceRole::Input, category, device)
    }

    fn select_device(&self, role: DeviceRole, category: RouterCategory, mut device: DeviceDescriptor) -> Result<()> {
        self.ensure_running()?;

        let category_role = match category {
            RouterCategory::MediaRender | RouterCategory::CallRender => DeviceRole::Output,
            RouterCategory::RecordCapture | RouterCategory::CallCapture => DeviceRole::Input,
        };
        if category_role != role {
            return Err(PolicyError::InvalidDevice(format!(
                "{:?} is not a {:?} category",
                category, role
            )));
        }

        if !device.is_none() {
            device.role = role;
            let present = self.context.with_state(|s| s.registry.contains_selectable(&device));
            if !present {
                return Err(PolicyError::DeviceNotFound(device.to_string()));
            }
        }

        info!(?category, device = %device, "User selected device");
        self.context.with_state(|s| s.preferences.set(category, device));
        match role {
            DeviceRole::Input => self.fetch_input_devices(FetchReason::UserSelect),
            _ => self.fetch_output_devices(FetchReason::UserSelect),
        };
        Ok(())
    }

    pub fn set_distributed_routing(&self, info: Option<DistributedRoutingInfo>) -> Result<()> {
        self.ensure_running()?;
        info!(cast = ?info.as_ref().map(|i| i.cast_type), "Distributed routing changed");
        self.context.with_state(|s| s.distributed = info);

        self.fetch_output_devices(FetchReason::DistributedRoutingChanged);
        self.fetch_input_devices(FetchReason::DistributedRoutingChanged);
        Ok(())
    }

    /// A stream started, stopped or was released
    pub fn on_stream_changed(&self) -> Result<()> {
        self.ensure_running()?;
        let output = self.fetch_output_devices(FetchReason::StreamChanged);
        self.fetch_input_devices(FetchReason::StreamChanged);
        if !output.active_changed {
            self.refresh_offload();
        }
        Ok(())
    }

    pub fn on_active_sessions_changed(&self) -> Result<OffloadOutcome> {
        self.ensure_running()?;
        Ok(self.refresh_offload())
    }

    pub fn reload_config(&self, config: PolicyConfig) -> Result<()> {
        config.validate()?;
        let preload: Vec<ModuleSpec> = config.modules.iter().filter(|m| m.preload).cloned().collect();
        self.context.replace_config(config);
        info!("Policy configuration reloaded");

        if !self.is_running() {
            return Ok(());
        }
        for spec in &preload {
            if let Err(e) = self.open_module(spec) {
                warn!(port = %spec.name, error = %e, "Failed to open module after reload");
            }
        }
        self.fetch_output_devices(FetchReason::ConfigReloaded);
        self.fetch_input_devices(FetchReason::ConfigReloaded);
        Ok(())
    }

    // --- safe volume ---

    /// Block the volume path until the safe-volume dialog is answered or
    /// `safe_volume_timeout_secs` elapses
    pub fn wait_for_safe_volume(&self) -> GateDecision {
        let timeout = Duration::from_secs(self.context.config().safe_volume_timeout_secs);
        self.safe_volume.wait_for_decision(timeout)
    }

    pub fn resolve_safe_volume(&self, accepted: bool) {
        self.safe_volume.resolve(accepted);
    }

    // --- fetch ---

    pub fn fetch_output_devices(&self, reason: FetchReason) -> FetchSummary {
        let summary = self.fetch_role(DeviceRole::Output, reason);
        if summary.active_changed && reason != FetchReason::OffloadChanged {
            self.refresh_offload();
        }
        summary
    }

    pub fn fetch_input_devices(&self, reason: FetchReason) -> FetchSummary {
        self.fetch_role(DeviceRole::Input, reason)
    }

    fn fetch_role(&self, role: DeviceRole, reason: FetchReason) -> FetchSummary {
        let mut summary = FetchSummary::default();
        if !self.is_running() {
            debug!(?role, ?reason, "Fetch skipped, engine not running");
            return summary;
        }

        let lock = match role {
            DeviceRole::Input => &self.input_fetch,
            _ => &self.output_fetch,
        };
        let _fetch = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // One active-device commit per triggering event, across retry passes
        let mut committed = false;
        let mut step = FetchStep::Pass {
            retries_left: MAX_ACTIVATION_RETRIES,
        };
        loop {
            step = match step {
                FetchStep::Pass { retries_left } => {
                    let failures = self.fetch_pass(role, reason, &mut summary, &mut committed);
                    summary.failed_activations += failures;
                    if failures == 0 {
                        FetchStep::Done
                    } else if retries_left > 0 {
                        FetchStep::Retry {
                            retries_left: retries_left - 1,
                        }
                    } else {
                        warn!(?role, ?reason, "Activation still failing after retry, keeping previous device");
                        FetchStep::Done
                    }
                }
                FetchStep::Retry { retries_left } => {
                    info!(?role, ?reason, "Re-fetching after activation failure");
                    summary.retried = true;
                    FetchStep::Pass { retries_left }
                }
                FetchStep::Done => break,
            };
        }

        summary
    }

    /// One pass over the running streams of a role. Returns the number of
    /// failed activations.
    fn fetch_pass(
        &self,
        role: DeviceRole,
        reason: FetchReason,
        summary: &mut FetchSummary,
        committed: &mut bool,
    ) -> usize {
        let scene = self.context.scene();
        let running = self.running_streams(role, scene);
        if running.is_empty() {
            return self.idle_fallback(role, reason, summary, committed);
        }

        let mut failures = 0;
        let mut muted = false;
        let mut activated: Vec<DeviceDescriptor> = Vec::new();

        for stream in &running {
            let snapshot = self.context.snapshot();
            let decision = self.routers.fetch(&RouteRequest::for_stream(stream), &snapshot);
            if decision.is_none() {
                debug!(session_id = stream.session_id, "No router decision, stream left as is");
                continue;
            }

            let target = decision.device;
            if !self.needs_switch(&stream.device, &target) {
                continue;
            }
            info!(
                session_id = stream.session_id,
                from = %stream.device,
                to = %target,
                router = ?decision.router,
                ?reason,
                "Switching stream device"
            );

            if !activated.iter().any(|d| d.same_device(&target)) {
                if let Err(e) = self.activate(&target) {
                    self.flag_failed(&target, &e);
                    failures += 1;
                    continue;
                }
                activated.push(target.clone());
            }

            if role == DeviceRole::Output && !muted {
                muted = self.forced_mute(reason, snapshot.active_for(role), &target, scene);
            }

            if let Err(e) = self.move_stream(stream.session_id, &target) {
                warn!(session_id = stream.session_id, error = %e, "Stream move failed, keeping previous device");
                continue;
            }
            self.collaborators
                .tracker
                .record_device_for_stream(stream.session_id, &target);
            summary.moved += 1;

            if !*committed {
                *committed = true;
                if self.commit_active(role, &target) {
                    summary.active_changed = true;
                }
            }
        }

        failures
    }

    /// Nothing runs: keep the idle default device current
    fn idle_fallback(
        &self,
        role: DeviceRole,
        reason: FetchReason,
        summary: &mut FetchSummary,
        committed: &mut bool,
    ) -> usize {
        let snapshot = self.context.snapshot();
        let decision = self.routers.fetch(&RouteRequest::idle(role), &snapshot);
        if decision.is_none() {
            debug!(?role, "No idle device decision");
            return 0;
        }

        let target = decision.device;
        if !self.needs_switch(snapshot.active_for(role), &target) {
            return 0;
        }
        info!(?role, device = %target, ?reason, "No running stream, updating idle device");

        if let Err(e) = self.activate(&target) {
            self.flag_failed(&target, &e);
            return 1;
        }
        if !*committed {
            *committed = true;
            if self.commit_active(role, &target) {
                summary.active_changed = true;
            }
        }
        0
    }

    fn running_streams(&self, role: DeviceRole, scene: AudioScene) -> Vec<StreamRoutingInfo> {
        let tracker = &self.collaborators.tracker;
        let streams = match role {
            DeviceRole::Input => tracker.snapshot_running_capturer_streams(),
            _ => tracker.snapshot_running_renderer_streams(),
        };
        streams.into_iter().filter(|s| s.is_running(scene)).collect()
    }

    fn running_sessions(&self) -> Vec<OffloadSession> {
        let scene = self.context.scene();
        self.running_streams(DeviceRole::Output, scene)
            .iter()
            .map(OffloadSession::from)
            .collect()
    }

    fn needs_switch(&self, current: &DeviceDescriptor, target: &DeviceDescriptor) -> bool {
        if !target.same_device(current) {
            return true;
        }
        if target.connect_state == ConnectState::DeactiveConnected {
            return true;
        }
        self.context.with_state(|s| s.needs_forced_rehandle(target))
    }

    fn activate(&self, target: &DeviceDescriptor) -> std::result::Result<(), ActivationError> {
        match target.device_type {
            DeviceType::BluetoothA2dp => self.bluetooth.set_active_a2dp(target)?,
            DeviceType::BluetoothSco => {
                self.bluetooth.set_active_sco(target)?;
                // The scene may have been committed before any SCO device existed
                if self.context.scene().is_in_call() {
                    self.sco.resync()?;
                }
            }
            _ => {}
        }
        if target.device_type.is_bluetooth() {
            self.context.with_state(|s| s.registry.mark_profile_active(target));
        }

        if let Some(spec) = self.module_spec(target) {
            let handle = self.open_module(&spec)?;
            self.collaborators.ports.set_port_active(handle, target, true)?;
        }
        Ok(())
    }

    fn flag_failed(&self, target: &DeviceDescriptor, err: &ActivationError) {
        error!(device = %target, error = %err, "Device activation failed, flagging device");
        self.context
            .with_state(|s| s.registry.set_exception_flag(target, true));
    }

    fn move_stream(&self, session_id: u32, target: &DeviceDescriptor) -> std::result::Result<(), PortError> {
        let move_target = if target.is_local() {
            let port = self
                .context
                .with_state(|s| s.port_name_for(target))
                .ok_or_else(|| PortError::MoveFailed {
                    session_id,
                    reason: format!("no port serves {}", target),
                })?;
            MoveTarget::Local { port }
        } else {
            MoveTarget::Remote {
                network_id: target.network_id.clone(),
            }
        };

        self.collaborators.ports.move_stream(session_id, &move_target)?;
        debug!(session_id, target = %move_target, "Stream moved");
        Ok(())
    }

    /// Update the active device of a role. Returns whether it changed.
    fn commit_active(&self, role: DeviceRole, target: &DeviceDescriptor) -> bool {
        let previous = self.context.active_devices().get(role).clone();
        let target = self.context.find_device(target).unwrap_or_else(|| target.clone());
        if previous.same_device(&target) && previous.connect_state == target.connect_state {
            return false;
        }

        if role == DeviceRole::Output
            && previous.device_type == DeviceType::BluetoothA2dp
            && target.device_type != DeviceType::BluetoothA2dp
        {
            let sessions = self.running_sessions();
            self.offload
                .switch_away_from_a2dp(&sessions, |s| s.active.output = target.clone());
        } else {
            self.context.with_state(|s| s.active.set(role, target.clone()));
        }

        info!(?role, from = %previous, to = %target, "Active device updated");
        let dispatcher = &self.collaborators.dispatcher;
        match role {
            DeviceRole::Input => dispatcher.notify_preferred_input_device_changed(&target),
            _ => dispatcher.notify_preferred_output_device_changed(&target),
        }
        true
    }

    /// Mute the losing sink for a moment when its device went away.
    /// Runs on a detached thread so the move never waits on it.
    fn forced_mute(
        &self,
        reason: FetchReason,
        previous: &DeviceDescriptor,
        target: &DeviceDescriptor,
        scene: AudioScene,
    ) -> bool {
        if reason != FetchReason::OldDeviceUnavailable
            || previous.is_none()
            || previous.same_device(target)
            || scene.is_in_call()
        {
            return false;
        }

        let (sink, duration_ms) = self
            .context
            .with_state(|s| (s.port_name_for(previous), s.config.mute_on_device_lost_ms));
        let Some(sink) = sink else {
            return false;
        };
        if duration_ms == 0 {
            return false;
        }

        let ports = Arc::clone(&self.collaborators.ports);
        let spawned = thread::Builder::new()
            .name("conductor-mute".to_string())
            .spawn(move || {
                if let Err(e) = ports.set_sink_mute(&sink, true) {
                    warn!(sink = %sink, error = %e, "Forced mute failed");
                    return;
                }
                thread::sleep(Duration::from_millis(duration_ms));
                if let Err(e) = ports.set_sink_mute(&sink, false) {
                    warn!(sink = %sink, error = %e, "Forced unmute failed");
                }
            });

        match spawned {
            Ok(_) => {
                debug!(duration_ms, "Forced mute of lost sink started");
                true
            }
            Err(e) => {
                warn!(error = %e, "Could not spawn forced mute thread");
                false
            }
        }
    }

    /// Re-negotiate offload; a release of offload re-runs the output fetch
    /// once, without another offload refresh
    fn refresh_offload(&self) -> OffloadOutcome {
        let sessions = self.running_sessions();
        let outcome = self.offload.on_active_sessions_changed(&sessions);
        if outcome == OffloadOutcome::RefetchRequired {
            info!("Offload released, re-fetching output devices");
            self.fetch_role(DeviceRole::Output, FetchReason::OffloadChanged);
        }
        outcome
    }

    // --- hardware modules ---

    fn module_spec(&self, device: &DeviceDescriptor) -> Option<ModuleSpec> {
        if !device.is_local() {
            return Some(ModuleSpec::remote(&device.network_id, device.role));
        }
        self.context
            .config()
            .module_for(device.device_type, device.role)
            .cloned()
    }

    fn open_module(&self, spec: &ModuleSpec) -> std::result::Result<PortHandle, PortError> {
        if let Some(handle) = self.context.with_state(|s| s.open_ports.get(&spec.name).copied()) {
            return Ok(handle);
        }

        let handle = self.collaborators.ports.open_port(spec)?;
        info!(port = %spec.name, handle, class = ?spec.class, "Module port opened");
        self.context
            .with_state(|s| s.open_ports.insert(spec.name.clone(), handle));
        Ok(handle)
    }

    fn unload_unused_a2dp(&self) {
        let closing: Vec<(String, PortHandle)> = self.context.with_state(|s| {
            if s.registry.iter().any(|d| d.device_type == DeviceType::BluetoothA2dp) {
                return Vec::new();
            }
            let names: Vec<String> = s
                .config
                .modules_of(ModuleClass::A2dp)
                .map(|m| m.name.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|name| s.open_ports.remove(&name).map(|h| (name, h)))
                .collect()
        });

        self.close_ports(closing);
    }

    /// Close the ports of a network node once none of its devices remain
    fn unload_unused_remote(&self, network_id: &str) {
        let closing: Vec<(String, PortHandle)> = self.context.with_state(|s| {
            if s.registry.iter().any(|d| d.network_id == network_id) {
                return Vec::new();
            }
            [DeviceRole::Output, DeviceRole::Input]
                .into_iter()
                .map(|role| ModuleSpec::remote(network_id, role).name)
                .filter_map(|name| s.open_ports.remove(&name).map(|h| (name, h)))
                .collect()
        });
        self.close_ports(closing);
    }

    fn close_ports(&self, ports: Vec<(String, PortHandle)>) {
        for (name, handle) in ports {
            match self.collaborators.ports.close_port(handle) {
                Ok(()) => info!(port = %name, "Module port closed"),
                Err(e) => warn!(port = %name, error = %e, "Failed to close module port"),
            }
        }
    }

    /// No fallback was found for a removed active device: point at none
    fn clear_dangling_active(&self, removed: &[DeviceDescriptor]) {
        let active = self.context.active_devices();
        let dispatcher = &self.collaborators.dispatcher;

        if removed.iter().any(|d| d.same_device(&active.output)) {
            if active.output.device_type == DeviceType::BluetoothA2dp {
                let sessions = self.running_sessions();
                self.offload
                    .switch_away_from_a2dp(&sessions, |s| s.active.output = DeviceDescriptor::none());
            } else {
                self.context
                    .with_state(|s| s.active.output = DeviceDescriptor::none());
            }
            warn!(device = %active.output, "Active output removed without replacement");
            dispatcher.notify_preferred_output_device_changed(&DeviceDescriptor::none());
        }

        if removed.iter().any(|d| d.same_device(&active.input)) {
            self.context
                .with_state(|s| s.active.input = DeviceDescriptor::none());
            warn!(device = %active.input, "Active input removed without replacement");
            dispatcher.notify_preferred_input_device_changed(&DeviceDescriptor::none());
        }
    }
}

impl Drop for DeviceFetchOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
