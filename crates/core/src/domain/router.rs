//! Router chain
//!
//! Each [`RouterKind`] is a pure strategy over a [`RoutingSnapshot`]: it
//! either names a device or declines. The chain walks a fixed,
//! category-specific order and the first strategy that names a device wins.
//! When every strategy declines the result is the none sentinel, which
//! callers treat as "leave routing unchanged".

use crate::domain::config::{DeviceUsage, PolicyConfig};
use crate::domain::context::{ActiveDevices, UserPreferences};
use crate::domain::device::{DeviceCategory, DeviceDescriptor, DeviceRole, DeviceType};
use crate::domain::registry::DeviceRegistry;
use crate::domain::stream::{
    AudioScene, RouterCategory, SourceType, StreamKind, StreamRoutingInfo, StreamUsage,
    NO_CLIENT_UID,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How a distributed cast routes local streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CastType {
    #[default]
    Null,
    /// Every stream follows the cast
    All,
    /// Music playback and mic capture follow the cast
    Projection,
    /// Capture is borrowed from the cooperating node
    Cooperation,
}

/// Distributed routing set by the cast/collaboration service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedRoutingInfo {
    pub descriptor: DeviceDescriptor,
    pub cast_type: CastType,
}

/// Immutable view the strategies decide on
#[derive(Debug, Clone)]
pub struct RoutingSnapshot {
    pub registry: DeviceRegistry,
    pub preferences: UserPreferences,
    pub scene: AudioScene,
    pub active: ActiveDevices,
    pub distributed: Option<DistributedRoutingInfo>,
    pub config: Arc<PolicyConfig>,
}

impl RoutingSnapshot {
    /// Empty snapshot over a configuration
    pub fn new(config: Arc<PolicyConfig>) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            preferences: UserPreferences::default(),
            scene: AudioScene::Default,
            active: ActiveDevices::default(),
            distributed: None,
            config,
        }
    }

    pub fn with_device(mut self, device: DeviceDescriptor) -> Self {
        self.registry.add_device(device);
        self
    }

    pub fn with_scene(mut self, scene: AudioScene) -> Self {
        self.scene = scene;
        self
    }

    pub fn active_for(&self, role: DeviceRole) -> &DeviceDescriptor {
        match role {
            DeviceRole::Input => &self.active.input,
            _ => &self.active.output,
        }
    }

    /// Media, ring and tone requests go through the call ordering while a
    /// call is up, or while ringing toward an SCO headset.
    pub fn media_redirected_to_call(&self) -> bool {
        match self.scene {
            AudioScene::PhoneCall | AudioScene::PhoneChat => true,
            AudioScene::Ringing => self
                .registry
                .privacy_devices(&self.config, DeviceRole::Output, DeviceUsage::Voice)
                .iter()
                .any(|d| d.device_type == DeviceType::BluetoothSco),
            AudioScene::Default => false,
        }
    }
}

/// One fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteRequest {
    pub kind: StreamKind,
    pub client_uid: i32,
}

impl RouteRequest {
    pub fn render(usage: StreamUsage, client_uid: i32) -> Self {
        Self {
            kind: StreamKind::Render(usage),
            client_uid,
        }
    }

    pub fn capture(source: SourceType, client_uid: i32) -> Self {
        Self {
            kind: StreamKind::Capture(source),
            client_uid,
        }
    }

    pub fn for_stream(stream: &StreamRoutingInfo) -> Self {
        Self {
            kind: stream.kind,
            client_uid: stream.client_uid,
        }
    }

    /// Idle fallback request for a role, with no owning client
    pub fn idle(role: DeviceRole) -> Self {
        match role {
            DeviceRole::Input => Self::capture(SourceType::Mic, NO_CLIENT_UID),
            _ => Self::render(StreamUsage::Media, NO_CLIENT_UID),
        }
    }

    pub fn category(&self) -> RouterCategory {
        self.kind.router_category()
    }

    pub fn role(&self) -> DeviceRole {
        match self.kind {
            StreamKind::Render(_) => DeviceRole::Output,
            StreamKind::Capture(_) => DeviceRole::Input,
        }
    }
}

fn usage_of(category: RouterCategory) -> DeviceUsage {
    match category {
        RouterCategory::CallRender | RouterCategory::CallCapture => DeviceUsage::Voice,
        RouterCategory::MediaRender | RouterCategory::RecordCapture => DeviceUsage::Media,
    }
}

fn role_of(category: RouterCategory) -> DeviceRole {
    match category {
        RouterCategory::MediaRender | RouterCategory::CallRender => DeviceRole::Output,
        RouterCategory::RecordCapture | RouterCategory::CallCapture => DeviceRole::Input,
    }
}

/// Routing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterKind {
    UserSelect,
    PrivacyPriority,
    PublicPriority,
    StreamFilter,
    CockpitPhone,
    PairedDevice,
    Default,
    /// Index into the chain's custom router table
    Custom(usize),
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterKind::Custom(index) => write!(f, "Custom#{}", index),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Winning device and the strategy that named it
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub device: DeviceDescriptor,
    pub router: Option<RouterKind>,
}

impl RouteDecision {
    pub fn none() -> Self {
        Self {
            device: DeviceDescriptor::none(),
            router: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.device.is_none()
    }
}

/// Extension strategy registered at runtime
pub type CustomRouter =
    Box<dyn Fn(RouterCategory, &RouteRequest, &RoutingSnapshot) -> Option<DeviceDescriptor> + Send + Sync>;

/// Ordered strategies per router category
pub struct RouterChain {
    orders: HashMap<RouterCategory, Vec<RouterKind>>,
    custom: Vec<(String, CustomRouter)>,
}

impl Default for RouterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterChain")
            .field("orders", &self.orders)
            .field("custom", &self.custom.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl RouterChain {
    pub fn new() -> Self {
        use RouterKind::*;

        let mut orders = HashMap::new();
        orders.insert(
            RouterCategory::MediaRender,
            vec![UserSelect, PrivacyPriority, PublicPriority, StreamFilter, Default],
        );
        orders.insert(
            RouterCategory::CallRender,
            vec![UserSelect, PrivacyPriority, CockpitPhone, Default],
        );
        orders.insert(
            RouterCategory::RecordCapture,
            vec![UserSelect, PrivacyPriority, PublicPriority, StreamFilter, Default],
        );
        orders.insert(
            RouterCategory::CallCapture,
            vec![UserSelect, PairedDevice, PrivacyPriority, CockpitPhone, Default],
        );

        Self {
            orders,
            custom: Vec::new(),
        }
    }

    pub fn order(&self, category: RouterCategory) -> &[RouterKind] {
        self.orders.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Register an extension strategy, consulted just before the default
    /// router of `category`
    pub fn register_custom(
        &mut self,
        name: &str,
        category: RouterCategory,
        router: CustomRouter,
    ) -> RouterKind {
        let kind = RouterKind::Custom(self.custom.len());
        self.custom.push((name.to_string(), router));

        let order = self.orders.entry(category).or_default();
        let position = order
            .iter()
            .position(|k| *k == RouterKind::Default)
            .unwrap_or(order.len());
        order.insert(position, kind);
        kind
    }

    /// Route a request, applying the in-call redirect for media usages
    pub fn fetch(&self, request: &RouteRequest, snapshot: &RoutingSnapshot) -> RouteDecision {
        let category = request.category();

        if category == RouterCategory::MediaRender && snapshot.media_redirected_to_call() {
            if let Some(device) = self.evaluate(RouterKind::StreamFilter, category, request, snapshot) {
                debug!(device = %device, "In-call media kept by stream filter");
                return RouteDecision {
                    device,
                    router: Some(RouterKind::StreamFilter),
                };
            }

            let call_usage = if snapshot.scene == AudioScene::PhoneCall {
                StreamUsage::VoiceModemCommunication
            } else {
                StreamUsage::VoiceCommunication
            };
            debug!(scene = ?snapshot.scene, usage = ?call_usage, "Redirecting media to call ordering");
            let redirected = RouteRequest::render(call_usage, request.client_uid);
            return self.fetch_category(RouterCategory::CallRender, &redirected, snapshot);
        }

        self.fetch_category(category, request, snapshot)
    }

    /// Walk one category's ordering without the redirect
    pub fn fetch_category(
        &self,
        category: RouterCategory,
        request: &RouteRequest,
        snapshot: &RoutingSnapshot,
    ) -> RouteDecision {
        for kind in self.order(category) {
            if let Some(device) = self.evaluate(*kind, category, request, snapshot) {
                if device.is_none() {
                    continue;
                }
                debug!(router = %kind, device = %device, ?category, "Router decided");
                return RouteDecision {
                    device,
                    router: Some(*kind),
                };
            }
        }
        debug!(?category, "No router decided");
        RouteDecision::none()
    }

    pub fn evaluate(
        &self,
        kind: RouterKind,
        category: RouterCategory,
        request: &RouteRequest,
        snapshot: &RoutingSnapshot,
    ) -> Option<DeviceDescriptor> {
        match kind {
            RouterKind::UserSelect => user_select(category, snapshot),
            RouterKind::PrivacyPriority => privacy_priority(category, snapshot),
            RouterKind::PublicPriority => public_priority(category, snapshot),
            RouterKind::StreamFilter => stream_filter(request, snapshot),
            RouterKind::CockpitPhone => cockpit_phone(category, snapshot),
            RouterKind::PairedDevice => paired_device(snapshot),
            RouterKind::Default => default_priority(category, snapshot),
            RouterKind::Custom(index) => self
                .custom
                .get(index)
                .and_then(|(_, router)| router(category, request, snapshot)),
        }
    }
}

fn user_select(category: RouterCategory, snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    let preferred = snapshot.preferences.get(category)?;
    snapshot
        .registry
        .find(preferred)
        .filter(|d| d.is_selectable())
        .cloned()
}

fn privacy_priority(category: RouterCategory, snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    let candidates = snapshot.registry.privacy_devices(
        &snapshot.config,
        role_of(category),
        usage_of(category),
    );
    // A2DP cannot carry call audio and SCO is idle outside calls
    let candidates = candidates.iter().filter(|d| match category {
        RouterCategory::MediaRender | RouterCategory::RecordCapture => {
            d.device_type != DeviceType::BluetoothSco || snapshot.scene.is_in_call()
        }
        _ => d.device_type != DeviceType::BluetoothA2dp,
    });
    DeviceRegistry::latest_connected(candidates)
}

fn public_priority(category: RouterCategory, snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    let candidates = snapshot.registry.public_devices(
        &snapshot.config,
        role_of(category),
        usage_of(category),
    );
    DeviceRegistry::latest_connected(&candidates)
}

fn stream_filter(request: &RouteRequest, snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    let info = snapshot.distributed.as_ref()?;

    let follows_cast = match (info.cast_type, request.kind) {
        (CastType::Null, _) => false,
        (CastType::All, _) => true,
        (CastType::Projection, StreamKind::Render(usage)) => usage == StreamUsage::Music,
        (CastType::Projection, StreamKind::Capture(source)) => source == SourceType::Mic,
        (CastType::Cooperation, StreamKind::Capture(_)) => true,
        (CastType::Cooperation, StreamKind::Render(_)) => false,
    };
    if !follows_cast {
        return None;
    }

    let role = request.role();
    snapshot
        .registry
        .remote_devices(role)
        .into_iter()
        .find(|d| d.network_id == info.descriptor.network_id && d.device_type == info.descriptor.device_type)
}

fn cockpit_phone(category: RouterCategory, snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    if !snapshot.scene.is_in_call() {
        return None;
    }
    let role = role_of(category);
    let cars = snapshot
        .registry
        .selectable(role)
        .filter(|d| d.category == DeviceCategory::Car);
    DeviceRegistry::latest_connected(cars)
}

fn paired_device(snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    let output = &snapshot.active.output;
    if output.is_none() || output.mac_address.is_empty() {
        return None;
    }
    snapshot
        .registry
        .selectable(DeviceRole::Input)
        .find(|d| d.same_device(output))
        .cloned()
}

fn default_priority(category: RouterCategory, snapshot: &RoutingSnapshot) -> Option<DeviceDescriptor> {
    let role = role_of(category);
    let in_call = snapshot.scene.is_in_call();
    let config = &snapshot.config;

    let order: Vec<DeviceType> = match category {
        RouterCategory::MediaRender => config
            .output_priority
            .iter()
            .copied()
            .filter(|t| match t {
                DeviceType::BluetoothA2dp => !in_call,
                DeviceType::BluetoothSco => in_call,
                _ => true,
            })
            .collect(),
        RouterCategory::CallRender => {
            let mut order: Vec<DeviceType> = config
                .output_priority
                .iter()
                .copied()
                .filter(|t| !matches!(t, DeviceType::BluetoothA2dp | DeviceType::Earpiece))
                .collect();
            let speaker = order
                .iter()
                .position(|t| *t == DeviceType::Speaker)
                .unwrap_or(order.len());
            order.insert(speaker, DeviceType::Earpiece);
            order
        }
        RouterCategory::RecordCapture => config
            .input_priority
            .iter()
            .copied()
            .filter(|t| *t != DeviceType::BluetoothSco || in_call)
            .collect(),
        RouterCategory::CallCapture => config
            .input_priority
            .iter()
            .copied()
            .filter(|t| *t != DeviceType::BluetoothA2dp)
            .collect(),
    };

    order.into_iter().find_map(|device_type| {
        let matches = snapshot
            .registry
            .selectable(role)
            .filter(|d| d.device_type == device_type && d.is_local());
        DeviceRegistry::latest_connected(matches)
    })
}
