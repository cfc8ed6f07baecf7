//! Scripted scenarios on the simulated platform

use clap::ValueEnum;
use conductor_core::domain::{
    AudioScene, DeviceDescriptor, DeviceFetchOrchestrator, DeviceRole, DeviceType, OffloadState,
    PolicyConfig, SourceType, StreamRoutingInfo, StreamUsage, LOCAL_NETWORK_ID,
};
use conductor_infra::SimulatedPlatform;
use serde::Serialize;

const HEADSET_MAC: &str = "00:1A:7D:DA:71:13";
const MUSIC_SESSION: u32 = 100;
const CALL_SESSION: u32 = 101;
const MIC_SESSION: u32 = 102;
const APP_UID: i32 = 10_042;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Music moves to a Bluetooth headset when it connects
    A2dpConnect,
    /// Headset activation fails, music stays on the speaker
    A2dpFailure,
    /// Incoming call routed to the SCO headset
    PhoneCall,
    /// Nothing plays; the idle device follows plug and unplug
    Idle,
    /// Spatialized music engages hardware offload, then disconnects
    Offload,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub active_output: DeviceDescriptor,
    pub active_input: DeviceDescriptor,
    pub offload: OffloadState,
    pub scene: AudioScene,
    pub calls: Vec<String>,
}

impl ScenarioReport {
    pub fn print(&self) {
        println!("Scenario: {:?}", self.scenario);
        println!("  active output: {}", self.active_output);
        println!("  active input:  {}", self.active_input);
        println!("  offload:       {:?}", self.offload);
        println!("  scene:         {:?}", self.scene);
        println!("Collaborator calls:");
        for (i, call) in self.calls.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, call);
        }
    }
}

fn headset(device_type: DeviceType) -> DeviceDescriptor {
    DeviceDescriptor::bluetooth(device_type, DeviceRole::Output, HEADSET_MAC).with_name("Headset")
}

pub fn run(scenario: Scenario, config: PolicyConfig) -> anyhow::Result<ScenarioReport> {
    let platform = SimulatedPlatform::new();
    let orchestrator = DeviceFetchOrchestrator::new(config, platform.collaborators());
    orchestrator.init()?;

    let speaker = DeviceDescriptor::new(DeviceType::Speaker, DeviceRole::Output);
    let mic = DeviceDescriptor::new(DeviceType::Mic, DeviceRole::Input);
    orchestrator.on_device_connected(speaker)?;
    orchestrator.on_device_connected(mic)?;
    platform.log.clear();

    match scenario {
        Scenario::A2dpConnect => {
            platform
                .tracker
                .add(StreamRoutingInfo::renderer(MUSIC_SESSION, APP_UID, StreamUsage::Music));
            orchestrator.on_stream_changed()?;
            orchestrator.on_device_connected(headset(DeviceType::BluetoothA2dp))?;
        }
        Scenario::A2dpFailure => {
            platform
                .tracker
                .add(StreamRoutingInfo::renderer(MUSIC_SESSION, APP_UID, StreamUsage::Music));
            orchestrator.on_stream_changed()?;
            platform.bluetooth.fail_a2dp_activation(HEADSET_MAC, true);
            orchestrator.on_device_connected(headset(DeviceType::BluetoothA2dp))?;
        }
        Scenario::PhoneCall => {
            orchestrator.on_device_connected(headset(DeviceType::BluetoothSco))?;
            orchestrator.on_device_connected(
                DeviceDescriptor::bluetooth(DeviceType::BluetoothSco, DeviceRole::Input, HEADSET_MAC),
            )?;
            platform.tracker.add(StreamRoutingInfo::renderer(
                CALL_SESSION,
                APP_UID,
                StreamUsage::VoiceModemCommunication,
            ));
            platform
                .tracker
                .add(StreamRoutingInfo::capturer(MIC_SESSION, APP_UID, SourceType::VoiceCommunication));
            orchestrator.set_audio_scene(AudioScene::Ringing)?;
            orchestrator.set_audio_scene(AudioScene::PhoneCall)?;
        }
        Scenario::Idle => {
            let wired = DeviceDescriptor::new(DeviceType::WiredHeadset, DeviceRole::Output);
            orchestrator.on_device_connected(wired)?;
            orchestrator.on_device_disconnected(DeviceType::WiredHeadset, "", LOCAL_NETWORK_ID)?;
        }
        Scenario::Offload => {
            let mut music = StreamRoutingInfo::renderer(MUSIC_SESSION, APP_UID, StreamUsage::Music);
            music.spatialization_enabled = true;
            platform.tracker.add(music);
            orchestrator.on_device_connected(headset(DeviceType::BluetoothA2dp))?;
            orchestrator.on_active_sessions_changed()?;
            orchestrator.on_device_disconnected(
                DeviceType::BluetoothA2dp,
                HEADSET_MAC,
                LOCAL_NETWORK_ID,
            )?;
        }
    }

    Ok(ScenarioReport {
        scenario,
        active_output: orchestrator.active_output(),
        active_input: orchestrator.active_input(),
        offload: orchestrator.offload_state(),
        scene: orchestrator.scene(),
        calls: platform.log.snapshot().iter().map(ToString::to_string).collect(),
    })
}
