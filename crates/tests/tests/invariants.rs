//! Cross-cutting guarantees: idempotent fetches, SCO sequencing, the
//! offload/active-output coupling and disconnect cleanup

use conductor_core::domain::{
    AudioScene, ConnectState, DeviceDescriptor, DeviceRole, DeviceType, FetchReason, FetchSummary,
    GateDecision, OffloadOutcome, OffloadState, PolicyConfig, PolicyError, RouterCategory,
    ScoCategory, ScoError, SourceType, StreamRoutingInfo, StreamUsage,
};
use conductor_infra::SimCall;
use conductor_tests::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// IDEMPOTENCE
// ============================================================================

#[test]
fn test_repeated_fetch_is_silent() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    harness.record(2, SourceType::Mic);
    harness.clear_log();

    let first = harness.orchestrator.fetch_output_devices(FetchReason::StreamChanged);
    let second = harness.orchestrator.fetch_output_devices(FetchReason::StreamChanged);
    let input = harness.orchestrator.fetch_input_devices(FetchReason::StreamChanged);

    assert_eq!(first, FetchSummary::default());
    assert_eq!(second, FetchSummary::default());
    assert_eq!(input, FetchSummary::default());
    assert!(harness.calls().is_empty());
}

#[test]
fn test_unchanged_offload_request_makes_no_transition_calls() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play_spatial(1);
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::A2dpOffload);
    harness.clear_log();

    let outcome = harness.orchestrator.on_active_sessions_changed().unwrap();

    assert_eq!(outcome, OffloadOutcome::Unchanged);
    assert_eq!(harness.calls(), vec![SimCall::RequestOffloadSession(vec![1])]);
}

#[test]
fn test_same_scene_is_noop() {
    let harness = PolicyHarness::new();
    harness
        .orchestrator
        .set_audio_scene(AudioScene::Default)
        .unwrap();
    assert!(harness.calls().is_empty());
}

// ============================================================================
// SCO SEQUENCING
// ============================================================================

fn sco_harness() -> PolicyHarness {
    let harness = PolicyHarness::new();
    harness.connect(sco(HEADSET_MAC, DeviceRole::Output));
    harness.connect(sco(HEADSET_MAC, DeviceRole::Input));
    harness.clear_log();
    harness
}

fn sco_calls(harness: &PolicyHarness) -> Vec<SimCall> {
    harness
        .calls()
        .into_iter()
        .filter(|c| matches!(c, SimCall::ConnectSco(_) | SimCall::DisconnectSco(_)))
        .collect()
}

#[test]
fn test_sco_disconnect_precedes_connect() {
    let harness = sco_harness();
    let orchestrator = &harness.orchestrator;

    orchestrator.set_audio_scene(AudioScene::PhoneCall).unwrap();
    orchestrator.set_audio_scene(AudioScene::PhoneChat).unwrap();
    orchestrator.set_audio_scene(AudioScene::Default).unwrap();

    assert_eq!(
        sco_calls(&harness),
        vec![
            SimCall::ConnectSco(ScoCategory::Cellular),
            SimCall::DisconnectSco(ScoCategory::Cellular),
            SimCall::ConnectSco(ScoCategory::Virtual),
            SimCall::DisconnectSco(ScoCategory::Virtual),
        ]
    );
    assert_eq!(orchestrator.context().sco_category(), ScoCategory::Default);
}

#[test]
fn test_failed_sco_disconnect_aborts_scene_change() {
    let harness = sco_harness();
    let orchestrator = &harness.orchestrator;
    orchestrator.set_audio_scene(AudioScene::PhoneCall).unwrap();
    harness.platform.bluetooth.fail_sco_disconnect(true);
    harness.clear_log();

    let err = orchestrator
        .set_audio_scene(AudioScene::PhoneChat)
        .unwrap_err();

    assert!(matches!(
        err,
        PolicyError::Sco(ScoError::DisconnectFailed { category: ScoCategory::Cellular, .. })
    ));
    assert_eq!(sco_calls(&harness), vec![SimCall::DisconnectSco(ScoCategory::Cellular)]);
    assert_eq!(orchestrator.scene(), AudioScene::PhoneCall);
    assert_eq!(orchestrator.context().sco_category(), ScoCategory::Cellular);
}

#[test]
fn test_ringing_needs_in_band_ringing_for_sco() {
    let harness = sco_harness();
    harness
        .orchestrator
        .set_audio_scene(AudioScene::Ringing)
        .unwrap();
    assert!(sco_calls(&harness).is_empty());
    assert_eq!(harness.orchestrator.scene(), AudioScene::Ringing);

    let in_band = sco_harness();
    in_band.platform.bluetooth.set_in_band_ringing(true);
    in_band
        .orchestrator
        .set_audio_scene(AudioScene::Ringing)
        .unwrap();
    assert_eq!(sco_calls(&in_band), vec![SimCall::ConnectSco(ScoCategory::Cellular)]);
}

#[test]
fn test_sco_removal_drops_link() {
    let harness = sco_harness();
    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();
    assert_eq!(harness.output_type(), DeviceType::BluetoothSco);

    harness.disconnect(&sco(HEADSET_MAC, DeviceRole::Output));

    assert!(harness
        .calls()
        .contains(&SimCall::DisconnectSco(ScoCategory::Cellular)));
    assert_eq!(harness.orchestrator.context().sco_category(), ScoCategory::Default);
    assert_ne!(harness.output_type(), DeviceType::BluetoothSco);
    assert_ne!(harness.input_type(), DeviceType::BluetoothSco);
}

#[test]
fn test_headset_joining_call_brings_up_sco_link() {
    let harness = PolicyHarness::new();
    harness.connect(earpiece());
    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();
    harness.platform.tracker.add(StreamRoutingInfo::renderer(
        1,
        APP_UID,
        StreamUsage::VoiceModemCommunication,
    ));
    harness.orchestrator.on_stream_changed().unwrap();
    assert_eq!(harness.stream_device(1), Some(DeviceType::Earpiece));
    harness.clear_log();

    harness.connect(sco(HEADSET_MAC, DeviceRole::Output));

    assert_eq!(harness.stream_device(1), Some(DeviceType::BluetoothSco));
    assert_eq!(harness.platform.bluetooth.connected_sco(), Some(ScoCategory::Cellular));
    assert_eq!(harness.orchestrator.context().sco_category(), ScoCategory::Cellular);
    let calls = harness.calls();
    let activated = calls
        .iter()
        .position(|c| *c == SimCall::SetActiveSco(HEADSET_MAC.to_string()))
        .expect("sco activated");
    let linked = calls
        .iter()
        .position(|c| *c == SimCall::ConnectSco(ScoCategory::Cellular))
        .expect("sco linked");
    let moved = calls
        .iter()
        .position(|c| matches!(c, SimCall::MoveStream { session_id: 1, .. }))
        .expect("call moved");
    assert!(activated < linked);
    assert!(linked < moved);

    harness.clear_log();
    harness
        .orchestrator
        .set_audio_scene(AudioScene::Default)
        .unwrap();

    assert_eq!(sco_calls(&harness), vec![SimCall::DisconnectSco(ScoCategory::Cellular)]);
    assert_eq!(harness.platform.bluetooth.connected_sco(), None);
}

#[test]
fn test_sco_link_drop_reactivates_headset() {
    let harness = sco_harness();
    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();
    assert_eq!(harness.output_type(), DeviceType::BluetoothSco);
    harness.clear_log();

    harness
        .orchestrator
        .on_sco_state_changed(HEADSET_MAC, false)
        .unwrap();

    let output = sco(HEADSET_MAC, DeviceRole::Output);
    assert!(harness
        .registry_entry(&output)
        .is_some_and(|d| d.connect_state == ConnectState::DeactiveConnected));
    assert_eq!(harness.output_type(), DeviceType::BluetoothSco);
    assert_eq!(
        harness.orchestrator.active_output().connect_state,
        ConnectState::DeactiveConnected
    );
    assert!(harness
        .calls()
        .contains(&SimCall::SetActiveSco(HEADSET_MAC.to_string())));

    let err = harness
        .orchestrator
        .on_sco_state_changed(OTHER_MAC, true)
        .unwrap_err();
    assert!(matches!(err, PolicyError::DeviceNotFound(_)));
}

#[test]
fn test_call_capture_follows_newly_active_output() {
    let harness = PolicyHarness::new();
    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();
    harness.connect(sco(HEADSET_MAC, DeviceRole::Input));
    harness.connect(sco(OTHER_MAC, DeviceRole::Input));
    harness.record(2, SourceType::VoiceCommunication);
    assert_eq!(harness.orchestrator.active_input().mac_address, OTHER_MAC);

    harness.connect(sco(HEADSET_MAC, DeviceRole::Output));

    assert_eq!(harness.orchestrator.active_output().mac_address, HEADSET_MAC);
    assert_eq!(harness.orchestrator.active_input().mac_address, HEADSET_MAC);
    assert!(harness
        .platform
        .tracker
        .stream(2)
        .is_some_and(|s| s.device.mac_address == HEADSET_MAC));
}

// ============================================================================
// OFFLOAD COUPLING
// ============================================================================

#[test]
fn test_switch_away_drains_offload_first() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play_spatial(1);
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::A2dpOffload);
    harness.clear_log();

    harness.connect(wired_headset());

    assert_eq!(harness.output_type(), DeviceType::WiredHeadset);
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::NoA2dpDevice);

    let calls = harness.calls();
    let stop = calls
        .iter()
        .position(|c| *c == SimCall::OffloadStopPlaying(vec![1]))
        .expect("offload drained");
    let notified = calls
        .iter()
        .position(|c| *c == SimCall::NotifyPreferredOutput(DeviceType::WiredHeadset))
        .expect("output notified");
    assert!(stop < notified);
    assert!(!harness.platform.ports.is_suspended("Bt_Speaker"));
}

#[test]
fn test_offload_never_observed_without_a2dp_output() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play_spatial(1);

    let context = Arc::clone(harness.orchestrator.context());
    let done = Arc::new(AtomicBool::new(false));
    let observer_done = Arc::clone(&done);
    let observer = thread::spawn(move || {
        let mut violations = 0;
        while !observer_done.load(Ordering::SeqCst) {
            let (offload, output) = context.with_state(|s| (s.offload.current, s.active.output.device_type));
            if offload == OffloadState::A2dpOffload && output != DeviceType::BluetoothA2dp {
                violations += 1;
            }
        }
        violations
    });

    for _ in 0..20 {
        harness.connect(wired_headset());
        harness.disconnect_local(DeviceType::WiredHeadset);
        harness.orchestrator.on_active_sessions_changed().unwrap();
    }

    done.store(true, Ordering::SeqCst);
    assert_eq!(observer.join().unwrap(), 0);
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
}

#[test]
fn test_offload_not_negotiated_without_a2dp_output() {
    let harness = PolicyHarness::new();
    harness.play_spatial(1);
    harness.platform.bluetooth.offer_offload(Some(OffloadState::A2dpOffload));

    let outcome = harness.orchestrator.on_active_sessions_changed().unwrap();

    assert_eq!(outcome, OffloadOutcome::Unchanged);
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::NoA2dpDevice);
    assert!(!harness
        .calls()
        .iter()
        .any(|c| matches!(c, SimCall::RequestOffloadSession(_))));
}

// ============================================================================
// DISCONNECT
// ============================================================================

#[test]
fn test_a2dp_disconnect_falls_back_and_unloads_module() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    assert_eq!(harness.location(1), Some(port("Bt_Speaker")));
    harness.clear_log();

    harness.disconnect(&a2dp(HEADSET_MAC));

    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::NoA2dpDevice);
    assert!(!harness.platform.ports.is_open("Bt_Speaker"));

    let calls = harness.calls();
    let moved = calls
        .iter()
        .position(|c| *c == SimCall::MoveStream { session_id: 1, target: port("Speaker") })
        .expect("stream moved");
    let closed = calls
        .iter()
        .position(|c| *c == SimCall::ClosePort("Bt_Speaker".to_string()))
        .expect("module closed");
    assert!(moved < closed);
    assert_eq!(
        calls[0],
        SimCall::NotifyDeviceList { count: 1, connected: false }
    );
}

#[test]
fn test_module_kept_while_another_a2dp_remains() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.connect(a2dp(OTHER_MAC));

    harness.disconnect(&a2dp(HEADSET_MAC));

    assert!(harness.platform.ports.is_open("Bt_Speaker"));
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
    assert_eq!(harness.orchestrator.active_output().mac_address, OTHER_MAC);
}

#[test]
fn test_removed_active_without_fallback_points_at_none() {
    let harness = PolicyHarness::bare(quiet_config());
    harness.connect(a2dp(HEADSET_MAC));
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
    harness.clear_log();

    harness.disconnect(&a2dp(HEADSET_MAC));

    assert_eq!(harness.output_type(), DeviceType::None);
    assert!(harness
        .calls()
        .contains(&SimCall::NotifyPreferredOutput(DeviceType::None)));
}

#[test]
fn test_unknown_disconnect_is_an_error() {
    let harness = PolicyHarness::new();
    let err = harness
        .orchestrator
        .on_device_disconnected(DeviceType::BluetoothA2dp, OTHER_MAC, "LocalDevice")
        .unwrap_err();
    assert!(matches!(err, PolicyError::DeviceNotFound(_)));
}

#[test]
fn test_lost_device_mutes_old_sink_briefly() {
    let config = PolicyConfig {
        mute_on_device_lost_ms: 20,
        ..PolicyConfig::factory_default()
    };
    let harness = PolicyHarness::with_config(config);
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    harness.clear_log();

    harness.disconnect(&a2dp(HEADSET_MAC));

    let unmute = SimCall::SetSinkMute { sink: "Bt_Speaker".to_string(), mute: false };
    let deadline = Instant::now() + Duration::from_secs(2);
    while !harness.calls().contains(&unmute) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let calls = harness.calls();
    assert!(calls.contains(&SimCall::SetSinkMute { sink: "Bt_Speaker".to_string(), mute: true }));
    assert!(calls.contains(&unmute));
}

// ============================================================================
// SAFE VOLUME
// ============================================================================

#[test]
fn test_safe_volume_answer_unblocks_waiter() {
    let harness = PolicyHarness::new();
    let orchestrator = &harness.orchestrator;

    let decision = thread::scope(|scope| {
        let waiter = scope.spawn(|| orchestrator.wait_for_safe_volume());
        thread::sleep(Duration::from_millis(10));
        orchestrator.resolve_safe_volume(false);
        waiter.join().unwrap()
    });

    assert_eq!(decision, GateDecision::Rejected);
}

#[test]
fn test_safe_volume_times_out_per_config() {
    let harness = PolicyHarness::with_config(PolicyConfig {
        safe_volume_timeout_secs: 0,
        ..quiet_config()
    });
    assert_eq!(harness.orchestrator.wait_for_safe_volume(), GateDecision::TimedOut);
}

// ============================================================================
// USER SELECTION AND MOVES
// ============================================================================

#[test]
fn test_user_selection_wins_until_cleared() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    let orchestrator = &harness.orchestrator;

    orchestrator
        .select_output_device(RouterCategory::MediaRender, speaker())
        .unwrap();
    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));

    orchestrator
        .select_output_device(RouterCategory::MediaRender, DeviceDescriptor::none())
        .unwrap();
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
}

#[test]
fn test_selection_dropped_with_device() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.connect(wired_headset());
    harness.play(1, StreamUsage::Music);
    harness
        .orchestrator
        .select_output_device(RouterCategory::MediaRender, a2dp(HEADSET_MAC))
        .unwrap();
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);

    harness.disconnect(&a2dp(HEADSET_MAC));
    harness.connect(a2dp(HEADSET_MAC));
    harness.connect(wired_headset());

    // The old selection no longer pins the headset
    assert_eq!(harness.output_type(), DeviceType::WiredHeadset);
}

#[test]
fn test_selection_rejects_absent_or_mismatched_device() {
    let harness = PolicyHarness::new();
    let orchestrator = &harness.orchestrator;

    let absent = orchestrator.select_output_device(RouterCategory::MediaRender, a2dp(OTHER_MAC));
    assert!(matches!(absent, Err(PolicyError::DeviceNotFound(_))));

    let mismatched = orchestrator.select_input_device(RouterCategory::MediaRender, mic());
    assert!(matches!(mismatched, Err(PolicyError::InvalidDevice(_))));
}

#[test]
fn test_failed_move_leaves_other_streams_moving() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);
    harness.play(2, StreamUsage::Movie);
    harness.platform.ports.fail_moves_for(1, true);

    harness.connect(a2dp(HEADSET_MAC));

    assert_eq!(harness.location(1), Some(port("Speaker")));
    assert_eq!(harness.stream_device(1), Some(DeviceType::Speaker));
    assert_eq!(harness.location(2), Some(port("Bt_Speaker")));
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
}

#[test]
fn test_public_remote_device_takes_media_until_removed() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);

    let cast = DeviceDescriptor::new(DeviceType::RemoteCast, DeviceRole::Output).with_network_id("node-7");
    harness.connect(cast.clone());

    assert_eq!(
        harness.location(1),
        Some(conductor_core::domain::MoveTarget::Remote { network_id: "node-7".to_string() })
    );
    assert_eq!(harness.output_type(), DeviceType::RemoteCast);
    assert!(harness.platform.ports.is_open("node-7_out"));

    harness.disconnect(&cast);
    assert!(!harness.platform.ports.is_open("node-7_out"));
    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));
}

#[test]
fn test_events_rejected_after_shutdown() {
    let harness = PolicyHarness::new();
    harness.orchestrator.shutdown();

    let err = harness.orchestrator.on_stream_changed().unwrap_err();
    assert!(matches!(err, PolicyError::NotRunning));
    assert!(harness.platform.ports.open_ports().is_empty());
}
