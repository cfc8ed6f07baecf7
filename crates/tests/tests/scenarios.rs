//! End-to-end routing scenarios
//!
//! Each test drives the orchestrator through the simulated platform and
//! checks both the resulting policy state and the collaborator calls.

use conductor_core::domain::{
    AudioScene, ConfigManager, DeviceRole, DeviceType, FetchReason, FetchSummary, OffloadOutcome,
    OffloadState, PolicyConfig, StreamUsage,
};
use conductor_infra::SimCall;
use conductor_tests::*;
use tempfile::TempDir;

fn position(calls: &[SimCall], wanted: &SimCall) -> usize {
    calls
        .iter()
        .position(|c| c == wanted)
        .unwrap_or_else(|| panic!("{} not called in {:?}", wanted, calls))
}

// ============================================================================
// A2DP CONNECT
// ============================================================================

#[test]
fn test_a2dp_connect_moves_running_music() {
    let mut config = quiet_config();
    config.privacy.clear();
    let harness = PolicyHarness::with_config(config);
    harness.play(1, StreamUsage::Music);
    assert_eq!(harness.location(1), Some(port("Speaker")));
    harness.clear_log();

    harness.connect(a2dp(HEADSET_MAC));

    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
    assert_eq!(harness.location(1), Some(port("Bt_Speaker")));
    assert_eq!(harness.stream_device(1), Some(DeviceType::BluetoothA2dp));

    let calls = harness.calls();
    let activated = position(&calls, &SimCall::SetActiveA2dp(HEADSET_MAC.to_string()));
    let moved = position(
        &calls,
        &SimCall::MoveStream { session_id: 1, target: port("Bt_Speaker") },
    );
    assert!(activated < moved);
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::NotifyPreferredOutput(_))),
        1
    );
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::A2dpNotOffload);
}

#[test]
fn test_a2dp_module_loaded_on_connect() {
    let harness = PolicyHarness::new();
    assert!(!harness.platform.ports.is_open("Bt_Speaker"));

    harness.connect(a2dp(HEADSET_MAC));
    assert!(harness.platform.ports.is_open("Bt_Speaker"));
}

// ============================================================================
// ACTIVATION FAILURE
// ============================================================================

#[test]
fn test_a2dp_activation_failure_falls_back_once() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);
    harness
        .platform
        .bluetooth
        .fail_a2dp_activation(HEADSET_MAC, true);
    harness.clear_log();

    harness.connect(a2dp(HEADSET_MAC));

    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::SetActiveA2dp(_))),
        1
    );
    assert!(harness
        .registry_entry(&a2dp(HEADSET_MAC))
        .is_some_and(|d| d.exception_flag));
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::NotifyPreferredOutput(_))),
        0
    );
}

#[test]
fn test_retry_summary_reports_single_retry() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);
    harness
        .platform
        .bluetooth
        .fail_a2dp_activation(HEADSET_MAC, true);
    harness.connect(a2dp(HEADSET_MAC));

    // Clear the flag behind the engine's back so the next fetch tries again
    harness.orchestrator.context().with_state(|s| {
        s.registry.set_exception_flag(&a2dp(HEADSET_MAC), false);
    });
    let summary = harness.orchestrator.fetch_output_devices(FetchReason::UserSelect);

    assert!(summary.retried);
    assert_eq!(summary.failed_activations, 1);
    assert_eq!(summary.moved, 0);
    assert!(!summary.active_changed);
}

#[test]
fn test_reenable_clears_exception_flag() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);
    let bluetooth = &harness.platform.bluetooth;
    bluetooth.fail_a2dp_activation(HEADSET_MAC, true);
    harness.connect(a2dp(HEADSET_MAC));

    bluetooth.fail_a2dp_activation(HEADSET_MAC, false);
    harness
        .orchestrator
        .on_device_enabled_changed(&a2dp(HEADSET_MAC), true)
        .unwrap();

    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
    assert_eq!(harness.location(1), Some(port("Bt_Speaker")));
}

#[test]
fn test_reconnect_clears_exception_flag() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);
    harness
        .platform
        .bluetooth
        .fail_a2dp_activation(HEADSET_MAC, true);
    harness.connect(a2dp(HEADSET_MAC));
    harness
        .platform
        .bluetooth
        .fail_a2dp_activation(HEADSET_MAC, false);

    let again = harness.connect(a2dp(HEADSET_MAC));

    assert!(!again.exception_flag);
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
}

#[test]
fn test_retry_pass_does_not_commit_again() {
    let harness = PolicyHarness::new();
    harness.play(1, StreamUsage::Music);
    harness.play(2, StreamUsage::VoiceCommunication);
    assert_eq!(harness.stream_device(2), Some(DeviceType::Speaker));

    // Register behind the engine's back so one fetch sees all three
    harness.orchestrator.context().with_state(|s| {
        s.registry.add_device(a2dp(HEADSET_MAC));
        s.registry.add_device(sco(OTHER_MAC, DeviceRole::Output));
        s.registry.add_device(earpiece());
    });
    harness.platform.bluetooth.fail_sco_activation(OTHER_MAC, true);
    harness.clear_log();

    let summary = harness
        .orchestrator
        .fetch_output_devices(FetchReason::NewDeviceAvailable);

    assert_eq!(
        summary,
        FetchSummary {
            moved: 2,
            active_changed: true,
            retried: true,
            failed_activations: 1,
        }
    );
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);
    assert_eq!(harness.stream_device(1), Some(DeviceType::BluetoothA2dp));
    assert_eq!(harness.stream_device(2), Some(DeviceType::Earpiece));

    let notified: Vec<SimCall> = harness
        .calls()
        .into_iter()
        .filter(|c| matches!(c, SimCall::NotifyPreferredOutput(_)))
        .collect();
    assert_eq!(notified, vec![SimCall::NotifyPreferredOutput(DeviceType::BluetoothA2dp)]);
}

#[test]
fn test_sco_activation_failure_flags_and_falls_back() {
    let harness = PolicyHarness::new();
    harness.connect(earpiece());
    harness.connect(sco(HEADSET_MAC, DeviceRole::Output));
    harness
        .platform
        .bluetooth
        .fail_sco_activation(HEADSET_MAC, true);
    harness.clear_log();

    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();

    assert_eq!(harness.output_type(), DeviceType::Earpiece);
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::SetActiveSco(_))),
        1
    );
    assert!(harness
        .registry_entry(&sco(HEADSET_MAC, DeviceRole::Output))
        .is_some_and(|d| d.exception_flag));
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::NotifyPreferredOutput(_))),
        1
    );
}

// ============================================================================
// FORCED RE-HANDLE
// ============================================================================

#[test]
fn test_a2dp_streams_rehandled_when_module_missing() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    assert_eq!(harness.location(1), Some(port("Bt_Speaker")));

    // The HAL dropped the A2DP module while the headset stayed connected
    harness.orchestrator.context().with_state(|s| {
        s.open_ports.remove("Bt_Speaker");
    });
    harness.clear_log();

    let summary = harness.orchestrator.fetch_output_devices(FetchReason::StreamChanged);

    assert_eq!(summary.moved, 1);
    assert!(!summary.active_changed);
    let calls = harness.calls();
    let opened = position(&calls, &SimCall::OpenPort("Bt_Speaker".to_string()));
    let moved = position(
        &calls,
        &SimCall::MoveStream { session_id: 1, target: port("Bt_Speaker") },
    );
    assert!(opened < moved);

    let again = harness.orchestrator.fetch_output_devices(FetchReason::StreamChanged);
    assert_eq!(again, FetchSummary::default());
}

// ============================================================================
// CALL SCENE WITHOUT SCO
// ============================================================================

#[test]
fn test_call_without_sco_redirects_media_to_call_ordering() {
    let harness = PolicyHarness::new();
    harness.connect(earpiece());
    harness.play(1, StreamUsage::Music);
    assert_eq!(harness.output_type(), DeviceType::Speaker);
    harness.clear_log();

    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();

    assert_eq!(harness.orchestrator.scene(), AudioScene::PhoneCall);
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::ConnectSco(_) | SimCall::DisconnectSco(_))),
        0
    );
    assert_eq!(harness.output_type(), DeviceType::Earpiece);
    assert_eq!(harness.stream_device(1), Some(DeviceType::Earpiece));
}

#[test]
fn test_call_with_no_candidate_leaves_output_unchanged() {
    let harness = PolicyHarness::bare(quiet_config());
    harness.connect(mic());
    harness.play(1, StreamUsage::Music);
    harness.clear_log();

    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();

    assert_eq!(harness.orchestrator.scene(), AudioScene::PhoneCall);
    assert_eq!(harness.output_type(), DeviceType::None);
    assert_eq!(
        harness
            .platform
            .log
            .count(|c| matches!(c, SimCall::MoveStream { .. })),
        0
    );
}

// ============================================================================
// IDLE FALLBACK
// ============================================================================

#[test]
fn test_last_stream_stopping_updates_idle_device() {
    let harness = PolicyHarness::new();
    harness.connect(earpiece());
    harness.play(1, StreamUsage::VoiceCommunication);
    assert_eq!(harness.output_type(), DeviceType::Earpiece);
    harness.clear_log();

    harness.stop(1);

    assert_eq!(harness.output_type(), DeviceType::Speaker);
    let calls = harness.calls();
    assert!(!calls.iter().any(|c| matches!(c, SimCall::MoveStream { .. })));
    assert!(calls.contains(&SimCall::NotifyPreferredOutput(DeviceType::Speaker)));
}

#[test]
fn test_idle_device_follows_plug_and_unplug() {
    let harness = PolicyHarness::new();

    harness.connect(wired_headset());
    assert_eq!(harness.output_type(), DeviceType::WiredHeadset);

    harness.disconnect_local(DeviceType::WiredHeadset);
    assert_eq!(harness.output_type(), DeviceType::Speaker);
}

// ============================================================================
// OFFLOAD ENTRY
// ============================================================================

#[test]
fn test_offload_entry_order() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::A2dpNotOffload);
    harness.clear_log();

    harness.play_spatial(1);

    let calls = harness.calls();
    let reset = position(&calls, &SimCall::ResetOffloadMode(1));
    let suspend = position(
        &calls,
        &SimCall::SuspendPort { port: "Bt_Speaker".to_string(), suspend: true },
    );
    let codec = position(&calls, &SimCall::PushOffloadCodec);
    let start = position(&calls, &SimCall::OffloadStartPlaying(vec![1]));
    assert!(reset < suspend);
    assert!(suspend < codec);
    assert!(codec < start);

    let flags = harness.orchestrator.context().offload_flags();
    assert_eq!(flags.current, OffloadState::A2dpOffload);
    assert_eq!(flags.previous, OffloadState::A2dpNotOffload);
    assert!(harness.platform.ports.is_suspended("Bt_Speaker"));
}

#[test]
fn test_offload_start_failure_rolls_back_suspend() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.platform.bluetooth.fail_offload_start(true);

    harness.play_spatial(1);

    assert_eq!(harness.orchestrator.offload_state(), OffloadState::A2dpNotOffload);
    assert!(!harness.platform.ports.is_suspended("Bt_Speaker"));
}

#[test]
fn test_leaving_offload_refetches_output() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play_spatial(1);
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::A2dpOffload);

    // Disabled behind the engine's back: only the offload re-fetch can notice
    harness.orchestrator.context().with_state(|s| {
        s.registry.set_enabled(&a2dp(HEADSET_MAC), false);
    });
    harness.platform.tracker.set_spatialization(1, false);
    harness.clear_log();

    let outcome = harness.orchestrator.on_active_sessions_changed().unwrap();

    assert_eq!(outcome, OffloadOutcome::RefetchRequired);
    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));
    assert_eq!(harness.orchestrator.offload_state(), OffloadState::NoA2dpDevice);

    let calls = harness.calls();
    let stop = position(&calls, &SimCall::OffloadStopPlaying(vec![1]));
    let moved = position(
        &calls,
        &SimCall::MoveStream { session_id: 1, target: port("Speaker") },
    );
    assert!(stop < moved);
}

#[test]
fn test_config_reload_reroutes() {
    let harness = PolicyHarness::new();
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);

    let mut config = quiet_config();
    config.privacy.clear();
    config.output_priority = vec![DeviceType::Speaker, DeviceType::BluetoothA2dp];
    harness.orchestrator.reload_config(config).unwrap();

    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));
}

#[test]
fn test_invalid_config_reload_rejected() {
    let harness = PolicyHarness::new();
    let config = PolicyConfig {
        output_priority: Vec::new(),
        ..quiet_config()
    };

    assert!(harness.orchestrator.reload_config(config).is_err());
    assert_eq!(
        harness.orchestrator.context().config().output_priority,
        quiet_config().output_priority
    );
}

#[test]
fn test_capture_follows_sco_in_call() {
    let harness = PolicyHarness::new();
    harness.connect(sco(HEADSET_MAC, DeviceRole::Output));
    harness.connect(sco(HEADSET_MAC, DeviceRole::Input));
    harness.record(2, conductor_core::domain::SourceType::VoiceCommunication);

    harness
        .orchestrator
        .set_audio_scene(AudioScene::PhoneCall)
        .unwrap();

    assert_eq!(harness.input_type(), DeviceType::BluetoothSco);
    assert_eq!(harness.stream_device(2), Some(DeviceType::BluetoothSco));
}

#[tokio::test]
async fn test_policy_file_edit_reroutes() {
    let temp_dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(temp_dir.path().to_path_buf());

    let harness = PolicyHarness::with_config(manager.load().await);
    harness.connect(a2dp(HEADSET_MAC));
    harness.play(1, StreamUsage::Music);
    assert!(manager.exists());
    assert_eq!(harness.output_type(), DeviceType::BluetoothA2dp);

    let mut edited = manager.load().await;
    edited.privacy.clear();
    edited.output_priority = vec![DeviceType::Speaker, DeviceType::BluetoothA2dp];
    manager.save(&edited).await.unwrap();

    harness.orchestrator.reload_config(manager.load().await).unwrap();

    assert_eq!(harness.output_type(), DeviceType::Speaker);
    assert_eq!(harness.location(1), Some(port("Speaker")));
}
