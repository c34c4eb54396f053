//! End-to-end tests against the real helper binary.
//!
//! Run with: cargo test --test end_to_end

mod helpers;

use helpers::tolerances::{GAIN_STEPS, PASSTHROUGH_STEPS};
use helpers::*;
use outboard::bridge::{Notice, StateToken};
use outboard::prelude::*;
use outboard::EntryState;

fn gain_state(gain: f64) -> String {
    StateToken::Dual {
        processor: gain.to_le_bytes().to_vec(),
        controller: Vec::new(),
    }
    .encode()
}

fn gain_instance(gain: f64) -> InstanceConfig {
    let mut instance = InstanceConfig::new("/plugins/gain.builtin");
    instance.state = gain_state(gain);
    instance
}

// =============================================================================
// Processing
// =============================================================================

#[test]
fn test_restored_gain_applied_to_audio() {
    let (registry, notifier) = test_registry(test_config());
    let key = InstanceKey(1);
    let instance = gain_instance(1.0);
    let input = stereo_ramp(TEST_FRAMES);

    let (outcome, output) = process_until(&registry, key, &instance, &input, |outcome, output| {
        *outcome == ProcessOutcome::Processed && gain_error(&input, output, 2.0) <= GAIN_STEPS
    })
    .expect("helper never applied the restored gain");

    assert_eq!(outcome, ProcessOutcome::Processed);
    assert_eq!(output.len(), input.len());
    assert_eq!(registry.status(key).unwrap().state, EntryState::Connected);
    assert!(notifier.notices().is_empty());
}

#[test]
fn test_block_larger_than_shared_block_is_chunked() {
    let mut config = test_config();
    config.max_block_len = 128;
    let (registry, _) = test_registry(config);
    let key = InstanceKey(2);
    let instance = gain_instance(0.25);
    // 300 frames -> 128 + 128 + 44
    let input = stereo_ramp(300);

    process_until(&registry, key, &instance, &input, |outcome, output| {
        *outcome == ProcessOutcome::Processed && gain_error(&input, output, 0.5) <= GAIN_STEPS
    })
    .expect("chunked block was not processed end to end");
}

#[test]
fn test_parameter_only_state_restored() {
    let (registry, _) = test_registry(test_config());
    let key = InstanceKey(3);
    let mut instance = InstanceConfig::new("/plugins/polarity.builtin");
    instance.state = "PARAMS:0=1;".to_string();
    let input = stereo_ramp(TEST_FRAMES);

    let inverted_left = |output: &[i16]| {
        output
            .chunks(2)
            .zip(input.chunks(2))
            .all(|(o, i)| {
                (o[0] as i32 + i[0] as i32).abs() <= PASSTHROUGH_STEPS
                    && (o[1] as i32 - i[1] as i32).abs() <= PASSTHROUGH_STEPS
            })
    };

    process_until(&registry, key, &instance, &input, |outcome, output| {
        *outcome == ProcessOutcome::Processed && inverted_left(output)
    })
    .expect("polarity state was not applied");

    assert_eq!(
        registry.capture_state(key).as_deref(),
        Some("PARAMS:0=1;1=0;")
    );
}

// =============================================================================
// State
// =============================================================================

#[test]
fn test_capture_state_round_trips_through_helper() {
    let (registry, _) = test_registry(test_config());
    let key = InstanceKey(4);
    let instance = gain_instance(0.75);
    let input = stereo_ramp(TEST_FRAMES);

    process_until(&registry, key, &instance, &input, |outcome, output| {
        *outcome == ProcessOutcome::Processed && gain_error(&input, output, 1.5) <= GAIN_STEPS
    })
    .expect("gain plugin never loaded");

    let token = registry.capture_state(key).expect("live helper must answer");
    match StateToken::decode(&token).unwrap() {
        StateToken::Dual { processor, .. } => {
            assert_eq!(processor, 0.75f64.to_le_bytes().to_vec());
        }
        other => panic!("expected dual state, got {:?}", other),
    }
}

#[test]
fn test_empty_state_captured_as_empty_string() {
    let (registry, _) = test_registry(test_config());
    let key = InstanceKey(5);
    let instance = InstanceConfig::new("/plugins/passthrough.builtin");
    let input = stereo_ramp(TEST_FRAMES);

    let (outcome, _) = process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Processed
    })
    .expect("helper never connected");
    assert_eq!(outcome, ProcessOutcome::Processed);

    // the load is queued; poll until the plugin answers
    let deadline = std::time::Instant::now() + SETTLE_TIMEOUT;
    let mut captured = registry.capture_state(key);
    while captured.is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(20));
        captured = registry.capture_state(key);
    }
    assert_eq!(captured.as_deref(), Some(""));
}

#[test]
fn test_editor_toggle_saves_state_on_close() {
    let (registry, notifier) = test_registry(test_config());
    let key = InstanceKey(6);
    let instance = gain_instance(1.0);
    let input = stereo_ramp(TEST_FRAMES);

    assert_eq!(registry.toggle_editor(key), EditorToggle::Refused);
    assert_eq!(notifier.count(|n| *n == Notice::NotRunning), 1);

    process_until(&registry, key, &instance, &input, |outcome, output| {
        *outcome == ProcessOutcome::Processed && gain_error(&input, output, 2.0) <= GAIN_STEPS
    })
    .expect("gain plugin never loaded");

    assert_eq!(registry.save_state_if_editor_visible(key), None);
    assert_eq!(registry.toggle_editor(key), EditorToggle::Shown);
    assert!(registry.status(key).unwrap().editor_visible);
    assert!(registry.save_state_if_editor_visible(key).is_some());

    match registry.toggle_editor(key) {
        EditorToggle::Hidden { state: Some(token) } => assert!(token.starts_with("DUAL:")),
        other => panic!("expected hidden with state, got {:?}", other),
    }
    assert!(!registry.status(key).unwrap().editor_visible);
}

// =============================================================================
// Failure handling
// =============================================================================

#[test]
fn test_repeated_crashes_disable_instance() {
    let (registry, notifier) = test_registry(test_config());
    let key = InstanceKey(7);
    let instance = InstanceConfig::new("/plugins/crash.builtin");
    let input = stereo_ramp(TEST_FRAMES);

    let (outcome, output) = process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Bypassed(BypassReason::Disabled)
    })
    .expect("instance was never disabled");

    // bypassed audio is an exact copy
    assert_eq!(outcome, ProcessOutcome::Bypassed(BypassReason::Disabled));
    assert_eq!(output, input);

    let status = registry.status(key).unwrap();
    assert_eq!(status.state, EntryState::Disabled);
    assert_eq!(status.restart_attempts, 3);

    // one crash notice for the sequence, one disable notice
    assert_eq!(
        notifier.count(|n| matches!(n, Notice::HelperCrashed { .. })),
        1
    );
    assert_eq!(
        notifier.count(|n| matches!(n, Notice::InstanceDisabled { attempts: 3, .. })),
        1
    );

    // stays disabled without relaunching
    let (outcome, _) = run_block(&registry, key, &instance, &input);
    assert_eq!(outcome, ProcessOutcome::Bypassed(BypassReason::Disabled));
}

#[test]
fn test_select_plugin_clears_disabled_entry() {
    let (registry, _) = test_registry(test_config());
    let key = InstanceKey(8);
    let mut instance = InstanceConfig::new("/plugins/crash.builtin");
    let input = stereo_ramp(TEST_FRAMES);

    process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Bypassed(BypassReason::Disabled)
    })
    .expect("instance was never disabled");

    instance.state = "stale".to_string();
    registry.select_plugin(key, &mut instance, "/plugins/passthrough.builtin".into());
    assert!(instance.state.is_empty());
    assert!(registry.status(key).is_none());

    process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Processed
    })
    .expect("reselected plugin never processed");
}

#[test]
fn test_stalled_helper_times_out_to_bypass() {
    let (registry, notifier) = test_registry(test_config());
    let key = InstanceKey(9);
    let instance = InstanceConfig::new("/plugins/stall.builtin");
    let input = stereo_ramp(TEST_FRAMES);

    let (_, output) = process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Bypassed(BypassReason::Timeout)
    })
    .expect("stalled helper never timed out");

    assert_eq!(output, input);
    // a slow helper is not a crash
    assert_eq!(registry.status(key).unwrap().state, EntryState::Connected);
    assert_eq!(
        notifier.count(|n| matches!(n, Notice::HelperCrashed { .. })),
        0
    );
}

#[test]
fn test_unmapped_plugin_reports_launch_failure_once() {
    let (registry, notifier) = test_registry(test_config());
    let key = InstanceKey(10);
    let instance = InstanceConfig::new("/plugins/reverb.vst3");
    let input = stereo_ramp(64);

    for _ in 0..3 {
        let (outcome, output) = run_block(&registry, key, &instance, &input);
        assert_eq!(outcome, ProcessOutcome::Bypassed(BypassReason::LaunchFailed));
        assert_eq!(output, input);
    }

    assert_eq!(
        notifier.count(|n| matches!(n, Notice::LaunchFailed { .. })),
        1
    );
    assert_eq!(registry.status(key).unwrap().state, EntryState::LaunchFailed);
}

#[test]
fn test_unknown_builtin_leaves_helper_passing_through() {
    let (registry, notifier) = test_registry(test_config());
    let key = InstanceKey(11);
    let instance = InstanceConfig::new("/plugins/nonexistent.builtin");
    let input = stereo_ramp(TEST_FRAMES);

    let (_, output) = process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Processed
    })
    .expect("helper never connected");

    assert!(gain_error(&input, &output, 1.0) <= PASSTHROUGH_STEPS);
    assert_eq!(registry.capture_state(key), None);
    // the helper answered FAIL, so it is not reported as unresponsive
    assert_eq!(
        notifier.count(|n| matches!(n, Notice::HelperUnresponsive { .. })),
        0
    );
}

// =============================================================================
// Lifecycle
// =============================================================================

#[cfg(unix)]
#[test]
fn test_standalone_helper_runs_default_processor() {
    let dir = tempfile::tempdir().unwrap();
    let standalone = dir.path().join("gain-standalone.ohelper");
    std::os::unix::fs::symlink(helper_executable(), &standalone).unwrap();

    let mut config = test_config();
    config.standalone_extensions = vec!["ohelper".to_string()];
    let (registry, _) = test_registry(config);
    let key = InstanceKey(12);
    let mut instance = InstanceConfig::new(&standalone);
    instance.state = gain_state(1.0);
    let input = stereo_ramp(TEST_FRAMES);

    process_until(&registry, key, &instance, &input, |outcome, output| {
        *outcome == ProcessOutcome::Processed && gain_error(&input, output, 2.0) <= GAIN_STEPS
    })
    .expect("standalone helper never applied its state");

    registry.remove_instance(key);
}

#[test]
fn test_unconfigured_instance_removes_entry() {
    let (registry, _) = test_registry(test_config());
    let key = InstanceKey(13);
    let instance = gain_instance(0.5);
    let input = stereo_ramp(TEST_FRAMES);

    process_until(&registry, key, &instance, &input, |outcome, _| {
        *outcome == ProcessOutcome::Processed
    })
    .expect("helper never connected");
    assert_eq!(registry.instance_count(), 1);

    let (outcome, output) = run_block(&registry, key, &InstanceConfig::default(), &input);
    assert_eq!(outcome, ProcessOutcome::Bypassed(BypassReason::NotConfigured));
    assert_eq!(output, input);
    assert_eq!(registry.instance_count(), 0);
}

#[test]
fn test_shutdown_stops_every_helper() {
    let (registry, _) = test_registry(test_config());
    let input = stereo_ramp(TEST_FRAMES);

    for id in 20..22 {
        process_until(
            &registry,
            InstanceKey(id),
            &gain_instance(0.5),
            &input,
            |outcome, _| *outcome == ProcessOutcome::Processed,
        )
        .expect("helper never connected");
    }
    assert_eq!(registry.instance_count(), 2);

    registry.shutdown();
    assert_eq!(registry.instance_count(), 0);
    assert!(registry.status(InstanceKey(20)).is_none());
}
