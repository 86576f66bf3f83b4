/*!
 * Monitoring Controller Tests
 * Enable/disable sequences, component flags and ShouldTrack semantics
 */

use method_monitor::{
    ChangeKind, ComponentType, ManualClock, MonitorConfig, MonitoringController, StateChange,
    TrackQuery,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

struct ConsoleReporter;
struct FileReporter;
struct SlowCallFilter;
struct JsonOutput;

fn console() -> ComponentType {
    ComponentType::of::<ConsoleReporter>()
}

fn file() -> ComponentType {
    ComponentType::of::<FileReporter>()
}

fn slow_calls() -> ComponentType {
    ComponentType::of::<SlowCallFilter>()
}

// ============================================================================
// Global State
// ============================================================================

#[test]
fn test_enable_disable_bumps_version_only_on_change() {
    let controller = MonitoringController::new();
    let v0 = controller.current_version();

    assert!(!controller.enable(), "already enabled");
    assert_eq!(controller.current_version(), v0);

    assert!(controller.disable());
    let v1 = controller.current_version();
    assert!(v1 > v0);
    assert!(!controller.is_enabled());

    assert!(!controller.disable());
    assert_eq!(controller.current_version(), v1);

    assert!(controller.enable());
    assert!(controller.current_version() > v1);
    assert_eq!(controller.diagnostics().change_count(), 2);
}

#[test]
fn test_global_disable_masks_without_erasing() {
    let controller = MonitoringController::new();
    controller.enable_reporter(console());
    controller.enable_filter(slow_calls());
    controller.set_output_type_state(ComponentType::of::<JsonOutput>(), true);

    controller.disable();
    assert!(!controller.is_reporter_enabled(console()));
    assert!(!controller.is_filter_enabled(slow_calls()));
    assert!(!controller.is_output_type_enabled(ComponentType::of::<JsonOutput>()));

    controller.enable();
    assert!(controller.is_reporter_enabled(console()));
    assert!(controller.is_filter_enabled(slow_calls()));
    assert!(controller.is_output_type_enabled(ComponentType::of::<JsonOutput>()));
}

#[test]
fn test_unknown_components_report_false() {
    let controller = MonitoringController::new();
    assert!(!controller.is_reporter_enabled(file()));
    assert!(!controller.is_filter_enabled_for_reporter(file(), slow_calls()));
    let query = TrackQuery::new().reporter(file());
    assert!(!controller.should_track(controller.current_version(), &query));
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn test_filter_override_per_reporter() {
    let controller = MonitoringController::new();
    controller.enable_reporter(console());
    controller.enable_reporter(file());
    controller.enable_filter(slow_calls());
    controller.disable_filter_for_reporter(file(), slow_calls());

    assert!(controller.is_filter_enabled_for_reporter(console(), slow_calls()));
    assert!(!controller.is_filter_enabled_for_reporter(file(), slow_calls()));

    let v = controller.current_version();
    let for_file = TrackQuery::new().reporter(file()).filter(slow_calls());
    let for_console = TrackQuery::new().reporter(console()).filter(slow_calls());
    assert!(!controller.should_track(v, &for_file));
    assert!(controller.should_track(v, &for_console));

    // Lifting the narrowing restores the filter's own flag
    controller.enable_filter_for_reporter(file(), slow_calls());
    assert!(controller.should_track(controller.current_version(), &for_file));
}

#[test]
fn test_override_never_widens_disabled_filter() {
    let controller = MonitoringController::new();
    controller.enable_reporter(console());
    controller.disable_filter(slow_calls());
    controller.enable_filter_for_reporter(console(), slow_calls());

    assert!(!controller.is_filter_enabled(slow_calls()));
    assert!(!controller.is_filter_enabled_for_reporter(console(), slow_calls()));

    let v = controller.current_version();
    let for_console = TrackQuery::new().reporter(console()).filter(slow_calls());
    assert!(!controller.should_track(v, &for_console));
    assert!(!controller.should_track(v, &TrackQuery::new().filter(slow_calls())));

    // Once the filter itself is on, the reporter sees it
    controller.enable_filter(slow_calls());
    assert!(controller.should_track(controller.current_version(), &for_console));
}

// ============================================================================
// ShouldTrack
// ============================================================================

#[test]
fn test_superseded_version_stops_tracking() {
    let controller = MonitoringController::new();
    controller.enable_reporter(console());
    let operation = controller.begin_operation();
    let query = TrackQuery::new().reporter(console());
    assert!(operation.should_track(&query));

    controller.enable_filter(slow_calls());
    assert!(!operation.should_track(&query));
    assert!(operation.should_track(&query.allow_older_versions(true)));

    controller.disable();
    assert!(!operation.should_track(&query.allow_older_versions(true)));
}

#[test]
fn test_reporter_ids() {
    let controller = MonitoringController::new();
    controller.register_reporter_id("console-1", console());
    controller.register_reporter_id("file-1", file());
    controller.enable_reporter(console());
    controller.disable_reporter(file());
    let v = controller.current_version();

    let check = |ids: &[&str]| controller.should_track(v, &TrackQuery::new().reporter_ids(ids));
    assert!(check(&["console-1"]));
    assert!(!check(&["file-1"]));
    assert!(check(&["file-1", "console-1"]));
    assert!(check(&["never-registered"]));
    assert!(check(&[]));
}

#[test]
fn test_cache_cleared_on_version_change() {
    let controller = MonitoringController::new();
    controller.enable_reporter(console());
    let v = controller.current_version();
    let query = TrackQuery::new().reporter(console());

    assert!(controller.should_track(v, &query));
    assert!(controller.should_track(v, &query));
    assert_eq!(controller.cached_queries(), 1);

    controller.disable_reporter(console());
    assert_eq!(controller.cached_queries(), 0);
    let v = controller.current_version();
    assert!(!controller.should_track(v, &query));
}

// ============================================================================
// Callbacks and Status
// ============================================================================

#[test]
fn test_callbacks_receive_every_effective_change() {
    let controller = MonitoringController::new();
    let seen: Arc<Mutex<Vec<StateChange>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = controller.on_state_changed(move |change| sink.lock().push(change.clone()));

    controller.disable();
    controller.disable();
    controller.enable_reporter(console());

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, ChangeKind::Global { enabled: false });
        assert_eq!(
            seen[1].kind,
            ChangeKind::Reporter {
                reporter: console(),
                enabled: true
            }
        );
        assert_eq!(seen[0].new_version, seen[1].old_version);
    }

    drop(handle);
    controller.enable();
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn test_status_serializes() {
    let controller = MonitoringController::new();
    controller.enable_reporter(console());
    controller.register_reporter_id("console-1", console());

    let status = controller.status();
    assert!(status.enabled);
    assert_eq!(status.reporters, vec![("ConsoleReporter".to_string(), true)]);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["reporter_ids"][0][0], "console-1");
}

#[test]
fn test_versions_follow_injected_clock() {
    let clock = Arc::new(ManualClock::new(5_000));
    let controller = MonitoringController::with_clock(&MonitorConfig::default(), clock.clone());
    assert_eq!(controller.current_version().timestamp(), 5_000);

    controller.disable();
    assert_eq!(controller.current_version().timestamp(), 5_000);
    assert_eq!(controller.current_version().counter(), 1);

    clock.set(6_000);
    controller.enable();
    assert_eq!(controller.current_version().timestamp(), 6_000);
    assert_eq!(controller.current_version().counter(), 0);
    assert_eq!(
        controller.diagnostics().version_at(5_500),
        controller.diagnostics().history().first().map(|c| c.new_version)
    );
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_enable_disable_sequences(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
        let controller = MonitoringController::new();
        let mut expected = true;
        let mut changes = 0u64;
        let mut last = controller.current_version();

        for enable in ops {
            let changed = controller.set_enabled(enable);
            prop_assert_eq!(changed, expected != enable);
            if changed {
                changes += 1;
                prop_assert!(controller.current_version() > last);
            } else {
                prop_assert_eq!(controller.current_version(), last);
            }
            expected = enable;
            last = controller.current_version();
            prop_assert_eq!(controller.is_enabled(), expected);
        }
        prop_assert_eq!(controller.diagnostics().change_count(), changes);
    }
}
