/*!
 * Version Manager Tests
 * Uniqueness and ordering under concurrency and clock anomalies
 */

use method_monitor::{Clock, ManualClock, MonitoringVersion, VersionManager};
use proptest::prelude::*;
use serial_test::serial;
use std::collections::HashSet;
use std::sync::Arc;

const THREADS: usize = 100;
const CALLS_PER_THREAD: usize = 1000;

#[test]
#[serial]
fn test_concurrent_versions_are_unique_and_ordered() {
    let manager = Arc::new(VersionManager::new());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || {
                let mut issued = Vec::with_capacity(CALLS_PER_THREAD);
                for _ in 0..CALLS_PER_THREAD {
                    issued.push(manager.next_version());
                }
                issued
            })
        })
        .collect();

    let mut all: Vec<MonitoringVersion> = Vec::with_capacity(THREADS * CALLS_PER_THREAD);
    for handle in handles {
        let issued = handle.join().unwrap();
        // Each thread observes a strictly increasing sequence
        assert!(issued.windows(2).all(|w| w[0] < w[1]));
        all.extend(issued);
    }

    let unique: HashSet<MonitoringVersion> = all.iter().copied().collect();
    assert_eq!(unique.len(), THREADS * CALLS_PER_THREAD);

    all.sort();
    assert!(all.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(manager.current(), all.last().copied());
}

#[test]
fn test_counter_resets_when_clock_advances() {
    let clock = Arc::new(ManualClock::new(1_000));
    let manager = VersionManager::with_clock(clock.clone());

    let a = manager.next_version();
    let b = manager.next_version();
    assert_eq!((a.timestamp(), a.counter()), (1_000, 0));
    assert_eq!((b.timestamp(), b.counter()), (1_000, 1));

    clock.advance(1);
    let c = manager.next_version();
    assert_eq!((c.timestamp(), c.counter()), (1_001, 0));
}

#[test]
fn test_clock_stepping_back_keeps_bucket() {
    let clock = Arc::new(ManualClock::new(2_000));
    let manager = VersionManager::with_clock(clock.clone());
    let first = manager.next_version();

    clock.set(1_500);
    let second = manager.next_version();
    assert_eq!(second.timestamp(), 2_000);
    assert_eq!(second.counter(), 1);
    assert!(second > first);
    assert_eq!(clock.now_millis(), 1_500);
}

#[test]
fn test_ids_do_not_affect_ordering() {
    let a = MonitoringVersion::new(10, 3);
    let b = MonitoringVersion::new(10, 3);
    assert_ne!(a.id(), b.id());
    assert_eq!(a, b);
    assert!(MonitoringVersion::new(10, 4) > a);
    assert!(MonitoringVersion::new(11, 0) > MonitoringVersion::new(10, i32::MAX));
}

proptest! {
    #[test]
    fn prop_versions_strictly_increase(steps in proptest::collection::vec(-50i64..50, 1..200)) {
        let clock = Arc::new(ManualClock::new(10_000));
        let manager = VersionManager::with_clock(clock.clone());
        let mut previous = manager.next_version();

        for step in steps {
            clock.advance(step);
            let next = manager.next_version();
            prop_assert!(next > previous);
            if next.timestamp() > previous.timestamp() {
                prop_assert_eq!(next.counter(), 0);
            } else {
                prop_assert_eq!(next.counter(), previous.counter() + 1);
            }
            previous = next;
        }
    }
}
