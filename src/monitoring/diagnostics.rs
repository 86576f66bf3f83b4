/*!
 * Monitoring Diagnostics
 * Bounded history of version transitions for introspection
 */

use super::version::MonitoringVersion;
use crate::core::clock::{millis_to_system_time, system_time_to_millis, Clock, SystemClock};
use crate::core::limits::DIAGNOSTICS_CAPACITY;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// One version transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VersionChange {
    pub old_version: MonitoringVersion,
    pub new_version: MonitoringVersion,
    /// Wall clock at the transition, milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl VersionChange {
    pub fn recorded_at(&self) -> SystemTime {
        millis_to_system_time(self.timestamp_ms)
    }
}

/// Ring buffer of version transitions
///
/// Appends and reads go through one `RwLock`, so a reader never sees half a
/// record. The lifetime change count survives eviction.
pub struct MonitoringDiagnostics {
    clock: Arc<dyn Clock>,
    changes: RwLock<VecDeque<VersionChange>>,
    capacity: usize,
    total: AtomicU64,
}

impl MonitoringDiagnostics {
    pub fn new() -> Self {
        Self::with_capacity(DIAGNOSTICS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        Self {
            clock,
            changes: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            total: AtomicU64::new(0),
        }
    }

    /// Append a transition stamped with the current wall clock
    pub fn record(&self, old_version: MonitoringVersion, new_version: MonitoringVersion) {
        let change = VersionChange {
            old_version,
            new_version,
            timestamp_ms: self.clock.now_millis(),
        };

        let mut changes = self.changes.write();
        if changes.len() >= self.capacity {
            changes.pop_front();
        }
        changes.push_back(change);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Version installed by the most recent transition
    pub fn latest_version(&self) -> Option<MonitoringVersion> {
        self.changes.read().back().map(|c| c.new_version)
    }

    /// Transitions recorded since construction, including evicted ones
    pub fn change_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Transitions currently retained
    pub fn retained(&self) -> usize {
        self.changes.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean time between retained transitions
    pub fn average_change_interval(&self) -> Option<Duration> {
        let changes = self.changes.read();
        if changes.len() < 2 {
            return None;
        }
        let first = changes.front()?.timestamp_ms;
        let last = changes.back()?.timestamp_ms;
        let span = last.saturating_sub(first).max(0) as u64;
        Some(Duration::from_millis(span) / (changes.len() as u32 - 1))
    }

    /// Version that was active at `timestamp_ms`
    ///
    /// That is the new version of the last transition recorded at or before
    /// the given time, or `None` if nothing retained is that old.
    pub fn version_at(&self, timestamp_ms: i64) -> Option<MonitoringVersion> {
        // Linear scan: a stepped-back clock leaves the ring unsorted by time
        self.changes
            .read()
            .iter()
            .rev()
            .find(|c| c.timestamp_ms <= timestamp_ms)
            .map(|c| c.new_version)
    }

    pub fn version_at_time(&self, time: SystemTime) -> Option<MonitoringVersion> {
        self.version_at(system_time_to_millis(time))
    }

    /// Ordered copy of the retained transitions, oldest first
    pub fn history(&self) -> Vec<VersionChange> {
        self.changes.read().iter().copied().collect()
    }

    /// Human-readable summary
    pub fn report(&self) -> String {
        let history = self.history();
        let mut out = String::new();

        let _ = writeln!(out, "Monitoring version diagnostics");
        let _ = writeln!(
            out,
            "  changes: {} total, {} retained (capacity {})",
            self.change_count(),
            history.len(),
            self.capacity
        );
        match history.last() {
            Some(latest) => {
                let _ = writeln!(out, "  latest version: {}", latest.new_version);
            }
            None => {
                let _ = writeln!(out, "  latest version: none");
            }
        }
        if let Some(interval) = self.average_change_interval() {
            let _ = writeln!(out, "  mean interval: {:?}", interval);
        }

        for change in history.iter().rev().take(10) {
            let _ = writeln!(
                out,
                "  {} -> {} at {}ms",
                change.old_version, change.new_version, change.timestamp_ms
            );
        }

        out
    }

    /// Drop retained history; the lifetime counter is kept
    pub fn clear(&self) {
        self.changes.write().clear();
    }
}

impl Default for MonitoringDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MonitoringDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringDiagnostics")
            .field("retained", &self.retained())
            .field("capacity", &self.capacity)
            .field("total", &self.change_count())
            .finish()
    }
}
