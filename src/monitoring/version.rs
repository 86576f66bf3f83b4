/*!
 * Monitoring Versions
 * Strictly increasing tokens that stamp each configuration snapshot
 */

use crate::core::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Totally ordered configuration token
///
/// Ordered by `(timestamp, counter)`. The `id` only identifies a token in
/// logs and never takes part in comparison or hashing.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MonitoringVersion {
    timestamp: i64,
    counter: i32,
    id: Uuid,
}

impl MonitoringVersion {
    pub fn new(timestamp: i64, counter: i32) -> Self {
        Self {
            timestamp,
            counter,
            id: Uuid::new_v4(),
        }
    }

    /// Milliseconds of the bucket this version was issued in
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Position within the millisecond bucket
    #[inline]
    pub fn counter(&self) -> i32 {
        self.counter
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl PartialEq for MonitoringVersion {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.counter == other.counter
    }
}

impl Eq for MonitoringVersion {}

impl PartialOrd for MonitoringVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MonitoringVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.counter).cmp(&(other.timestamp, other.counter))
    }
}

impl Hash for MonitoringVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.timestamp.hash(state);
        self.counter.hash(state);
    }
}

impl fmt::Debug for MonitoringVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringVersion")
            .field("timestamp", &self.timestamp)
            .field("counter", &self.counter)
            .field("id", &self.id)
            .finish()
    }
}

impl fmt::Display for MonitoringVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.timestamp, self.counter)
    }
}

/// Version generator
///
/// Each call to [`VersionManager::next_version`] returns a token strictly
/// greater than every token it issued before, whatever the clock does. A
/// reading at or behind the last bucket stays in that bucket and bumps the
/// counter; an overflowing counter moves on to the next millisecond.
pub struct VersionManager {
    clock: Arc<dyn Clock>,
    last: Mutex<MonitoringVersion>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let last = MonitoringVersion::new(i64::MIN, -1);
        Self {
            clock,
            last: Mutex::new(last),
        }
    }

    /// Issue the next version
    pub fn next_version(&self) -> MonitoringVersion {
        let now = self.clock.now_millis();
        let mut last = self.last.lock();

        let (timestamp, counter) = if now > last.timestamp {
            (now, 0)
        } else if last.counter < i32::MAX {
            (last.timestamp, last.counter + 1)
        } else {
            match last.timestamp.checked_add(1) {
                Some(next) => (next, 0),
                // 2^63 ms of 2^31 versions each; no real clock gets here
                None => panic!("monitoring version space exhausted"),
            }
        };

        let next = MonitoringVersion::new(timestamp, counter);
        *last = next;
        next
    }

    /// Last issued version, `None` before the first call
    pub fn current(&self) -> Option<MonitoringVersion> {
        let last = *self.last.lock();
        (last.counter >= 0).then_some(last)
    }
}

impl Default for VersionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionManager")
            .field("last", &*self.last.lock())
            .finish()
    }
}
