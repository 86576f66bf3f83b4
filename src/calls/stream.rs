/*!
 * Event Buffer
 * Lock-free capture of call lifecycle events for out-of-band consumers
 *
 * Observers get borrowed events on the instrumented thread. The buffer copies
 * what it needs into an owned record and queues it; exporters drain the
 * queue on their own schedule. A full queue drops instead of blocking.
 */

use super::events::{CallEvent, CallEventKind, CallObserver};
use crate::core::limits::{EVENT_BUFFER_PRESSURE, EVENT_BUFFER_SIZE};
use crate::core::types::{CallId, ContextId};
use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Owned snapshot of one lifecycle event
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CallEventRecord {
    pub kind: CallEventKind,
    pub context: ContextId,
    pub call_id: CallId,
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub parent_id: String,
    pub class_type: String,
    pub declaring_type: String,
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub generic_arguments: Vec<String>,
    pub level: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub external_type: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub elapsed_us: Option<u64>,
    /// Wall-clock start of the call, derived from its monotonic start
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub started_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub recorded_at: SystemTime,
}

impl CallEventRecord {
    pub fn capture(event: &CallEvent<'_>) -> Self {
        let info = event.info;
        let now = SystemTime::now();
        let started_at = if info.is_null() {
            UNIX_EPOCH
        } else {
            now.checked_sub(info.elapsed()).unwrap_or(now)
        };
        Self {
            kind: event.kind,
            context: event.context,
            call_id: info.call_id(),
            id: info.id().to_string(),
            parent_id: info.parent_id().to_string(),
            class_type: info.class_type().to_string(),
            declaring_type: info.declaring_type().to_string(),
            method: info.method_name().to_string(),
            generic_arguments: info.generic_arguments().to_vec(),
            level: info.level(),
            external_type: info.external_type_name().map(str::to_string),
            parameters: info
                .parameters()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            elapsed_us: event.elapsed.map(|d| d.as_micros() as u64),
            started_at,
            recorded_at: now,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub events_produced: u64,
    pub events_consumed: u64,
    pub events_dropped: u64,
    pub queued: usize,
}

/// Bounded MPMC buffer of captured events
///
/// Clones share the same queue, so one clone can be subscribed to a stack
/// while another is drained by an exporter.
#[derive(Clone)]
pub struct EventBuffer {
    queue: Arc<ArrayQueue<CallEventRecord>>,
    produced: Arc<AtomicU64>,
    consumed: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            produced: Arc::new(AtomicU64::new(0)),
            consumed: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a record; returns false if it was dropped
    #[inline]
    pub fn publish(&self, record: CallEventRecord) -> bool {
        match self.queue.push(record) {
            Ok(()) => {
                self.produced.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    #[inline]
    pub fn try_consume(&self) -> Option<CallEventRecord> {
        self.queue.pop().map(|record| {
            self.consumed.fetch_add(1, Ordering::Relaxed);
            record
        })
    }

    /// Take everything queued right now, oldest first
    pub fn drain(&self) -> Vec<CallEventRecord> {
        let mut records = Vec::with_capacity(self.queue.len());
        while let Some(record) = self.try_consume() {
            records.push(record);
        }
        records
    }

    /// Drain as newline-delimited JSON
    pub fn drain_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for record in self.drain() {
            out.push_str(&record.to_json()?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            events_produced: self.produced.load(Ordering::Relaxed),
            events_consumed: self.consumed.load(Ordering::Relaxed),
            events_dropped: self.dropped.load(Ordering::Relaxed),
            queued: self.queue.len(),
        }
    }

    /// Queue fill level (0.0 to 1.0)
    #[inline]
    pub fn utilization(&self) -> f64 {
        self.queue.len() as f64 / self.queue.capacity() as f64
    }

    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.utilization() > EVENT_BUFFER_PRESSURE
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CallObserver for EventBuffer {
    fn on_event(&self, event: &CallEvent<'_>) {
        self.publish(CallEventRecord::capture(event));
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("capacity", &self.queue.capacity())
            .field("stats", &self.stats())
            .finish()
    }
}
