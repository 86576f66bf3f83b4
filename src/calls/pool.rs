/*!
 * Call Record Pooling
 * Keeps the tracking hot path allocation-free by reusing call records
 */

use super::info::{CallInfo, MethodCallInfo, MethodDescriptor};
use crate::core::errors::MonitorError;
use crate::core::limits::POOL_CAPACITY;
use crate::core::types::{CallId, MonitorResult};
use crate::monitoring::MonitoringController;
use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);
static NEXT_CALL: AtomicU64 = AtomicU64::new(1);

/// Everything the pool needs to fill in a record
///
/// ```ignore
/// let submit = Arc::new(MethodDescriptor::new("OrderService", "Submit"));
/// let request = CallRequest::new(&submit)
///     .correlation_id("req-17")
///     .parameters(&[("order", "991")]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub method: &'a Arc<MethodDescriptor>,
    pub owner: &'a str,
    /// Runtime type of the owner; defaults to the declaring type
    pub class_type: Option<&'a Arc<str>>,
    pub generic_arguments: &'a [&'a str],
    pub correlation_id: &'a str,
    pub parameters: &'a [(&'a str, &'a str)],
    /// Set for calls into uninstrumented code
    pub external_type_name: Option<&'a str>,
}

impl<'a> CallRequest<'a> {
    pub fn new(method: &'a Arc<MethodDescriptor>) -> Self {
        Self {
            method,
            owner: "",
            class_type: None,
            generic_arguments: &[],
            correlation_id: "",
            parameters: &[],
            external_type_name: None,
        }
    }

    pub fn owner(mut self, owner: &'a str) -> Self {
        self.owner = owner;
        self
    }

    pub fn class_type(mut self, class_type: &'a Arc<str>) -> Self {
        self.class_type = Some(class_type);
        self
    }

    pub fn generic_arguments(mut self, arguments: &'a [&'a str]) -> Self {
        self.generic_arguments = arguments;
        self
    }

    pub fn correlation_id(mut self, id: &'a str) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn parameters(mut self, parameters: &'a [(&'a str, &'a str)]) -> Self {
        self.parameters = parameters;
        self
    }

    /// Mark as a call into the given uninstrumented type
    pub fn external(mut self, type_name: &'a str) -> Self {
        self.external_type_name = Some(type_name);
        self
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolStats {
    /// Records ever constructed
    pub created: u64,
    pub rented: u64,
    pub returned: u64,
    /// Rents answered with the null sentinel
    pub null_rents: u64,
    /// Rented and not yet returned
    pub outstanding: usize,
    /// Idle records waiting on the free list
    pub retained: usize,
}

/// Recycler for `MethodCallInfo` records
///
/// The free list is a bounded lock-free queue; records returned beyond its
/// capacity are dropped. Fields are blanked on return, never on rent, so a
/// rented record only ever carries values from its own request.
pub struct MethodCallInfoPool {
    id: u64,
    controller: Arc<MonitoringController>,
    free: ArrayQueue<Box<MethodCallInfo>>,
    created: AtomicU64,
    rented: AtomicU64,
    returned: AtomicU64,
    null_rents: AtomicU64,
    outstanding: AtomicUsize,
}

impl MethodCallInfoPool {
    pub fn new(controller: Arc<MonitoringController>) -> Self {
        Self::with_capacity(controller, POOL_CAPACITY)
    }

    pub fn with_capacity(controller: Arc<MonitoringController>, capacity: usize) -> Self {
        Self {
            id: NEXT_POOL.fetch_add(1, Ordering::Relaxed),
            controller,
            free: ArrayQueue::new(capacity.max(1)),
            created: AtomicU64::new(0),
            rented: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            null_rents: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn controller(&self) -> &Arc<MonitoringController> {
        &self.controller
    }

    /// Rent a record for one call
    ///
    /// While monitoring is globally disabled this returns `CallInfo::Null`
    /// without touching the free list.
    pub fn rent(&self, request: &CallRequest<'_>) -> CallInfo {
        if !self.controller.is_enabled() {
            self.null_rents.fetch_add(1, Ordering::Relaxed);
            return CallInfo::Null;
        }

        let mut record = match self.free.pop() {
            Some(record) => record,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Box::new(MethodCallInfo::blank(self.id))
            }
        };

        record.call_id = CallId(NEXT_CALL.fetch_add(1, Ordering::Relaxed));
        record.id.push_str(request.correlation_id);
        record.owner.push_str(request.owner);
        record.method = Some(Arc::clone(request.method));
        record.class_type = Some(match request.class_type {
            Some(class_type) => Arc::clone(class_type),
            None => Arc::clone(request.method.declaring_type_shared()),
        });
        record
            .generic_arguments
            .extend(request.generic_arguments.iter().map(|arg| arg.to_string()));
        for (key, value) in request.parameters {
            record.parameters.insert(key.to_string(), value.to_string());
        }
        if let Some(external) = request.external_type_name {
            record.is_external = true;
            record.external_type_name.push_str(external);
        }
        record.start_time = Instant::now();

        self.rented.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        CallInfo::Active(record)
    }

    /// Give a record back (the pool's `Return`)
    ///
    /// The sentinel is accepted and ignored. A record from another pool is a
    /// usage error. Records are moved in, so one rental returns at most once.
    pub fn give_back(&self, item: CallInfo) -> MonitorResult<()> {
        let mut record = match item {
            CallInfo::Null => return Ok(()),
            CallInfo::Active(record) => record,
        };

        if record.pool_id != self.id {
            return Err(MonitorError::ForeignRecord {
                call: record.call_id,
                owner: record.pool_id,
                pool: self.id,
            });
        }

        if self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            debug!(pool = self.id, call = %record.call_id, "outstanding count already zero");
        }

        record.reset();
        self.returned.fetch_add(1, Ordering::Relaxed);
        if self.free.push(record).is_err() {
            debug!(pool = self.id, "free list full, dropping call record");
        }
        Ok(())
    }

    /// Scoped handle that gives the record back when dropped
    ///
    /// For the sentinel each call yields a fresh empty handle rather than one
    /// shared instance. The handle owns nothing, so dropping it, any number
    /// of them, or releasing it leaves the pool untouched.
    pub fn use_and_return(&self, item: CallInfo) -> PooledCall<'_> {
        PooledCall {
            pool: self,
            info: match item {
                CallInfo::Null => None,
                active => Some(active),
            },
        }
    }

    /// The shared null sentinel
    #[inline]
    pub fn null(&self) -> &'static MethodCallInfo {
        MethodCallInfo::null()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            rented: self.rented.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            null_rents: self.null_rents.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Acquire),
            retained: self.free.len(),
        }
    }
}

impl std::fmt::Debug for MethodCallInfoPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodCallInfoPool")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Record on loan from a pool; returned on drop
///
/// A handle around the sentinel holds nothing and may be dropped any
/// number of times without effect.
pub struct PooledCall<'p> {
    pool: &'p MethodCallInfoPool,
    info: Option<CallInfo>,
}

impl PooledCall<'_> {
    /// Whether dropping this handle does nothing
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.info.is_none()
    }

    pub fn get_mut(&mut self) -> Option<&mut MethodCallInfo> {
        self.info.as_mut().and_then(CallInfo::as_active_mut)
    }

    /// Give the record back now and report usage errors
    pub fn release(mut self) -> MonitorResult<()> {
        match self.info.take() {
            Some(info) => self.pool.give_back(info),
            None => Ok(()),
        }
    }

    /// Keep the record instead of returning it
    pub fn into_inner(mut self) -> CallInfo {
        self.info.take().unwrap_or(CallInfo::Null)
    }
}

impl Deref for PooledCall<'_> {
    type Target = MethodCallInfo;

    fn deref(&self) -> &MethodCallInfo {
        match &self.info {
            Some(info) => &**info,
            None => MethodCallInfo::null(),
        }
    }
}

impl Drop for PooledCall<'_> {
    fn drop(&mut self) {
        if let Some(info) = self.info.take() {
            if let Err(e) = self.pool.give_back(info) {
                error!(error = %e, kind = e.kind(), "pooled call record could not be returned");
            }
        }
    }
}
