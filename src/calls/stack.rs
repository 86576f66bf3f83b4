/*!
 * Call Stack
 * Per-context LIFO of active calls, deriving parent and level on push
 */

use super::events::{CallEvent, CallEventKind, CallObserver, ObserverRegistry, Subscription};
use super::info::{CallInfo, CallLink, MethodCallInfo};
use super::pool::{CallRequest, MethodCallInfoPool};
use crate::core::errors::MonitorError;
use crate::core::limits::STACK_INITIAL_DEPTH;
use crate::core::types::{CallId, ContextId, MonitorResult};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Handle to a pushed call
///
/// Plain data: holding a frame keeps nothing alive. `pop` checks it against
/// the context's current top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallFrame {
    pub context: ContextId,
    pub call_id: CallId,
    pub level: u32,
    pub parent: CallLink,
}

impl CallFrame {
    /// Frame for a pushed sentinel; popping it is a no-op
    pub const fn null(context: ContextId) -> Self {
        Self {
            context,
            call_id: CallId::NULL,
            level: 0,
            parent: CallLink::NULL,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.call_id.is_null()
    }

    /// This frame as a parent link
    #[inline]
    pub fn link(&self) -> CallLink {
        CallLink {
            call_id: self.call_id,
            level: self.level,
        }
    }

    fn of(context: ContextId, info: &MethodCallInfo) -> Self {
        Self {
            context,
            call_id: info.call_id(),
            level: info.level(),
            parent: info.parent(),
        }
    }
}

type Frames = Vec<Box<MethodCallInfo>>;

/// Active calls keyed by execution context
///
/// Each context's stack lives in one shard of a concurrent map, so contexts
/// on different threads rarely contend. Observers are always invoked with no
/// lock held; an observer may track calls of its own on any context.
pub struct CallStack {
    pool: Arc<MethodCallInfoPool>,
    contexts: DashMap<ContextId, Frames, RandomState>,
    observers: Arc<ObserverRegistry>,
    usage_errors: AtomicU64,
}

impl CallStack {
    pub fn new(pool: Arc<MethodCallInfoPool>) -> Self {
        Self {
            pool,
            contexts: DashMap::with_hasher(RandomState::new()),
            observers: Arc::new(ObserverRegistry::new()),
            usage_errors: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<MethodCallInfoPool> {
        &self.pool
    }

    /// Rent an unlinked record from the pool
    #[inline]
    pub fn create_method_call_info(&self, request: &CallRequest<'_>) -> CallInfo {
        self.pool.rent(request)
    }

    /// Push `info` onto `context`, making it a child of the current top
    ///
    /// Publishes `Started` before the record becomes the top, so observers
    /// still see the previous depth and calls they track from the callback
    /// are siblings of this one.
    pub fn push(&self, context: ContextId, info: CallInfo) -> CallFrame {
        let mut record = match info {
            CallInfo::Null => return CallFrame::null(context),
            CallInfo::Active(record) => record,
        };

        let expected = self.link_to_top(context, &mut record);
        self.publish(CallEventKind::Started, context, &record, None);

        let mut frames = self
            .contexts
            .entry(context)
            .or_insert_with(|| Vec::with_capacity(STACK_INITIAL_DEPTH));
        // Another user of this context may have moved the top meanwhile
        if frames.last().map(|top| top.call_id()) != expected {
            match frames.last() {
                Some(top) => record.link_to(top),
                None => record.link_to_root(),
            }
        }
        let frame = CallFrame::of(context, &record);
        frames.push(record);
        drop(frames);

        trace!(context = %context, call = %frame.call_id, level = frame.level, "call pushed");
        frame
    }

    /// Push a root record on an empty `context` under an explicit parent
    ///
    /// For work that continues a call on another thread or task. The parent
    /// frame may live on any context and may already be gone; its identity
    /// is copied, not borrowed. As with `push`, `Started` is published
    /// before the record is on the stack.
    pub fn attach(
        &self,
        context: ContextId,
        info: CallInfo,
        parent: &CallFrame,
    ) -> MonitorResult<CallFrame> {
        let mut record = match info {
            CallInfo::Null => return Ok(CallFrame::null(context)),
            CallInfo::Active(record) => record,
        };

        if let Some(depth) = self.non_empty_depth(context) {
            self.usage_errors.fetch_add(1, Ordering::Relaxed);
            let call = record.call_id();
            self.return_to_pool(CallInfo::Active(record));
            return Err(MonitorError::ContextBusy {
                context,
                call,
                depth,
            });
        }

        if parent.is_null() {
            record.link_to_root();
        } else {
            let parent_id = self
                .contexts
                .get(&parent.context)
                .and_then(|frames| {
                    frames
                        .iter()
                        .rev()
                        .find(|f| f.call_id() == parent.call_id)
                        .map(|f| f.id().to_string())
                })
                .unwrap_or_default();
            record.link_to_detached(parent.link(), &parent_id);
        }

        self.publish(CallEventKind::Started, context, &record, None);
        let frame = CallFrame::of(context, &record);
        self.contexts
            .entry(context)
            .or_insert_with(|| Vec::with_capacity(STACK_INITIAL_DEPTH))
            .push(record);
        Ok(frame)
    }

    /// Pop `frame` off its context; it must be the top
    ///
    /// Returns the record so the caller can give it back to the pool.
    pub fn pop(&self, frame: &CallFrame) -> MonitorResult<CallInfo> {
        if frame.is_null() {
            return Ok(CallInfo::Null);
        }

        let (record, now_empty) = {
            let Some(mut frames) = self.contexts.get_mut(&frame.context) else {
                return Err(self.usage_error(MonitorError::EmptyStack {
                    context: frame.context,
                    call: frame.call_id,
                }));
            };
            let top = match frames.last() {
                Some(top) => top.call_id(),
                None => {
                    return Err(self.usage_error(MonitorError::EmptyStack {
                        context: frame.context,
                        call: frame.call_id,
                    }))
                }
            };
            if top != frame.call_id {
                return Err(self.usage_error(MonitorError::NotTopOfStack {
                    context: frame.context,
                    call: frame.call_id,
                    top,
                }));
            }
            let record = frames.pop();
            (record, frames.is_empty())
        };

        if now_empty {
            self.contexts
                .remove_if(&frame.context, |_, frames| frames.is_empty());
        }

        let Some(record) = record else {
            return Err(self.usage_error(MonitorError::EmptyStack {
                context: frame.context,
                call: frame.call_id,
            }));
        };

        let elapsed = record.elapsed();
        self.publish(CallEventKind::Ended, frame.context, &record, Some(elapsed));
        trace!(context = %frame.context, call = %frame.call_id, ?elapsed, "call popped");
        Ok(CallInfo::Active(record))
    }

    /// Link `info` under the current top and publish a status event
    ///
    /// Nothing is pushed; the record comes back to the caller.
    pub fn log_status(&self, context: ContextId, mut info: CallInfo) -> CallInfo {
        if let Some(record) = info.as_active_mut() {
            self.link_to_top(context, record);
            self.publish(CallEventKind::Status, context, record, None);
        }
        info
    }

    /// Register an observer; it stays attached while the subscription lives
    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: CallObserver + 'static,
    {
        self.observers.subscribe(Arc::new(observer))
    }

    /// Register an observer that is shared with other owners
    pub fn subscribe_shared(&self, observer: Arc<dyn CallObserver>) -> Subscription {
        self.observers.subscribe(observer)
    }

    /// Number of active calls on `context`
    pub fn depth(&self, context: ContextId) -> usize {
        self.contexts.get(&context).map(|f| f.len()).unwrap_or(0)
    }

    /// Frame of the innermost active call on `context`
    pub fn top(&self, context: ContextId) -> Option<CallFrame> {
        self.contexts
            .get(&context)
            .and_then(|frames| frames.last().map(|top| CallFrame::of(context, top)))
    }

    /// Run `f` against the live record behind `frame`
    ///
    /// `f` runs while the context's shard is locked and must not call back
    /// into this stack. Returns `None` when the frame is not active.
    pub fn with_frame<R>(
        &self,
        frame: &CallFrame,
        f: impl FnOnce(&mut MethodCallInfo) -> R,
    ) -> Option<R> {
        if frame.is_null() {
            return None;
        }
        let mut frames = self.contexts.get_mut(&frame.context)?;
        frames
            .iter_mut()
            .rev()
            .find(|record| record.call_id() == frame.call_id)
            .map(|record| f(record))
    }

    /// Contexts with at least one active call
    pub fn active_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Usage errors detected so far (bad pops, busy attaches, failed returns)
    pub fn usage_errors(&self) -> u64 {
        self.usage_errors.load(Ordering::Relaxed)
    }

    pub(crate) fn record_usage_error(&self) {
        self.usage_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn usage_error(&self, error: MonitorError) -> MonitorError {
        self.record_usage_error();
        error
    }

    /// Link under the current top; returns the top's id at link time
    fn link_to_top(&self, context: ContextId, record: &mut MethodCallInfo) -> Option<CallId> {
        let top = self.contexts.get(&context).and_then(|frames| {
            frames.last().map(|top| {
                record.link_to(top);
                top.call_id()
            })
        });
        if top.is_none() {
            record.link_to_root();
        }
        top
    }

    fn non_empty_depth(&self, context: ContextId) -> Option<usize> {
        self.contexts
            .get(&context)
            .map(|frames| frames.len())
            .filter(|depth| *depth > 0)
    }

    fn return_to_pool(&self, info: CallInfo) {
        if let Err(e) = self.pool.give_back(info) {
            self.record_usage_error();
            warn!(error = %e, "rejected call record could not be returned");
        }
    }

    #[inline]
    fn publish(
        &self,
        kind: CallEventKind,
        context: ContextId,
        info: &MethodCallInfo,
        elapsed: Option<std::time::Duration>,
    ) {
        if self.observers.is_empty() {
            return;
        }
        self.observers.publish(&CallEvent {
            kind,
            context,
            info,
            elapsed,
        });
    }
}

impl std::fmt::Debug for CallStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStack")
            .field("pool", &self.pool.id())
            .field("active_contexts", &self.active_contexts())
            .field("observers", &self.observers.len())
            .field("usage_errors", &self.usage_errors())
            .finish()
    }
}
