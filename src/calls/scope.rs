/*!
 * Monitor Facade
 * Controller, pool and call stack wired together for instrumented code
 *
 * Instrumented code talks to a `Monitor`:
 * - `begin` rents a record and pushes it, the returned scope pops and
 *   returns it on drop
 * - `track` / `track_async` wrap a closure or future in such a scope
 * - `log_status` publishes a one-off status event without a frame
 */

use super::events::{CallObserver, Subscription};
use super::info::MethodCallInfo;
use super::pool::{CallRequest, MethodCallInfoPool};
use super::stack::{CallFrame, CallStack};
use crate::core::config::MonitorConfig;
use crate::core::types::{ContextId, MonitorResult};
use crate::monitoring::{MonitoringController, MonitoringVersion, TrackQuery};
use std::future::Future;
use std::sync::Arc;
use tracing::error;

/// Entry point for instrumented code
///
/// Cheap to share behind an `Arc`; every part is internally synchronized.
pub struct Monitor {
    controller: Arc<MonitoringController>,
    pool: Arc<MethodCallInfoPool>,
    stack: Arc<CallStack>,
    allow_older_versions: bool,
}

impl Monitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_controller(Arc::new(MonitoringController::from_config(config)), config)
    }

    /// Monitor around an existing controller
    ///
    /// The controller's own state wins; `config` only sizes the pool and
    /// sets the `should_track` default.
    pub fn with_controller(controller: Arc<MonitoringController>, config: &MonitorConfig) -> Self {
        let pool = Arc::new(MethodCallInfoPool::with_capacity(
            Arc::clone(&controller),
            config.pool_capacity,
        ));
        let stack = Arc::new(CallStack::new(Arc::clone(&pool)));
        Self {
            controller,
            pool,
            stack,
            allow_older_versions: config.allow_older_versions_default,
        }
    }

    pub fn controller(&self) -> &Arc<MonitoringController> {
        &self.controller
    }

    pub fn pool(&self) -> &Arc<MethodCallInfoPool> {
        &self.pool
    }

    pub fn stack(&self) -> &Arc<CallStack> {
        &self.stack
    }

    /// Start tracking a call on the calling thread's context
    #[inline]
    pub fn begin(&self, request: &CallRequest<'_>) -> MethodScope<'_> {
        self.begin_in(ContextId::current(), request)
    }

    /// Start tracking a call on an explicit context
    pub fn begin_in(&self, context: ContextId, request: &CallRequest<'_>) -> MethodScope<'_> {
        let info = self.stack.create_method_call_info(request);
        let frame = self.stack.push(context, info);
        MethodScope::new(self, frame)
    }

    /// Run `f` inside a tracked scope and hand back its result
    ///
    /// If `f` panics the scope is still closed, once, during unwinding.
    pub fn track<R>(&self, request: &CallRequest<'_>, f: impl FnOnce() -> R) -> R {
        let _scope = self.begin(request);
        f()
    }

    /// Run a future on a fresh context whose root call hangs under the
    /// caller's current call
    ///
    /// `f` receives the new context so nested calls inside the future can
    /// use `begin_in`. Dropping the future before completion closes the
    /// scope as well.
    pub async fn track_async<F, Fut, R>(&self, request: &CallRequest<'_>, f: F) -> R
    where
        F: FnOnce(ContextId) -> Fut,
        Fut: Future<Output = R>,
    {
        let caller = ContextId::current();
        let parent = self
            .stack
            .top(caller)
            .unwrap_or(CallFrame::null(caller));

        let context = ContextId::fresh();
        let info = self.stack.create_method_call_info(request);
        let frame = match self.stack.attach(context, info, &parent) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, kind = e.kind(), "async call could not be attached");
                CallFrame::null(context)
            }
        };

        let _scope = MethodScope::new(self, frame);
        f(context).await
    }

    /// Publish a status event under the current call of this thread
    pub fn log_status(&self, request: &CallRequest<'_>) -> MonitorResult<()> {
        self.log_status_in(ContextId::current(), request)
    }

    pub fn log_status_in(&self, context: ContextId, request: &CallRequest<'_>) -> MonitorResult<()> {
        let info = self.stack.create_method_call_info(request);
        let info = self.stack.log_status(context, info);
        self.pool.give_back(info)
    }

    /// `should_track` with this monitor's default for superseded versions
    pub fn should_track(&self, version: MonitoringVersion, query: &TrackQuery<'_>) -> bool {
        let query = query.allow_older_versions(query.allow_older_versions || self.allow_older_versions);
        self.controller.should_track(version, &query)
    }

    pub fn subscribe<O>(&self, observer: O) -> Subscription
    where
        O: CallObserver + 'static,
    {
        self.stack.subscribe(observer)
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("controller", &self.controller)
            .field("pool", &self.pool)
            .field("stack", &self.stack)
            .finish()
    }
}

/// One tracked call, closed exactly once
///
/// Closing pops the frame and returns its record to the pool. `Drop` closes
/// implicitly and can only log failures; `finish` closes explicitly and
/// returns them.
#[must_use = "the call is closed as soon as the scope is dropped"]
pub struct MethodScope<'m> {
    monitor: &'m Monitor,
    frame: CallFrame,
    closed: bool,
}

impl<'m> MethodScope<'m> {
    fn new(monitor: &'m Monitor, frame: CallFrame) -> Self {
        Self {
            monitor,
            frame,
            closed: false,
        }
    }

    #[inline]
    pub fn frame(&self) -> CallFrame {
        self.frame
    }

    #[inline]
    pub fn context(&self) -> ContextId {
        self.frame.context
    }

    /// Whether this scope was opened while monitoring was off
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.frame.is_null()
    }

    /// Attach a parameter to the live record; ignored for no-op scopes
    pub fn set_parameter(&self, key: &str, value: &str) {
        self.with_info(|info| info.set_parameter(key, value));
    }

    /// Run `f` against the live record
    pub fn with_info<R>(&self, f: impl FnOnce(&mut MethodCallInfo) -> R) -> Option<R> {
        self.monitor.stack.with_frame(&self.frame, f)
    }

    /// Close now and report usage errors
    pub fn finish(mut self) -> MonitorResult<()> {
        self.close()
    }

    fn close(&mut self) -> MonitorResult<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let info = self.monitor.stack.pop(&self.frame)?;
        self.monitor.pool.give_back(info).map_err(|e| {
            self.monitor.stack.record_usage_error();
            e
        })
    }
}

impl Drop for MethodScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(
                error = %e,
                kind = e.kind(),
                context = %self.frame.context,
                call = %self.frame.call_id,
                "tracked call could not be closed"
            );
        }
    }
}

impl std::fmt::Debug for MethodScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodScope")
            .field("frame", &self.frame)
            .field("closed", &self.closed)
            .finish()
    }
}
