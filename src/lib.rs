/*!
 * Method Monitor Library
 * Instrumentation core for tracking method calls across threads
 *
 * - `monitoring`: versioned enable/disable state, version history, tracing
 * - `calls`: call records, pooling, per-context call stacks, events
 * - `core`: identifiers, configuration, errors, limits
 */

pub mod calls;
pub mod core;
pub mod monitoring;

// Re-exports
pub use calls::{
    BufferStats, CallEvent, CallEventKind, CallEventRecord, CallFrame, CallInfo, CallLink,
    CallObserver, CallRequest, CallStack, EventBuffer, MethodCallInfo, MethodCallInfoPool,
    MethodDescriptor, MethodScope, Monitor, PoolStats, PooledCall, Subscription,
};
pub use crate::core::{
    CallId, Clock, ComponentType, ConfigError, ContextId, ManualClock, MonitorConfig,
    MonitorError, MonitorResult, SystemClock,
};
pub use monitoring::{
    init_tracing, init_tracing_with, CallbackHandle, ChangeKind, ControllerStatus,
    MonitoringController, MonitoringDiagnostics, MonitoringVersion, OperationScope, StateChange,
    TrackQuery, TracingObserver, VersionChange, VersionManager,
};
