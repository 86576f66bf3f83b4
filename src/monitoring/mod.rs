/*!
 * Monitoring State
 * Versioned enable/disable control, version history and tracing setup
 */

mod controller;
mod diagnostics;
mod tracer;
mod version;

pub use controller::{
    CallbackHandle, ChangeKind, ControllerStatus, MonitoringController, OperationScope,
    StateChange, TrackQuery,
};
pub use diagnostics::{MonitoringDiagnostics, VersionChange};
pub use tracer::{init_tracing, init_tracing_with, TracingObserver, DEFAULT_SLOW_CALL};
pub use version::{MonitoringVersion, VersionManager};
