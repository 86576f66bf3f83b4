/*!
 * Structured Tracing
 * Subscriber setup and a call observer that reports through `tracing`
 *
 * Features:
 * - EnvFilter driven levels (RUST_LOG)
 * - JSON or compact human output
 * - Slow-call warnings for tracked methods
 */

use crate::calls::{CallEvent, CallEventKind, CallObserver};
use crate::core::config::MonitorConfig;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Calls slower than this are logged at warn level by default
pub const DEFAULT_SLOW_CALL: Duration = Duration::from_millis(100);

/// Initialize structured tracing from the environment
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - MONITOR_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let use_json = MonitorConfig::from_env()
        .map(|config| config.trace_json)
        .unwrap_or(false);
    install(use_json);
}

/// Initialize structured tracing with the output format from `config`
pub fn init_tracing_with(config: &MonitorConfig) {
    install(config.trace_json);
}

fn install(use_json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    // try_init: a second call (tests, embedding hosts) keeps the first subscriber
    if use_json {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized with JSON output");
        }
    } else {
        let installed = registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_file(true)
                    .compact(),
            )
            .try_init()
            .is_ok();
        if installed {
            info!("Structured tracing initialized");
        }
    }
}

/// Call observer that writes lifecycle events to `tracing`
///
/// Starts and status events go out at trace/debug level; ends at debug,
/// or at warn once they exceed the slow-call threshold.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    slow_call: Duration,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::with_slow_threshold(DEFAULT_SLOW_CALL)
    }

    pub fn with_slow_threshold(slow_call: Duration) -> Self {
        Self { slow_call }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_call
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl CallObserver for TracingObserver {
    fn on_event(&self, event: &CallEvent<'_>) {
        let info = event.info;
        match event.kind {
            CallEventKind::Started => trace!(
                context = %event.context,
                call = %info.call_id(),
                id = info.id(),
                method = %info.method().map(|m| m.to_string()).unwrap_or_default(),
                level = info.level(),
                parent = info.parent_id(),
                "call started"
            ),
            CallEventKind::Status => debug!(
                context = %event.context,
                id = info.id(),
                method = info.method_name(),
                level = info.level(),
                parent = info.parent_id(),
                "call status"
            ),
            CallEventKind::Ended => {
                let elapsed = event.elapsed.unwrap_or_default();
                if elapsed > self.slow_call {
                    warn!(
                        context = %event.context,
                        id = info.id(),
                        method = info.method_name(),
                        external = info.external_type_name().unwrap_or(""),
                        duration_ms = elapsed.as_millis() as u64,
                        slow = true,
                        "slow call detected"
                    );
                } else {
                    debug!(
                        context = %event.context,
                        id = info.id(),
                        method = info.method_name(),
                        duration_us = elapsed.as_micros() as u64,
                        "call completed"
                    );
                }
            }
        }
    }
}
