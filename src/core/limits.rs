/*!
 * Limits and Defaults
 *
 * Centralized location for capacities, thresholds and environment keys.
 * Performance-critical constants are marked with [PERF].
 */

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Version transitions retained by `MonitoringDiagnostics`
/// Oldest records are evicted first once the ring is full
pub const DIAGNOSTICS_CAPACITY: usize = 1000;

// =============================================================================
// CALL RECORD POOL
// =============================================================================

/// Idle call records kept for reuse (per pool)
/// [PERF] Bounds memory held by the free list; records beyond this are dropped
pub const POOL_CAPACITY: usize = 256;

/// Initial capacity of a fresh record's parameter map
pub const RECORD_PARAMETER_CAPACITY: usize = 4;

// =============================================================================
// CALL STACK
// =============================================================================

/// Frames reserved when a context stack is first created
/// [PERF] Typical instrumented call depth stays below this
pub const STACK_INITIAL_DEPTH: usize = 16;

// =============================================================================
// EVENT BUFFER
// =============================================================================

/// Lifecycle event records held by an `EventBuffer` before it drops
pub const EVENT_BUFFER_SIZE: usize = 4096;

/// Fraction of the buffer above which it reports backpressure
pub const EVENT_BUFFER_PRESSURE: f64 = 0.75;

// =============================================================================
// ENVIRONMENT KEYS
// =============================================================================

pub const ENV_ENABLED: &str = "MONITOR_ENABLED";
pub const ENV_POOL_CAPACITY: &str = "MONITOR_POOL_CAPACITY";
pub const ENV_DIAGNOSTICS_CAPACITY: &str = "MONITOR_DIAGNOSTICS_CAPACITY";
pub const ENV_TRACE_JSON: &str = "MONITOR_TRACE_JSON";
