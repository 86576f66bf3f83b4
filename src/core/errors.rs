/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use crate::core::types::{CallId, ContextId};
use miette::Diagnostic;
use thiserror::Error;

/// Configuration errors raised while reading `MonitorConfig` from the environment
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    #[diagnostic(
        code(config::invalid_value),
        help("Booleans accept 1/0/true/false, sizes must be positive integers.")
    )]
    InvalidValue { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    #[diagnostic(code(config::zero_capacity))]
    ZeroCapacity { key: &'static str },
}

/// Usage errors of the instrumentation core
///
/// Each variant means the scoped-disposal discipline of the instrumented code
/// is broken. None of them is raised for disabled monitoring; that path
/// degrades to the null sentinel instead.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum MonitorError {
    #[error("Call {call} is not the top of {context} (top is {top})")]
    #[diagnostic(
        code(call_stack::not_top),
        help("Frames must be popped in reverse push order. Check for scopes that outlive their callee.")
    )]
    NotTopOfStack {
        context: ContextId,
        call: CallId,
        top: CallId,
    },

    #[error("Call {call} popped from {context}, which has no active frames")]
    #[diagnostic(
        code(call_stack::empty),
        help("The frame was already popped, or it was pushed on another context.")
    )]
    EmptyStack { context: ContextId, call: CallId },

    #[error("Cannot attach call {call} to {context}: context already has {depth} active frames")]
    #[diagnostic(
        code(call_stack::context_busy),
        help("Explicit parents may only seed an empty context. Use a fresh ContextId.")
    )]
    ContextBusy {
        context: ContextId,
        call: CallId,
        depth: usize,
    },

    #[error("Call {call} was rented from pool {owner}, not pool {pool}")]
    #[diagnostic(
        code(pool::foreign_record),
        help("Return records to the pool that rented them.")
    )]
    ForeignRecord { call: CallId, owner: u64, pool: u64 },

    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl MonitorError {
    /// Error category for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::NotTopOfStack { .. } => "not_top_of_stack",
            MonitorError::EmptyStack { .. } => "empty_stack",
            MonitorError::ContextBusy { .. } => "context_busy",
            MonitorError::ForeignRecord { .. } => "foreign_record",
            MonitorError::Config(_) => "config",
        }
    }
}
