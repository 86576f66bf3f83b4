/*!
 * Monitor Configuration
 *
 * Runtime configuration for the controller, the pool and the diagnostics ring
 */

use super::errors::ConfigError;
use super::limits::{
    DIAGNOSTICS_CAPACITY, ENV_DIAGNOSTICS_CAPACITY, ENV_ENABLED, ENV_POOL_CAPACITY,
    ENV_TRACE_JSON, POOL_CAPACITY,
};
use serde::{Deserialize, Serialize};

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Global monitoring state at construction
    pub enabled: bool,
    /// Idle call records retained by the pool
    pub pool_capacity: usize,
    /// Version transitions retained by diagnostics
    pub diagnostics_capacity: usize,
    /// Let `Monitor::should_track` accept superseded versions
    pub allow_older_versions_default: bool,
    /// Emit JSON logs instead of compact text
    pub trace_json: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_capacity: POOL_CAPACITY,
            diagnostics_capacity: DIAGNOSTICS_CAPACITY,
            allow_older_versions_default: false,
            trace_json: false,
        }
    }
}

impl MonitorConfig {
    /// Configuration that starts with monitoring switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Read overrides from the process environment
    ///
    /// Environment variables:
    /// - MONITOR_ENABLED: initial global state (default: true)
    /// - MONITOR_POOL_CAPACITY: idle records kept for reuse (default: 256)
    /// - MONITOR_DIAGNOSTICS_CAPACITY: retained version transitions (default: 1000)
    /// - MONITOR_TRACE_JSON: JSON log output (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_ENABLED) {
            config.enabled = parse_bool(ENV_ENABLED, &value)?;
        }
        if let Some(value) = lookup(ENV_POOL_CAPACITY) {
            config.pool_capacity = parse_capacity(ENV_POOL_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_DIAGNOSTICS_CAPACITY) {
            config.diagnostics_capacity = parse_capacity(ENV_DIAGNOSTICS_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_TRACE_JSON) {
            config.trace_json = parse_bool(ENV_TRACE_JSON, &value)?;
        }

        Ok(config)
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_capacity(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    let capacity = value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })?;
    if capacity == 0 {
        return Err(ConfigError::ZeroCapacity { key });
    }
    Ok(capacity)
}
