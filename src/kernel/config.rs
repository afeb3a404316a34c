//! Scheduler configuration
//!
//! Loaded from JSON at boot; every field has a default so a partial
//! document (or `{}`) is valid.

use serde::{Deserialize, Serialize};

/// Order in which an evaluation pass visits blocked tasks
///
/// When two tasks wait on the same resource the one visited first wins the
/// lock, so this is observable scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOrder {
    /// Ascending task id
    #[default]
    TaskId,
    /// First blocked, first evaluated
    BlockOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub pass_order: PassOrder,
    /// Run an evaluation pass every time the clock advances
    pub evaluate_on_tick: bool,
    /// Record scheduler events in the trace buffer
    pub trace: bool,
    /// Trace ring buffer size
    pub trace_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pass_order: PassOrder::TaskId,
            evaluate_on_tick: true,
            trace: true,
            trace_capacity: 1000,
        }
    }
}

/// Error types for configuration loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Not valid JSON or wrong shape
    Parse(String),
    /// Parsed, but the values make no sense
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // Plain struct of scalars; serializing cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace && self.trace_capacity == 0 {
            return Err(ConfigError::Invalid("trace enabled with zero capacity"));
        }
        Ok(())
    }
}
