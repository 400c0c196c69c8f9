//! Error taxonomy for the orchestrator and learning engine
//!
//! Per-plugin failures (activation, invocation, circuit, timeout) are
//! recovered inside a round and surface through the failures side channel.
//! Only configuration and registry errors reach the caller as `Err`.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// A plugin's `should_activate` call failed; the plugin sits out the round
    #[error("activation query failed for plugin '{plugin_id}': {message}")]
    ActivationQueryFailure { plugin_id: String, message: String },

    /// An admitted plugin's `intervene` call failed after all retries
    #[error("invocation failed for '{key}' after {attempts} attempt(s): {message}")]
    InvocationFailure {
        key: String,
        attempts: u32,
        message: String,
    },

    /// The circuit for this key is open and the call was rejected without running
    #[error("circuit open for '{key}'")]
    CircuitOpen { key: String },

    /// A single call exceeded the per-call timeout
    #[error("call to '{key}' timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    /// The call was still in flight when its round was cancelled or hit its deadline
    #[error("call to '{key}' was abandoned when the round was cut short")]
    Abandoned { key: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    #[error("no plugins registered and at least one admission is required")]
    EmptyRegistry,

    #[error("round {round_id} was cancelled before completion")]
    Cancelled { round_id: String },

    /// An imported learning snapshot violates a table invariant
    #[error("invalid learning snapshot: {0}")]
    InvalidSnapshot(String),
}

impl OrchestratorError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// True for the per-plugin variants that a round recovers from locally
    pub fn is_plugin_failure(&self) -> bool {
        matches!(
            self,
            Self::ActivationQueryFailure { .. }
                | Self::InvocationFailure { .. }
                | Self::CircuitOpen { .. }
                | Self::Timeout { .. }
                | Self::Abandoned { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_failure_classification() {
        assert!(OrchestratorError::CircuitOpen { key: "a:intervene".into() }.is_plugin_failure());
        assert!(OrchestratorError::Timeout {
            key: "a:intervene".into(),
            timeout: Duration::from_millis(10),
        }
        .is_plugin_failure());
        assert!(OrchestratorError::Abandoned { key: "a:intervene".into() }.is_plugin_failure());
        assert!(!OrchestratorError::EmptyRegistry.is_plugin_failure());
        assert!(!OrchestratorError::invalid_config("zero capacity").is_plugin_failure());
    }

    #[test]
    fn test_error_messages() {
        let err = OrchestratorError::RegistryConflict("plugin 'x' is not registered".into());
        assert_eq!(err.to_string(), "registry conflict: plugin 'x' is not registered");
    }
}
