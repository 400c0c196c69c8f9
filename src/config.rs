//! Configuration for orchestration rounds, resilience, learning and caps
//!
//! Everything is plain serde so a single JSON file can configure the whole
//! engine. Missing fields fall back to the defaults below. Durations are
//! expressed in milliseconds.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How candidates are ordered before greedy admission
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankingPolicy {
    /// Use the priority the plugin declared in its activation
    Declared,
    /// Declared priority multiplied by the learned effectiveness score.
    /// Negative priorities are divided by it instead, so learning always
    /// moves a plugin up.
    #[default]
    Adaptive,
}

/// Per-round admission settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Hard cap on admitted plugins per round
    pub max_concurrent_plugins: usize,
    /// Upper bound on the summed cognitive load of admitted plugins
    pub resource_budget: Option<f64>,
    pub ranking: RankingPolicy,
    /// Fail with `EmptyRegistry` instead of returning an empty round
    pub require_admission: bool,
    /// Overall deadline for the round; partial results are returned on expiry
    pub round_deadline_ms: Option<u64>,
    /// Turn cancellation into an error instead of a partial report
    pub require_complete: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_plugins: 3,
            resource_budget: None,
            ranking: RankingPolicy::Adaptive,
            require_admission: false,
            round_deadline_ms: None,
            require_complete: false,
        }
    }
}

impl OrchestrationConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_plugins = max;
        self
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.resource_budget = Some(budget);
        self
    }

    pub fn with_ranking(mut self, ranking: RankingPolicy) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.round_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    pub fn round_deadline(&self) -> Option<Duration> {
        self.round_deadline_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_plugins == 0 {
            return Err(OrchestratorError::invalid_config(
                "max_concurrent_plugins must be greater than zero",
            ));
        }
        if let Some(budget) = self.resource_budget {
            if !budget.is_finite() || budget <= 0.0 {
                return Err(OrchestratorError::invalid_config(format!(
                    "resource_budget must be a positive finite number, got {}",
                    budget
                )));
            }
        }
        if self.round_deadline_ms == Some(0) {
            return Err(OrchestratorError::invalid_config("round_deadline_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Retry, timeout and circuit-breaker settings applied to every plugin call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt timeout
    pub call_timeout_ms: u64,
    /// Consecutive failed attempts that open the circuit. Retries count as
    /// attempts, so a threshold of `max_retries + 1` or less lets a single
    /// exhausted call open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls before allowing one trial
    pub recovery_timeout_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 50,
            max_backoff_ms: 1_000,
            call_timeout_ms: 5_000,
            // two fully exhausted calls in a row
            failure_threshold: 6,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl ResilienceConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        let delay = self.base_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(OrchestratorError::invalid_config("failure_threshold must be greater than zero"));
        }
        if self.call_timeout_ms == 0 {
            return Err(OrchestratorError::invalid_config("call_timeout_ms must be greater than zero"));
        }
        if self.recovery_timeout_ms == 0 {
            return Err(OrchestratorError::invalid_config("recovery_timeout_ms must be greater than zero"));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(OrchestratorError::invalid_config(
                "max_backoff_ms must not be smaller than base_backoff_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningConfig {
    /// EMA weight of the newest sample, in (0, 1]
    pub learning_rate: f64,
    /// Self-reported confidence above which an intervention counts as a success
    pub success_confidence_threshold: f64,
    /// Novelty and confidence must both exceed this for a breakthrough
    pub breakthrough_threshold: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            success_confidence_threshold: 0.6,
            breakthrough_threshold: 0.7,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(OrchestratorError::invalid_config(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        for (name, value) in [
            ("success_confidence_threshold", self.success_confidence_threshold),
            ("breakthrough_threshold", self.breakthrough_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OrchestratorError::invalid_config(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Capacities of every bounded list the engine keeps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryCaps {
    /// Raw outcome records kept per learning-data bucket
    pub outcome_records: usize,
    /// Distinct context signatures kept per intervention pattern
    pub context_signatures: usize,
    /// Breakthrough snapshots kept per insight pattern
    pub breakthroughs: usize,
    /// Engine-wide log of recent outcomes
    pub recent_outcomes: usize,
    /// Orchestrator log of recent plugin failures
    pub failure_log: usize,
}

impl Default for HistoryCaps {
    fn default() -> Self {
        Self {
            outcome_records: 50,
            context_signatures: 20,
            breakthroughs: 10,
            recent_outcomes: 50,
            failure_log: 100,
        }
    }
}

impl HistoryCaps {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("outcome_records", self.outcome_records),
            ("context_signatures", self.context_signatures),
            ("breakthroughs", self.breakthroughs),
            ("recent_outcomes", self.recent_outcomes),
            ("failure_log", self.failure_log),
        ] {
            if value == 0 {
                return Err(OrchestratorError::invalid_config(format!(
                    "caps.{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Top-level configuration, usually loaded from a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub orchestration: OrchestrationConfig,
    pub resilience: ResilienceConfig,
    pub learning: LearningConfig,
    pub caps: HistoryCaps,
}

impl EngineConfig {
    /// Load and validate a JSON config file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {:?}", path))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.orchestration.validate()?;
        self.resilience.validate()?;
        self.learning.validate()?;
        self.caps.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_budget_and_caps() {
        let bad_budget = OrchestrationConfig::default().with_budget(0.0);
        assert!(bad_budget.validate().is_err());

        let no_slots = OrchestrationConfig::default().with_max_concurrent(0);
        assert!(no_slots.validate().is_err());

        let caps = HistoryCaps {
            breakthroughs: 0,
            ..Default::default()
        };
        assert!(matches!(caps.validate(), Err(OrchestratorError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_learning_rate_out_of_range() {
        for rate in [0.0, -0.5, 1.5, f64::NAN] {
            let config = LearningConfig {
                learning_rate: rate,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "rate {} should be rejected", rate);
        }
        let full = LearningConfig {
            learning_rate: 1.0,
            ..Default::default()
        };
        full.validate().unwrap();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ResilienceConfig {
            base_backoff_ms: 100,
            max_backoff_ms: 300,
            ..Default::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(300));
        assert_eq!(config.backoff_for(40), Duration::from_millis(300));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"orchestration":{"max_concurrent_plugins":5,"ranking":"declared"}}"#,
        )
        .unwrap();
        assert_eq!(config.orchestration.max_concurrent_plugins, 5);
        assert_eq!(config.orchestration.ranking, RankingPolicy::Declared);
        assert_eq!(config.resilience, ResilienceConfig::default());
        assert_eq!(config.caps.context_signatures, 20);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"learning":{"learning_rate":0.25}}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.learning.learning_rate, 0.25);

        std::fs::write(&path, r#"{"learning":{"learning_rate":2.0}}"#).unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }
}
