//! Adaptation triggers and the handler they are dispatched to

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named reason for plugins to change their behavior
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationTrigger {
    /// A plugin's score has fallen to the floor in some bucket
    PoorPerformance,
    /// A breakthrough was recorded
    Breakthrough,
    Custom(String),
}

impl AdaptationTrigger {
    pub fn as_str(&self) -> &str {
        match self {
            AdaptationTrigger::PoorPerformance => "poor_performance",
            AdaptationTrigger::Breakthrough => "breakthrough",
            AdaptationTrigger::Custom(name) => name,
        }
    }
}

impl fmt::Display for AdaptationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every drained trigger, in sorted order
pub trait AdaptationHandler: Send + Sync {
    fn handle(&self, trigger: &AdaptationTrigger);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdaptationHandler;

impl AdaptationHandler for NoopAdaptationHandler {
    fn handle(&self, trigger: &AdaptationTrigger) {
        tracing::debug!(trigger = %trigger, "adaptation trigger drained (no handler)");
    }
}
