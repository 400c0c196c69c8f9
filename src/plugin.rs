//! Plugin capability interface
//!
//! Every plugin, whether it produces cognitive interventions or prompt
//! fragments, implements the same four-method trait. The orchestrator only
//! ever sees `Arc<dyn Plugin>`; what a plugin computes is its own business.

use crate::error::OrchestratorError;
use crate::learning::AdaptationTrigger;
use crate::types::{Activation, Context, Intervention, OutcomeLabel};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Complexity interval a plugin is valid for (inclusive)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ComplexityRange {
    pub min: f64,
    pub max: f64,
}

impl ComplexityRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, complexity: f64) -> bool {
        complexity >= self.min && complexity <= self.max
    }
}

impl Default for ComplexityRange {
    fn default() -> Self {
        Self { min: 0.0, max: 10.0 }
    }
}

/// Static description of a plugin, fixed at registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMetadata {
    /// Unique identity within a registry
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Domains the plugin applies to; empty means every domain
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub complexity_range: ComplexityRange,
    pub base_priority: f64,
    /// Declared cognitive load (0-1) used when the plugin does not override it
    #[serde(default)]
    pub cognitive_load: f64,
}

impl PluginMetadata {
    pub fn new(id: impl Into<String>, base_priority: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capabilities: Vec::new(),
            domains: Vec::new(),
            complexity_range: ComplexityRange::default(),
            base_priority,
            cognitive_load: 0.0,
        }
    }

    pub fn with_domains(mut self, domains: &[&str]) -> Self {
        self.domains = domains.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_complexity_range(mut self, min: f64, max: f64) -> Self {
        self.complexity_range = ComplexityRange::new(min, max);
        self
    }

    pub fn with_load(mut self, cognitive_load: f64) -> Self {
        self.cognitive_load = cognitive_load;
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Domain and complexity check, for plugins that gate on their metadata
    pub fn applies_to(&self, context: &Context) -> bool {
        let domain_ok = self.domains.is_empty()
            || context
                .domain
                .as_deref()
                .map(|d| self.domains.iter().any(|own| own == d))
                .unwrap_or(false);
        domain_ok && self.complexity_range.contains(context.complexity)
    }

    /// Activation at baseline priority and declared load
    pub fn baseline_activation(&self) -> Activation {
        Activation::activate(self.base_priority).with_load(self.cognitive_load)
    }
}

/// What a plugin hears back after the caller reports an outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginFeedback {
    pub plugin_id: String,
    pub outcome: OutcomeLabel,
    /// This plugin's share of the round's impact
    pub attributed_impact: f64,
    /// Effectiveness score after the update
    pub effectiveness: f64,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    fn id(&self) -> &str {
        &self.metadata().id
    }

    /// Decide whether to take part in this round, and at what priority
    async fn should_activate(&self, context: &Context) -> Result<Activation>;

    /// Produce this plugin's payload. Only called for admitted plugins.
    async fn intervene(&self, context: &Context) -> Result<Intervention>;

    /// Stand-in payload when `intervene` failed every attempt or its circuit
    /// is open. `None` reports the failure instead.
    fn fallback(&self, _context: &Context, _error: &OrchestratorError) -> Option<Intervention> {
        None
    }

    async fn receive_feedback(&self, _feedback: &PluginFeedback) -> Result<()> {
        Ok(())
    }

    async fn adapt(&self, _trigger: &AdaptationTrigger) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_to_domain_and_complexity() {
        let meta = PluginMetadata::new("socratic", 80.0)
            .with_domains(&["architecture", "debugging"])
            .with_complexity_range(3.0, 8.0);

        assert!(meta.applies_to(&Context::new(5.0).with_domain("debugging")));
        assert!(!meta.applies_to(&Context::new(5.0).with_domain("hiring")));
        assert!(!meta.applies_to(&Context::new(9.0).with_domain("architecture")));
        assert!(!meta.applies_to(&Context::new(5.0)));
    }

    #[test]
    fn test_empty_domains_match_everything() {
        let meta = PluginMetadata::new("any", 10.0);
        assert!(meta.applies_to(&Context::new(1.0)));
        assert!(meta.applies_to(&Context::new(1.0).with_domain("anything")));
    }
}
