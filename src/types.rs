//! Core types shared by the orchestrator and the learning engine
//!
//! A round is driven by one immutable [`Context`]. Plugins answer with an
//! [`Activation`] verdict and, once admitted, an [`Intervention`] payload.
//! Interventions are opaque to the scheduler: only their metadata is read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of discrete complexity buckets is `MAX_COMPLEXITY_BUCKET + 1`
pub const MAX_COMPLEXITY_BUCKET: i64 = 10;

/// Domain key used when a context carries no domain
pub const GENERAL_DOMAIN: &str = "general";

/// Quantize a raw complexity value into a bucket key.
///
/// Rounds to the nearest integer and clamps to `0..=MAX_COMPLEXITY_BUCKET`.
/// Non-finite values land in bucket 0.
pub fn complexity_bucket(complexity: f64) -> i64 {
    if !complexity.is_finite() {
        return 0;
    }
    (complexity.round() as i64).clamp(0, MAX_COMPLEXITY_BUCKET)
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

/// Where the session currently is (free-form phase name plus a step counter)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub phase: String,
    #[serde(default)]
    pub step: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: "exploration".to_string(),
            step: 0,
        }
    }
}

/// Immutable per-round input, shared read-only with every plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Context {
    /// Problem domain (e.g., "architecture"); `None` means general
    pub domain: Option<String>,
    /// Raw complexity estimate, conventionally 0-10
    pub complexity: f64,
    #[serde(default)]
    pub urgency: Urgency,
    /// Prior items in this session, oldest first
    #[serde(default)]
    pub history: Vec<String>,
    /// Caller's confidence in the current line of work (0-1)
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub session: SessionState,
}

impl Context {
    pub fn new(complexity: f64) -> Self {
        Self {
            complexity,
            confidence: 0.5,
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.session.phase = phase.into();
        self
    }

    pub fn domain_key(&self) -> &str {
        self.domain.as_deref().unwrap_or(GENERAL_DOMAIN)
    }

    pub fn complexity_bucket(&self) -> i64 {
        complexity_bucket(self.complexity)
    }

    /// Number of items seen so far this session
    pub fn session_length(&self) -> u64 {
        self.history.len() as u64
    }

    /// `domain_complexity_urgency`, used for pattern deduplication
    pub fn signature(&self) -> String {
        format!(
            "{}_{}_{}",
            self.domain_key(),
            self.complexity_bucket(),
            self.urgency.as_str()
        )
    }
}

/// Ordinal estimate of how much an intervention will matter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    /// Share of the round's cognitive budget this plugin consumes (0-1)
    pub cognitive_load: f64,
    /// Estimated wall-clock cost in milliseconds
    #[serde(default)]
    pub time_cost_ms: u64,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cognitive_load: 0.0,
            time_cost_ms: 0,
        }
    }
}

/// A plugin's verdict for one round. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activation {
    pub should_activate: bool,
    /// Context-sensitive priority; may differ from the plugin's baseline
    pub priority: f64,
    pub confidence: f64,
    #[serde(default)]
    pub estimated_impact: ImpactLevel,
    #[serde(default)]
    pub resource_requirements: ResourceRequirements,
}

impl Activation {
    /// Verdict that keeps the plugin out of the round
    pub fn skip() -> Self {
        Self {
            should_activate: false,
            priority: 0.0,
            confidence: 0.0,
            estimated_impact: ImpactLevel::Low,
            resource_requirements: ResourceRequirements::default(),
        }
    }

    pub fn activate(priority: f64) -> Self {
        Self {
            should_activate: true,
            priority,
            confidence: 0.5,
            estimated_impact: ImpactLevel::Medium,
            resource_requirements: ResourceRequirements::default(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_load(mut self, cognitive_load: f64) -> Self {
        self.resource_requirements.cognitive_load = cognitive_load;
        self
    }

    pub fn with_impact(mut self, impact: ImpactLevel) -> Self {
        self.estimated_impact = impact;
        self
    }

    /// Cognitive load clamped to [0, 1]; non-finite values count as a full unit
    pub fn cognitive_load(&self) -> f64 {
        let load = self.resource_requirements.cognitive_load;
        if load.is_finite() {
            load.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterventionMetadata {
    pub plugin_id: String,
    /// Plugin's self-reported confidence (0-1)
    pub confidence: f64,
    /// Expected benefit (0-1), feeds the typical-impact statistic
    pub expected_benefit: f64,
    /// Relative share of credit when outcomes are attributed; defaults to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution_weight: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// An admitted plugin's output. Ownership moves to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intervention {
    pub intervention_type: String,
    pub content: serde_json::Value,
    pub metadata: InterventionMetadata,
}

impl Intervention {
    pub fn new(
        plugin_id: impl Into<String>,
        intervention_type: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            intervention_type: intervention_type.into(),
            content,
            metadata: InterventionMetadata {
                plugin_id: plugin_id.into(),
                confidence: 0.5,
                expected_benefit: 0.5,
                attribution_weight: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metadata.confidence = confidence;
        self
    }

    pub fn with_expected_benefit(mut self, benefit: f64) -> Self {
        self.metadata.expected_benefit = benefit;
        self
    }

    pub fn with_attribution_weight(mut self, weight: f64) -> Self {
        self.metadata.attribution_weight = Some(weight);
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.metadata.plugin_id
    }
}

/// An insight surfaced during a session, scored for novelty and confidence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub content: String,
    pub novelty: f64,
    pub confidence: f64,
}

/// Caller's verdict on how a round went
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeLabel {
    Success,
    Partial,
    Failure,
}

impl OutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeLabel::Success => "success",
            OutcomeLabel::Partial => "partial",
            OutcomeLabel::Failure => "failure",
        }
    }
}
