//! Learning tables: effectiveness scores and bucketed pattern statistics
//!
//! Counts only ever grow. Raw examples live in bounded histories so each
//! bucket keeps just its most recent entries.

use crate::error::Result;
use crate::history::BoundedHistory;
use crate::types::{OutcomeLabel, Urgency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INITIAL_EFFECTIVENESS: f64 = 0.5;
pub const MIN_EFFECTIVENESS: f64 = 0.1;
pub const MAX_EFFECTIVENESS: f64 = 1.0;

/// (plugin, domain, complexity bucket)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginBucketKey {
    pub plugin_id: String,
    pub domain: String,
    pub bucket: i64,
}

impl PluginBucketKey {
    pub fn new(plugin_id: &str, domain: &str, bucket: i64) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            domain: domain.to_string(),
            bucket,
        }
    }
}

/// (domain, complexity bucket)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainBucketKey {
    pub domain: String,
    pub bucket: i64,
}

/// (domain, complexity bucket, outcome)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearningDataKey {
    pub domain: String,
    pub bucket: i64,
    pub outcome: OutcomeLabel,
}

/// Learned effectiveness of one plugin in one (domain, bucket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessScore {
    pub key: PluginBucketKey,
    /// Always within [MIN_EFFECTIVENESS, MAX_EFFECTIVENESS]
    pub score: f64,
    pub observations: u64,
    pub updated_at: DateTime<Utc>,
}

impl EffectivenessScore {
    pub fn new(key: PluginBucketKey) -> Self {
        Self {
            key,
            score: INITIAL_EFFECTIVENESS,
            observations: 0,
            updated_at: Utc::now(),
        }
    }

    /// EMA step: `old * (1 - alpha) + sample * alpha`, clamped
    pub fn update(&mut self, sample: f64, alpha: f64) -> f64 {
        self.score = ema(self.score, sample, alpha);
        self.observations += 1;
        self.updated_at = Utc::now();
        self.score
    }
}

/// One EMA step, clamped into the effectiveness range. NaN samples count as 0.
pub fn ema(old: f64, sample: f64, alpha: f64) -> f64 {
    let sample = if sample.is_nan() { 0.0 } else { sample };
    let blended = old * (1.0 - alpha) + sample * alpha;
    if blended.is_nan() {
        return MIN_EFFECTIVENESS;
    }
    blended.clamp(MIN_EFFECTIVENESS, MAX_EFFECTIVENESS)
}

/// A single reported outcome as kept in the recent-example lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub plugin_ids: Vec<String>,
    pub outcome: OutcomeLabel,
    pub impact: f64,
    pub domain: String,
    pub complexity: f64,
    pub urgency: Urgency,
    pub recorded_at: DateTime<Utc>,
}

/// Outcomes bucketed by (domain, bucket, outcome)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningData {
    pub key: LearningDataKey,
    pub count: u64,
    pub average_impact: f64,
    pub recent: BoundedHistory<OutcomeRecord>,
}

impl LearningData {
    pub fn new(key: LearningDataKey, cap: usize) -> Result<Self> {
        Ok(Self {
            key,
            count: 0,
            average_impact: 0.0,
            recent: BoundedHistory::new(cap)?,
        })
    }

    pub fn record(&mut self, record: OutcomeRecord) {
        self.count += 1;
        self.average_impact = running_mean(self.average_impact, finite_or_zero(record.impact), self.count);
        self.recent.push(record);
    }
}

/// How a plugin's interventions have looked in one (domain, bucket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionPattern {
    pub key: PluginBucketKey,
    pub total_count: u64,
    /// Interventions whose self-reported confidence cleared the success threshold
    pub success_count: u64,
    /// Running mean of expected benefit
    pub typical_impact: f64,
    /// Distinct `domain_complexity_urgency` signatures, most recent kept
    pub context_signatures: BoundedHistory<String>,
}

impl InterventionPattern {
    pub fn new(key: PluginBucketKey, signature_cap: usize) -> Result<Self> {
        Ok(Self {
            key,
            total_count: 0,
            success_count: 0,
            typical_impact: 0.0,
            context_signatures: BoundedHistory::new(signature_cap)?,
        })
    }

    pub fn record(&mut self, confident: bool, expected_benefit: f64, signature: String) {
        self.total_count += 1;
        if confident {
            self.success_count += 1;
        }
        self.typical_impact = running_mean(
            self.typical_impact,
            finite_or_zero(expected_benefit),
            self.total_count,
        );
        self.context_signatures.push_unique(signature);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakthroughSnapshot {
    pub domain: String,
    pub complexity: f64,
    pub urgency: Urgency,
    pub session_phase: String,
    pub timestamp: DateTime<Utc>,
}

/// Insight statistics for one (domain, bucket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightPattern {
    pub key: DomainBucketKey,
    pub total_insights: u64,
    /// `total_insights / max(1, session_length)` as of the last update
    pub insight_frequency: f64,
    pub average_novelty: f64,
    pub breakthroughs: BoundedHistory<BreakthroughSnapshot>,
}

impl InsightPattern {
    pub fn new(key: DomainBucketKey, breakthrough_cap: usize) -> Result<Self> {
        Ok(Self {
            key,
            total_insights: 0,
            insight_frequency: 0.0,
            average_novelty: 0.0,
            breakthroughs: BoundedHistory::new(breakthrough_cap)?,
        })
    }

    pub fn record(&mut self, novelty: f64, session_length: u64) {
        self.total_insights += 1;
        self.insight_frequency = self.total_insights as f64 / session_length.max(1) as f64;
        self.average_novelty = running_mean(self.average_novelty, finite_or_zero(novelty), self.total_insights);
    }
}

/// Incremental mean after the `n`-th sample
fn running_mean(mean: f64, sample: f64, n: u64) -> f64 {
    if n == 0 {
        return sample;
    }
    mean + (sample - mean) / n as f64
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
