//! Adaptive Learning Engine
//!
//! Consumes round outcomes and keeps:
//! - effectiveness scores per (plugin, domain, complexity bucket), EMA-updated
//!   and clamped to [0.1, 1.0]
//! - learning data per (domain, bucket, outcome)
//! - intervention patterns per (plugin, domain, bucket)
//! - insight patterns per (domain, bucket)
//! - a set of pending adaptation triggers
//!
//! All tables sit behind one mutex, so every read-modify-write is atomic.
//! Scores feed back into the orchestrator's ranking on the next round.

pub mod adaptation;
pub mod patterns;

pub use adaptation::{AdaptationHandler, AdaptationTrigger, NoopAdaptationHandler};
pub use patterns::{
    BreakthroughSnapshot, DomainBucketKey, EffectivenessScore, InsightPattern,
    InterventionPattern, LearningData, LearningDataKey, OutcomeRecord, PluginBucketKey,
    INITIAL_EFFECTIVENESS, MAX_EFFECTIVENESS, MIN_EFFECTIVENESS,
};

use crate::config::{HistoryCaps, LearningConfig};
use crate::error::{OrchestratorError, Result};
use crate::history::BoundedHistory;
use crate::types::{Context, Insight, Intervention, OutcomeLabel};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Public result types
// ============================================================================

/// Score movement for one plugin caused by one reported outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreUpdate {
    pub plugin_id: String,
    pub attributed_impact: f64,
    pub old_score: f64,
    pub new_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeSummary {
    pub outcome: OutcomeLabel,
    /// Impact after sanitizing (NaN becomes 0)
    pub impact: f64,
    pub domain: String,
    pub bucket: i64,
    /// One entry per contributing plugin, sorted by plugin id
    pub updates: Vec<ScoreUpdate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LearningStats {
    pub scores_tracked: usize,
    pub learning_buckets: usize,
    pub intervention_patterns: usize,
    pub insight_patterns: usize,
    pub outcomes_recorded: u64,
    pub breakthroughs_recorded: u64,
    pub pending_adaptations: usize,
}

/// Everything the engine has learned, in a JSON-friendly shape.
///
/// Tables are flattened to sorted vectors since their keys are tuples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub scores: Vec<EffectivenessScore>,
    pub learning_data: Vec<LearningData>,
    pub intervention_patterns: Vec<InterventionPattern>,
    pub insight_patterns: Vec<InsightPattern>,
    pub recent_outcomes: BoundedHistory<OutcomeRecord>,
    pub outcomes_recorded: u64,
    #[serde(default)]
    pub breakthroughs_recorded: u64,
    #[serde(default)]
    pub pending_adaptations: Vec<AdaptationTrigger>,
}

// ============================================================================
// Engine
// ============================================================================

struct LearningState {
    scores: HashMap<PluginBucketKey, EffectivenessScore>,
    learning_data: HashMap<LearningDataKey, LearningData>,
    intervention_patterns: HashMap<PluginBucketKey, InterventionPattern>,
    insight_patterns: HashMap<DomainBucketKey, InsightPattern>,
    recent_outcomes: BoundedHistory<OutcomeRecord>,
    outcomes_recorded: u64,
    breakthroughs_recorded: u64,
    pending: BTreeSet<AdaptationTrigger>,
}

pub struct LearningEngine {
    config: LearningConfig,
    caps: HistoryCaps,
    state: Mutex<LearningState>,
    handler: Arc<dyn AdaptationHandler>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig, caps: HistoryCaps) -> Result<Self> {
        config.validate()?;
        caps.validate()?;
        let state = LearningState {
            scores: HashMap::new(),
            learning_data: HashMap::new(),
            intervention_patterns: HashMap::new(),
            insight_patterns: HashMap::new(),
            recent_outcomes: BoundedHistory::new(caps.recent_outcomes)?,
            outcomes_recorded: 0,
            breakthroughs_recorded: 0,
            pending: BTreeSet::new(),
        };
        Ok(Self {
            config,
            caps,
            state: Mutex::new(state),
            handler: Arc::new(NoopAdaptationHandler),
        })
    }

    /// Replace the handler that drained triggers are dispatched to
    pub fn with_handler(mut self, handler: Arc<dyn AdaptationHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Attribute `impact` across the round's interventions and move each
    /// contributing plugin's score toward its share.
    pub fn record_outcome(
        &self,
        context: &Context,
        interventions: &[Intervention],
        outcome: OutcomeLabel,
        impact: f64,
    ) -> Result<OutcomeSummary> {
        let impact = if impact.is_nan() { 0.0 } else { impact };
        let domain = context.domain_key().to_string();
        let bucket = context.complexity_bucket();
        let alpha = self.config.learning_rate;
        let shares = attribution_shares(interventions);

        let mut state = self.state.lock();
        let mut updates = Vec::with_capacity(shares.len());

        for (plugin_id, share) in &shares {
            let attributed = impact * share;
            let key = PluginBucketKey::new(plugin_id, &domain, bucket);
            let score = state
                .scores
                .entry(key.clone())
                .or_insert_with(|| EffectivenessScore::new(key));
            let old_score = score.score;
            let new_score = score.update(attributed, alpha);

            if new_score <= MIN_EFFECTIVENESS && old_score > MIN_EFFECTIVENESS {
                tracing::info!(plugin_id = %plugin_id, domain = %domain, bucket, "effectiveness hit floor");
                state.pending.insert(AdaptationTrigger::PoorPerformance);
            }
            updates.push(ScoreUpdate {
                plugin_id: plugin_id.clone(),
                attributed_impact: attributed,
                old_score,
                new_score,
            });
        }

        let record = OutcomeRecord {
            plugin_ids: shares.keys().cloned().collect(),
            outcome,
            impact,
            domain: domain.clone(),
            complexity: context.complexity,
            urgency: context.urgency,
            recorded_at: Utc::now(),
        };

        let data_key = LearningDataKey {
            domain: domain.clone(),
            bucket,
            outcome,
        };
        if !state.learning_data.contains_key(&data_key) {
            let data = LearningData::new(data_key.clone(), self.caps.outcome_records)?;
            state.learning_data.insert(data_key.clone(), data);
        }
        if let Some(data) = state.learning_data.get_mut(&data_key) {
            data.record(record.clone());
        }
        state.recent_outcomes.push(record);
        state.outcomes_recorded += 1;

        tracing::debug!(
            outcome = outcome.as_str(),
            impact,
            domain = %domain,
            bucket,
            plugins = updates.len(),
            "outcome recorded"
        );

        Ok(OutcomeSummary {
            outcome,
            impact,
            domain,
            bucket,
            updates,
        })
    }

    pub fn record_intervention_patterns(
        &self,
        context: &Context,
        interventions: &[Intervention],
    ) -> Result<()> {
        let domain = context.domain_key();
        let bucket = context.complexity_bucket();
        let signature = context.signature();
        let threshold = self.config.success_confidence_threshold;

        let mut state = self.state.lock();
        for intervention in interventions {
            let key = PluginBucketKey::new(intervention.plugin_id(), domain, bucket);
            if !state.intervention_patterns.contains_key(&key) {
                let pattern = InterventionPattern::new(key.clone(), self.caps.context_signatures)?;
                state.intervention_patterns.insert(key.clone(), pattern);
            }
            if let Some(pattern) = state.intervention_patterns.get_mut(&key) {
                pattern.record(
                    intervention.metadata.confidence > threshold,
                    intervention.metadata.expected_benefit,
                    signature.clone(),
                );
            }
        }
        Ok(())
    }

    /// Returns the number of breakthroughs recorded from `insights`
    pub fn record_insight_patterns(&self, context: &Context, insights: &[Insight]) -> Result<usize> {
        let key = DomainBucketKey {
            domain: context.domain_key().to_string(),
            bucket: context.complexity_bucket(),
        };
        let threshold = self.config.breakthrough_threshold;
        let session_length = context.session_length();

        let mut state = self.state.lock();
        if !state.insight_patterns.contains_key(&key) {
            let pattern = InsightPattern::new(key.clone(), self.caps.breakthroughs)?;
            state.insight_patterns.insert(key.clone(), pattern);
        }

        let mut breakthroughs = 0;
        if let Some(pattern) = state.insight_patterns.get_mut(&key) {
            for insight in insights {
                pattern.record(insight.novelty, session_length);
                if insight.confidence > threshold && insight.novelty > threshold {
                    pattern.breakthroughs.push(BreakthroughSnapshot {
                        domain: key.domain.clone(),
                        complexity: context.complexity,
                        urgency: context.urgency,
                        session_phase: context.session.phase.clone(),
                        timestamp: Utc::now(),
                    });
                    breakthroughs += 1;
                }
            }
        }

        if breakthroughs > 0 {
            state.breakthroughs_recorded += breakthroughs as u64;
            state.pending.insert(AdaptationTrigger::Breakthrough);
            tracing::info!(domain = %key.domain, bucket = key.bucket, breakthroughs, "breakthrough recorded");
        }
        Ok(breakthroughs)
    }

    /// Learned score, or the initial 0.5 for a (plugin, domain, bucket) never seen
    pub fn effectiveness_score(&self, plugin_id: &str, domain: &str, bucket: i64) -> f64 {
        self.state
            .lock()
            .scores
            .get(&PluginBucketKey::new(plugin_id, domain, bucket))
            .map(|s| s.score)
            .unwrap_or(INITIAL_EFFECTIVENESS)
    }

    /// Scores for many plugins in one context, taken under a single lock
    pub fn effectiveness_for(&self, plugin_ids: &[&str], context: &Context) -> HashMap<String, f64> {
        let domain = context.domain_key();
        let bucket = context.complexity_bucket();
        let state = self.state.lock();
        plugin_ids
            .iter()
            .map(|id| {
                let score = state
                    .scores
                    .get(&PluginBucketKey::new(id, domain, bucket))
                    .map(|s| s.score)
                    .unwrap_or(INITIAL_EFFECTIVENESS);
                (id.to_string(), score)
            })
            .collect()
    }

    /// Queue a trigger. Scheduling one already pending is a no-op.
    pub fn schedule_adaptation(&self, trigger: AdaptationTrigger) -> bool {
        self.state.lock().pending.insert(trigger)
    }

    /// Take every pending trigger, dispatch each to the handler, and return them sorted
    pub fn drain_adaptations(&self) -> Vec<AdaptationTrigger> {
        let drained: Vec<AdaptationTrigger> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.pending).into_iter().collect()
        };
        for trigger in &drained {
            self.handler.handle(trigger);
        }
        drained
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    pub fn recent_outcomes(&self, n: usize) -> Vec<OutcomeRecord> {
        self.state
            .lock()
            .recent_outcomes
            .recent(n)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn intervention_pattern(
        &self,
        plugin_id: &str,
        domain: &str,
        bucket: i64,
    ) -> Option<InterventionPattern> {
        self.state
            .lock()
            .intervention_patterns
            .get(&PluginBucketKey::new(plugin_id, domain, bucket))
            .cloned()
    }

    pub fn insight_pattern(&self, domain: &str, bucket: i64) -> Option<InsightPattern> {
        let key = DomainBucketKey {
            domain: domain.to_string(),
            bucket,
        };
        self.state.lock().insight_patterns.get(&key).cloned()
    }

    pub fn learning_data(&self, domain: &str, bucket: i64, outcome: OutcomeLabel) -> Option<LearningData> {
        let key = LearningDataKey {
            domain: domain.to_string(),
            bucket,
            outcome,
        };
        self.state.lock().learning_data.get(&key).cloned()
    }

    /// Every score, best first (ties by key)
    pub fn scores(&self) -> Vec<EffectivenessScore> {
        let mut scores: Vec<EffectivenessScore> = self.state.lock().scores.values().cloned().collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        scores
    }

    pub fn stats(&self) -> LearningStats {
        let state = self.state.lock();
        LearningStats {
            scores_tracked: state.scores.len(),
            learning_buckets: state.learning_data.len(),
            intervention_patterns: state.intervention_patterns.len(),
            insight_patterns: state.insight_patterns.len(),
            outcomes_recorded: state.outcomes_recorded,
            breakthroughs_recorded: state.breakthroughs_recorded,
            pending_adaptations: state.pending.len(),
        }
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    pub fn export(&self) -> LearningSnapshot {
        let state = self.state.lock();

        let mut scores: Vec<EffectivenessScore> = state.scores.values().cloned().collect();
        scores.sort_by(|a, b| a.key.cmp(&b.key));
        let mut learning_data: Vec<LearningData> = state.learning_data.values().cloned().collect();
        learning_data.sort_by(|a, b| a.key.cmp(&b.key));
        let mut intervention_patterns: Vec<InterventionPattern> =
            state.intervention_patterns.values().cloned().collect();
        intervention_patterns.sort_by(|a, b| a.key.cmp(&b.key));
        let mut insight_patterns: Vec<InsightPattern> = state.insight_patterns.values().cloned().collect();
        insight_patterns.sort_by(|a, b| a.key.cmp(&b.key));

        LearningSnapshot {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            scores,
            learning_data,
            intervention_patterns,
            insight_patterns,
            recent_outcomes: state.recent_outcomes.clone(),
            outcomes_recorded: state.outcomes_recorded,
            breakthroughs_recorded: state.breakthroughs_recorded,
            pending_adaptations: state.pending.iter().cloned().collect(),
        }
    }

    /// Replace all learned state with `snapshot`. Validated first; on error
    /// the current state is left untouched.
    pub fn import(&self, snapshot: LearningSnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(OrchestratorError::InvalidSnapshot(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut scores = HashMap::with_capacity(snapshot.scores.len());
        for score in snapshot.scores {
            if !(MIN_EFFECTIVENESS..=MAX_EFFECTIVENESS).contains(&score.score) {
                return Err(OrchestratorError::InvalidSnapshot(format!(
                    "score {} for {}/{}/{} is outside [{}, {}]",
                    score.score,
                    score.key.plugin_id,
                    score.key.domain,
                    score.key.bucket,
                    MIN_EFFECTIVENESS,
                    MAX_EFFECTIVENESS
                )));
            }
            let key = score.key.clone();
            if scores.insert(key.clone(), score).is_some() {
                return Err(duplicate_key("score", &key));
            }
        }

        let learning_data = index_unique(snapshot.learning_data, |d| d.key.clone(), "learning data")?;
        let intervention_patterns =
            index_unique(snapshot.intervention_patterns, |p| p.key.clone(), "intervention pattern")?;
        let insight_patterns = index_unique(snapshot.insight_patterns, |p| p.key.clone(), "insight pattern")?;

        let mut state = self.state.lock();
        *state = LearningState {
            scores,
            learning_data,
            intervention_patterns,
            insight_patterns,
            recent_outcomes: snapshot.recent_outcomes,
            outcomes_recorded: snapshot.outcomes_recorded,
            breakthroughs_recorded: snapshot.breakthroughs_recorded,
            pending: snapshot.pending_adaptations.into_iter().collect(),
        };
        tracing::info!(scores = state.scores.len(), "learning snapshot imported");
        Ok(())
    }
}

/// Each plugin's share of the round, from `attribution_weight` (default 1.0).
///
/// Missing, negative or non-finite weights count as 1.0. If every weight is
/// zero the credit is split evenly.
fn attribution_shares(interventions: &[Intervention]) -> BTreeMap<String, f64> {
    let weights: Vec<(&str, f64)> = interventions
        .iter()
        .map(|i| {
            let weight = match i.metadata.attribution_weight {
                Some(w) if w.is_finite() && w >= 0.0 => w,
                _ => 1.0,
            };
            (i.plugin_id(), weight)
        })
        .collect();

    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    let even = 1.0 / weights.len().max(1) as f64;

    let mut shares = BTreeMap::new();
    for (plugin_id, weight) in weights {
        let share = if total > 0.0 { weight / total } else { even };
        *shares.entry(plugin_id.to_string()).or_insert(0.0) += share;
    }
    shares
}

fn index_unique<K, V, F>(items: Vec<V>, key_of: F, what: &str) -> Result<HashMap<K, V>>
where
    K: std::hash::Hash + Eq + std::fmt::Debug,
    F: Fn(&V) -> K,
{
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        let key = key_of(&item);
        if map.contains_key(&key) {
            return Err(duplicate_key(what, &key));
        }
        map.insert(key, item);
    }
    Ok(map)
}

fn duplicate_key(what: &str, key: &impl std::fmt::Debug) -> OrchestratorError {
    OrchestratorError::InvalidSnapshot(format!("duplicate {} entry for {:?}", what, key))
}
