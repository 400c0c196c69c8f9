//! Admission control: rank candidates, then admit greedily
//!
//! This is the CPU-only middle of a round. Given the activations that came
//! back and a snapshot of the conflict relation, it produces the admitted
//! set in rank order. The result satisfies, by construction:
//!
//! 1. no two admitted plugins conflict with each other
//! 2. admitted count <= `max_concurrent_plugins`
//! 3. with a budget, summed cognitive load <= budget
//!
//! Ties on effective priority are broken by plugin id ascending, so the same
//! inputs always produce the same admission order.

use crate::config::{OrchestrationConfig, RankingPolicy};
use crate::learning::MIN_EFFECTIVENESS;
use crate::types::Activation;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A plugin that asked to take part in the round
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub plugin_id: String,
    pub activation: Activation,
    /// Learned effectiveness for this context's (domain, bucket)
    pub effectiveness: f64,
    /// Priority used for ranking under the configured policy
    pub effective_priority: f64,
}

impl Candidate {
    pub fn new(
        plugin_id: impl Into<String>,
        activation: Activation,
        effectiveness: f64,
        policy: RankingPolicy,
    ) -> Self {
        let declared = activation.priority;
        let raw = match policy {
            RankingPolicy::Declared => declared,
            // Dividing a negative priority keeps "more effective ranks higher"
            RankingPolicy::Adaptive if declared < 0.0 => declared / effectiveness.max(MIN_EFFECTIVENESS),
            RankingPolicy::Adaptive => declared * effectiveness,
        };
        // NaN would poison the sort; rank it last instead
        let effective_priority = if raw.is_nan() { f64::NEG_INFINITY } else { raw };
        Self {
            plugin_id: plugin_id.into(),
            activation,
            effectiveness,
            effective_priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdmittedPlugin {
    pub plugin_id: String,
    /// Position in admission order, starting at 0
    pub rank: usize,
    pub declared_priority: f64,
    pub effective_priority: f64,
    pub effectiveness: f64,
    pub cognitive_load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// Conflicts with an already-admitted plugin
    Conflict { with: String },
    ConcurrencyCap,
    ResourceBudget { required: f64, remaining: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedCandidate {
    pub plugin_id: String,
    pub effective_priority: f64,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdmissionDecision {
    pub admitted: Vec<AdmittedPlugin>,
    pub skipped: Vec<SkippedCandidate>,
    pub total_load: f64,
}

impl AdmissionDecision {
    pub fn admitted_ids(&self) -> Vec<&str> {
        self.admitted.iter().map(|a| a.plugin_id.as_str()).collect()
    }
}

/// Sort by effective priority descending, then plugin id ascending
pub fn rank_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare_rank);
}

fn compare_rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.effective_priority
        .total_cmp(&a.effective_priority)
        .then_with(|| a.plugin_id.cmp(&b.plugin_id))
}

/// Rank `candidates` and walk them once, admitting every candidate that fits
pub fn admit(
    mut candidates: Vec<Candidate>,
    conflicts: &HashMap<String, BTreeSet<String>>,
    config: &OrchestrationConfig,
) -> AdmissionDecision {
    rank_candidates(&mut candidates);

    let mut decision = AdmissionDecision::default();
    let mut admitted_ids: HashSet<String> = HashSet::new();
    // Round-scoped: plugin id -> the admitted plugin that excluded it
    let mut excluded: HashMap<String, String> = HashMap::new();

    for candidate in candidates {
        let id = candidate.plugin_id.clone();

        let blocked_by = excluded.get(&id).cloned().or_else(|| {
            conflicts
                .get(&id)
                .and_then(|own| own.iter().find(|peer| admitted_ids.contains(*peer)).cloned())
        });
        if let Some(with) = blocked_by {
            tracing::debug!(plugin_id = %id, conflicts_with = %with, "skipped: conflict");
            decision.skipped.push(SkippedCandidate {
                plugin_id: id,
                effective_priority: candidate.effective_priority,
                reason: SkipReason::Conflict { with },
            });
            continue;
        }

        if decision.admitted.len() >= config.max_concurrent_plugins {
            tracing::debug!(plugin_id = %id, "skipped: concurrency cap reached");
            decision.skipped.push(SkippedCandidate {
                plugin_id: id,
                effective_priority: candidate.effective_priority,
                reason: SkipReason::ConcurrencyCap,
            });
            continue;
        }

        let load = candidate.activation.cognitive_load();
        if let Some(budget) = config.resource_budget {
            if decision.total_load + load > budget {
                tracing::debug!(plugin_id = %id, load, budget, "skipped: resource budget");
                decision.skipped.push(SkippedCandidate {
                    plugin_id: id,
                    effective_priority: candidate.effective_priority,
                    reason: SkipReason::ResourceBudget {
                        required: load,
                        remaining: budget - decision.total_load,
                    },
                });
                continue;
            }
        }

        if let Some(peers) = conflicts.get(&id) {
            for peer in peers {
                excluded.entry(peer.clone()).or_insert_with(|| id.clone());
            }
        }
        decision.total_load += load;
        decision.admitted.push(AdmittedPlugin {
            plugin_id: id.clone(),
            rank: decision.admitted.len(),
            declared_priority: candidate.activation.priority,
            effective_priority: candidate.effective_priority,
            effectiveness: candidate.effectiveness,
            cognitive_load: load,
        });
        admitted_ids.insert(id);
    }

    decision
}
