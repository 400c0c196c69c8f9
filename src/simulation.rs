//! Seeded simulation of the orchestrate / report-outcome loop
//!
//! Synthetic plugins have a hidden quality. Each round draws a random
//! context, runs a full orchestration, scores the round by the mean quality
//! of what came back (plus noise) and reports that outcome to the learning
//! engine. Over many rounds this shows how adaptive ranking shifts
//! admissions toward plugins that actually help.

use crate::config::{EngineConfig, OrchestrationConfig};
use crate::learning::EffectivenessScore;
use crate::orchestrator::PluginOrchestrator;
use crate::plugin::{Plugin, PluginMetadata};
use crate::registry::PluginRegistry;
use crate::types::{Activation, Context, Insight, Intervention, OutcomeLabel, Urgency};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One synthetic plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticPluginSpec {
    pub id: String,
    pub priority: f64,
    #[serde(default)]
    pub cognitive_load: f64,
    /// Impact this plugin contributes when it runs (0-1)
    pub quality: f64,
    /// Probability that an `intervene` call errors
    #[serde(default)]
    pub failure_rate: f64,
}

impl SyntheticPluginSpec {
    pub fn new(id: &str, priority: f64, quality: f64) -> Self {
        Self {
            id: id.to_string(),
            priority,
            cognitive_load: 0.2,
            quality,
            failure_rate: 0.0,
        }
    }

    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate;
        self
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub rounds: u32,
    /// Random seed for reproducibility (None = random)
    pub seed: Option<u64>,
    pub plugins: Vec<SyntheticPluginSpec>,
    /// Conflicting pairs of plugin ids
    pub conflicts: Vec<(String, String)>,
    pub domains: Vec<String>,
    /// Inclusive range contexts draw their complexity from
    pub complexity_range: (f64, f64),
    /// Uniform noise added to each round's impact, +/- this much
    pub noise: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rounds: 200,
            seed: None,
            plugins: vec![
                SyntheticPluginSpec::new("socratic", 60.0, 0.8),
                SyntheticPluginSpec::new("devils-advocate", 70.0, 0.2),
                SyntheticPluginSpec::new("analogy", 50.0, 0.6),
                SyntheticPluginSpec::new("first-principles", 55.0, 0.7).with_failure_rate(0.3),
            ],
            conflicts: vec![("socratic".to_string(), "devils-advocate".to_string())],
            domains: vec![
                "architecture".to_string(),
                "debugging".to_string(),
                "planning".to_string(),
            ],
            complexity_range: (0.0, 10.0),
            noise: 0.1,
        }
    }
}

/// Distribution of simulated outcomes
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutcomeDistribution {
    pub success_rate: f64,
    pub partial_rate: f64,
    pub failure_rate: f64,
}

/// Results from a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResults {
    pub rounds: u32,
    /// Fraction of rounds each plugin was admitted in
    pub admission_rates: BTreeMap<String, f64>,
    pub mean_impact: f64,
    /// 95% confidence interval for mean impact
    pub confidence_interval_95: (f64, f64),
    /// Variance of admission rates across plugins (higher = more skewed)
    pub admission_variance: f64,
    pub outcomes: OutcomeDistribution,
    pub plugin_failures: usize,
    pub cancelled_rounds: usize,
    /// Best learned scores at the end of the run
    pub top_scores: Vec<EffectivenessScore>,
}

struct SyntheticPlugin {
    meta: PluginMetadata,
    quality: f64,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

#[async_trait]
impl Plugin for SyntheticPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn should_activate(&self, context: &Context) -> Result<Activation> {
        if !self.meta.applies_to(context) {
            return Ok(Activation::skip());
        }
        Ok(self.meta.baseline_activation().with_confidence(self.quality))
    }

    async fn intervene(&self, _context: &Context) -> Result<Intervention> {
        let roll: f64 = self.rng.lock().gen();
        if roll < self.failure_rate {
            anyhow::bail!("synthetic failure in '{}'", self.meta.id);
        }
        Ok(Intervention::new(
            &self.meta.id,
            "synthetic",
            serde_json::json!({ "quality": self.quality }),
        )
        .with_confidence(self.quality)
        .with_expected_benefit(self.quality))
    }
}

pub struct Simulation {
    config: SimulationConfig,
    orchestration: OrchestrationConfig,
    orchestrator: PluginOrchestrator,
}

impl Simulation {
    pub fn new(engine: &EngineConfig, config: SimulationConfig) -> Result<Self> {
        if config.plugins.is_empty() {
            anyhow::bail!("simulation needs at least one synthetic plugin");
        }
        if config.domains.is_empty() {
            anyhow::bail!("simulation needs at least one domain");
        }
        let (low, high) = config.complexity_range;
        if !(low.is_finite() && high.is_finite() && low <= high) {
            anyhow::bail!("invalid complexity range {:?}", config.complexity_range);
        }

        let registry = Arc::new(PluginRegistry::new());
        for (i, spec) in config.plugins.iter().enumerate() {
            let rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64 + 1)),
                None => StdRng::from_entropy(),
            };
            registry.register(Arc::new(SyntheticPlugin {
                meta: PluginMetadata::new(&spec.id, spec.priority).with_load(spec.cognitive_load),
                quality: spec.quality,
                failure_rate: spec.failure_rate,
                rng: Mutex::new(rng),
            }));
        }
        for (a, b) in &config.conflicts {
            let mut peers = registry.conflicts_with(a);
            peers.insert(b.clone());
            registry
                .set_conflicts(a, peers)
                .with_context(|| format!("Failed to set conflict {} <-> {}", a, b))?;
        }

        let orchestrator = PluginOrchestrator::from_config(engine, registry)?;
        Ok(Self {
            config,
            orchestration: engine.orchestration.clone(),
            orchestrator,
        })
    }

    pub fn orchestrator(&self) -> &PluginOrchestrator {
        &self.orchestrator
    }

    /// Run every configured round
    pub async fn run(&self) -> Result<SimulationResults> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut admissions: BTreeMap<String, u32> =
            self.config.plugins.iter().map(|p| (p.id.clone(), 0)).collect();
        let mut impacts: Vec<f64> = Vec::with_capacity(self.config.rounds as usize);
        let mut outcome_counts = [0u32; 3];
        let mut plugin_failures = 0;
        let mut cancelled_rounds = 0;

        for _ in 0..self.config.rounds {
            let context = self.random_context(&mut rng);
            let report = self.orchestrator.orchestrate(&context, &self.orchestration).await?;

            for admitted in &report.admitted {
                *admissions.entry(admitted.plugin_id.clone()).or_insert(0) += 1;
            }
            plugin_failures += report.failures.len();
            if report.cancelled {
                cancelled_rounds += 1;
            }

            let qualities: Vec<f64> = report
                .interventions
                .iter()
                .filter_map(|i| i.content.get("quality").and_then(|q| q.as_f64()))
                .collect();
            let impact = if qualities.is_empty() {
                0.0
            } else {
                let mean = qualities.iter().sum::<f64>() / qualities.len() as f64;
                let jitter = if self.config.noise > 0.0 {
                    rng.gen_range(-self.config.noise..=self.config.noise)
                } else {
                    0.0
                };
                (mean + jitter).clamp(0.0, 1.0)
            };
            impacts.push(impact);

            let label = outcome_label(impact);
            outcome_counts[match label {
                OutcomeLabel::Success => 0,
                OutcomeLabel::Partial => 1,
                OutcomeLabel::Failure => 2,
            }] += 1;

            self.orchestrator
                .report_outcome(&context, &report, label, impact)
                .await?;

            let insights: Vec<Insight> = report
                .interventions
                .iter()
                .map(|i| Insight {
                    content: i.intervention_type.clone(),
                    novelty: rng.gen(),
                    confidence: i.metadata.confidence,
                })
                .collect();
            self.orchestrator
                .learning()
                .record_insight_patterns(&context, &insights)?;
            self.orchestrator.drain_adaptations().await;
        }

        let n = self.config.rounds.max(1) as f64;
        let admission_rates: BTreeMap<String, f64> = admissions
            .into_iter()
            .map(|(id, count)| (id, count as f64 / n))
            .collect();

        let (mean_impact, ci_95) = mean_with_ci(&impacts);
        let total = outcome_counts.iter().sum::<u32>().max(1) as f64;
        let mut top_scores = self.orchestrator.learning().scores();
        top_scores.truncate(10);

        let results = SimulationResults {
            rounds: self.config.rounds,
            admission_variance: variance(admission_rates.values().copied()),
            admission_rates,
            mean_impact,
            confidence_interval_95: ci_95,
            outcomes: OutcomeDistribution {
                success_rate: outcome_counts[0] as f64 / total,
                partial_rate: outcome_counts[1] as f64 / total,
                failure_rate: outcome_counts[2] as f64 / total,
            },
            plugin_failures,
            cancelled_rounds,
            top_scores,
        };
        tracing::info!(
            rounds = results.rounds,
            mean_impact = results.mean_impact,
            failures = results.plugin_failures,
            "simulation complete"
        );
        Ok(results)
    }

    fn random_context(&self, rng: &mut StdRng) -> Context {
        let domain = self.config.domains[rng.gen_range(0..self.config.domains.len())].clone();
        let (low, high) = self.config.complexity_range;
        let urgency = match rng.gen_range(0..3) {
            0 => Urgency::Low,
            1 => Urgency::Medium,
            _ => Urgency::High,
        };
        Context::new(rng.gen_range(low..=high))
            .with_domain(domain)
            .with_urgency(urgency)
    }
}

fn outcome_label(impact: f64) -> OutcomeLabel {
    if impact >= 0.6 {
        OutcomeLabel::Success
    } else if impact >= 0.3 {
        OutcomeLabel::Partial
    } else {
        OutcomeLabel::Failure
    }
}

/// Mean and 95% CI (mean +/- 1.96 * standard error)
fn mean_with_ci(samples: &[f64]) -> (f64, (f64, f64)) {
    if samples.is_empty() {
        return (0.0, (0.0, 0.0));
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let std_error = variance(samples.iter().copied()).sqrt() / n.sqrt();
    (mean, (mean - 1.96 * std_error, mean + 1.96 * std_error))
}

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankingPolicy;

    fn duel(seed: u64) -> SimulationConfig {
        SimulationConfig {
            rounds: 60,
            seed: Some(seed),
            plugins: vec![
                SyntheticPluginSpec::new("socratic", 60.0, 0.8),
                SyntheticPluginSpec::new("devils-advocate", 70.0, 0.2),
            ],
            conflicts: vec![("socratic".to_string(), "devils-advocate".to_string())],
            domains: vec!["ops".to_string()],
            complexity_range: (5.0, 5.0),
            noise: 0.05,
        }
    }

    #[test]
    fn test_variance() {
        assert_eq!(variance([0.5, 0.5, 0.5].into_iter()), 0.0);
        assert!(variance([0.0, 1.0].into_iter()) > 0.2);
        assert_eq!(variance(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(0.9), OutcomeLabel::Success);
        assert_eq!(outcome_label(0.4), OutcomeLabel::Partial);
        assert_eq!(outcome_label(0.1), OutcomeLabel::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_ranking_promotes_better_plugin() {
        let sim = Simulation::new(&EngineConfig::default(), duel(7)).unwrap();
        let results = sim.run().await.unwrap();

        assert!(results.admission_rates["socratic"] > 0.5);
        assert!(results.admission_rates["devils-advocate"] < 0.5);
        assert_eq!(results.top_scores[0].key.plugin_id, "socratic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_declared_ranking_never_promotes() {
        let mut engine = EngineConfig::default();
        engine.orchestration.ranking = RankingPolicy::Declared;
        let sim = Simulation::new(&engine, duel(7)).unwrap();
        let results = sim.run().await.unwrap();

        assert_eq!(results.admission_rates["socratic"], 0.0);
        assert_eq!(results.admission_rates["devils-advocate"], 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_results() {
        let first = Simulation::new(&EngineConfig::default(), SimulationConfig {
            seed: Some(42),
            rounds: 40,
            ..Default::default()
        })
        .unwrap()
        .run()
        .await
        .unwrap();
        let second = Simulation::new(&EngineConfig::default(), SimulationConfig {
            seed: Some(42),
            rounds: 40,
            ..Default::default()
        })
        .unwrap()
        .run()
        .await
        .unwrap();

        assert_eq!(first.admission_rates, second.admission_rates);
        assert_eq!(first.mean_impact, second.mean_impact);
        assert_eq!(first.plugin_failures, second.plugin_failures);
    }

    #[test]
    fn test_rejects_empty_plugin_list() {
        let config = SimulationConfig {
            plugins: Vec::new(),
            ..Default::default()
        };
        assert!(Simulation::new(&EngineConfig::default(), config).is_err());
    }
}
