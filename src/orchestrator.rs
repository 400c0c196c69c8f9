//! Plugin Orchestrator
//!
//! One round:
//! 1. snapshot the registry and ask every plugin, concurrently, whether it
//!    wants in (`"<id>:activation"` through the resilience wrapper)
//! 2. rank the volunteers and run admission control
//! 3. invoke the admitted plugins concurrently (`"<id>:intervene"`)
//! 4. return interventions in admission rank order
//!
//! A failing plugin never fails the round. Its error is reported in the
//! round's failures, appended to the recent-failures log and sent to any
//! observers. Calls still in flight when a round is cut short are reported
//! as `Abandoned`. A plugin whose invocation fails may supply a stand-in
//! through `Plugin::fallback`, which then takes its place in rank order.

use crate::admission::{self, AdmittedPlugin, Candidate, SkippedCandidate};
use crate::config::{EngineConfig, HistoryCaps, OrchestrationConfig};
use crate::error::{OrchestratorError, Result};
use crate::history::BoundedHistory;
use crate::learning::{AdaptationTrigger, LearningEngine, OutcomeSummary};
use crate::plugin::{Plugin, PluginFeedback};
use crate::registry::PluginRegistry;
use crate::resilience::ResilienceWrapper;
use crate::types::{Context, Intervention, OutcomeLabel};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Activation,
    Intervention,
}

/// A plugin that dropped out of a round because a call failed
#[derive(Debug, Clone, PartialEq)]
pub struct PluginFailure {
    pub round_id: String,
    pub plugin_id: String,
    pub stage: FailureStage,
    pub error: OrchestratorError,
    pub occurred_at: DateTime<Utc>,
}

/// Everything a caller needs to know about one round
#[derive(Debug, Clone)]
pub struct RoundReport {
    pub round_id: String,
    /// In admission rank order
    pub interventions: Vec<Intervention>,
    pub admitted: Vec<AdmittedPlugin>,
    pub skipped: Vec<SkippedCandidate>,
    pub failures: Vec<PluginFailure>,
    /// Set when the round was cut short by cancellation or its deadline
    pub cancelled: bool,
}

impl RoundReport {
    fn empty(round_id: String) -> Self {
        Self {
            round_id,
            interventions: Vec::new(),
            admitted: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn admitted_ids(&self) -> Vec<&str> {
        self.admitted.iter().map(|a| a.plugin_id.as_str()).collect()
    }

    pub fn intervention_ids(&self) -> Vec<&str> {
        self.interventions.iter().map(|i| i.plugin_id()).collect()
    }
}

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    RoundCompleted {
        round_id: String,
        admitted: Vec<String>,
        interventions: usize,
        failures: usize,
        cancelled: bool,
    },
    PluginFailed(PluginFailure),
}

pub struct PluginOrchestrator {
    registry: Arc<PluginRegistry>,
    learning: Arc<LearningEngine>,
    resilience: ResilienceWrapper,
    failures: Mutex<BoundedHistory<PluginFailure>>,
    observers: Mutex<Vec<UnboundedSender<OrchestratorEvent>>>,
}

impl PluginOrchestrator {
    pub fn new(
        registry: Arc<PluginRegistry>,
        learning: Arc<LearningEngine>,
        resilience: ResilienceWrapper,
        caps: &HistoryCaps,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            learning,
            resilience,
            failures: Mutex::new(BoundedHistory::new(caps.failure_log)?),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Build the learning engine and resilience wrapper from `config` around an existing registry
    pub fn from_config(config: &EngineConfig, registry: Arc<PluginRegistry>) -> Result<Self> {
        config.validate()?;
        let learning = Arc::new(LearningEngine::new(config.learning.clone(), config.caps.clone())?);
        let resilience = ResilienceWrapper::new(config.resilience.clone())?;
        Self::new(registry, learning, resilience, &config.caps)
    }

    pub fn with_observer(self, observer: UnboundedSender<OrchestratorEvent>) -> Self {
        self.observers.lock().push(observer);
        self
    }

    pub fn subscribe(&self) -> UnboundedReceiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    pub fn resilience(&self) -> &ResilienceWrapper {
        &self.resilience
    }

    pub async fn orchestrate(&self, context: &Context, config: &OrchestrationConfig) -> Result<RoundReport> {
        self.orchestrate_with_cancel(context, config, CancellationToken::new())
            .await
    }

    /// Run one round. Cancelling `cancel` (or hitting the configured round
    /// deadline) drops in-flight calls and returns what finished so far,
    /// unless `require_complete` is set.
    pub async fn orchestrate_with_cancel(
        &self,
        context: &Context,
        config: &OrchestrationConfig,
        cancel: CancellationToken,
    ) -> Result<RoundReport> {
        config.validate()?;

        let round_id = Uuid::new_v4().to_string();
        let snapshot = self.registry.snapshot();
        if snapshot.plugins.is_empty() && config.require_admission {
            return Err(OrchestratorError::EmptyRegistry);
        }

        let deadline = config.round_deadline().map(|d| Instant::now() + d);
        let mut report = RoundReport::empty(round_id.clone());
        let plugins: HashMap<String, Arc<dyn Plugin>> = snapshot
            .plugins
            .iter()
            .map(|p| (p.id().to_string(), Arc::clone(p)))
            .collect();

        // Activation
        let queries: FuturesUnordered<_> = snapshot
            .plugins
            .iter()
            .map(|plugin| {
                let plugin = Arc::clone(plugin);
                async move {
                    let key = format!("{}:activation", plugin.id());
                    let result = self
                        .resilience
                        .execute(&key, || plugin.should_activate(context))
                        .await;
                    (plugin.id().to_string(), result)
                }
            })
            .collect();
        let (answers, interrupted) = collect_until(queries, &cancel, deadline).await;
        let unanswered: Vec<String> = if interrupted {
            snapshot
                .plugins
                .iter()
                .map(|p| p.id().to_string())
                .filter(|id| !answers.iter().any(|(answered, _)| answered == id))
                .collect()
        } else {
            Vec::new()
        };

        let ids: Vec<&str> = answers.iter().map(|(id, _)| id.as_str()).collect();
        let effectiveness = self.learning.effectiveness_for(&ids, context);

        let mut candidates = Vec::new();
        for (plugin_id, answer) in answers {
            match answer {
                Ok(activation) if activation.should_activate => {
                    let score = effectiveness
                        .get(&plugin_id)
                        .copied()
                        .unwrap_or(crate::learning::INITIAL_EFFECTIVENESS);
                    candidates.push(Candidate::new(plugin_id, activation, score, config.ranking));
                }
                Ok(_) => {
                    tracing::debug!(round_id = %round_id, plugin_id = %plugin_id, "plugin declined");
                }
                Err(err) => {
                    // An open circuit stays matchable; anything else is the plugin's own failure
                    let error = match err {
                        OrchestratorError::CircuitOpen { .. } => err,
                        other => OrchestratorError::ActivationQueryFailure {
                            plugin_id: plugin_id.clone(),
                            message: other.to_string(),
                        },
                    };
                    report
                        .failures
                        .push(self.failure(&round_id, plugin_id, FailureStage::Activation, error));
                }
            }
        }

        if interrupted {
            for plugin_id in unanswered {
                let error = OrchestratorError::Abandoned {
                    key: format!("{}:activation", plugin_id),
                };
                report
                    .failures
                    .push(self.failure(&round_id, plugin_id, FailureStage::Activation, error));
            }
            report.cancelled = true;
            return self.finish(report, config);
        }

        // Admission
        let decision = admission::admit(candidates, &snapshot.conflicts, config);
        report.skipped = decision.skipped;

        // Invocation
        let calls: FuturesUnordered<_> = decision
            .admitted
            .iter()
            .filter_map(|admitted| {
                let plugin = plugins.get(&admitted.plugin_id).cloned()?;
                let rank = admitted.rank;
                Some(async move {
                    let key = format!("{}:intervene", plugin.id());
                    let result = self
                        .resilience
                        .execute_with_fallback(&key, || plugin.intervene(context), |err| plugin.fallback(context, err))
                        .await;
                    (rank, plugin.id().to_string(), result)
                })
            })
            .collect();
        let (mut results, interrupted) = collect_until(calls, &cancel, deadline).await;
        report.admitted = decision.admitted;
        report.cancelled = interrupted;

        // Admission order, so abandoned failures come out ranked too
        let abandoned: Vec<String> = if interrupted {
            report
                .admitted
                .iter()
                .map(|a| a.plugin_id.clone())
                .filter(|id| !results.iter().any(|(_, finished, _)| finished == id))
                .collect()
        } else {
            Vec::new()
        };

        results.sort_by_key(|(rank, _, _)| *rank);
        for (_, plugin_id, result) in results {
            match result {
                Ok(mut intervention) => {
                    if intervention.metadata.plugin_id != plugin_id {
                        tracing::debug!(
                            plugin_id = %plugin_id,
                            reported = %intervention.metadata.plugin_id,
                            "overriding mismatched intervention plugin id"
                        );
                        intervention.metadata.plugin_id = plugin_id;
                    }
                    report.interventions.push(intervention);
                }
                Err(error) => {
                    report
                        .failures
                        .push(self.failure(&round_id, plugin_id, FailureStage::Intervention, error));
                }
            }
        }
        for plugin_id in abandoned {
            let error = OrchestratorError::Abandoned {
                key: format!("{}:intervene", plugin_id),
            };
            report
                .failures
                .push(self.failure(&round_id, plugin_id, FailureStage::Intervention, error));
        }

        self.finish(report, config)
    }

    /// Feed an outcome for `report` into the learning engine, then tell each
    /// contributing plugin how it was scored
    pub async fn report_outcome(
        &self,
        context: &Context,
        report: &RoundReport,
        outcome: OutcomeLabel,
        impact: f64,
    ) -> Result<OutcomeSummary> {
        let summary = self
            .learning
            .record_outcome(context, &report.interventions, outcome, impact)?;
        self.learning
            .record_intervention_patterns(context, &report.interventions)?;

        for update in &summary.updates {
            let Some(plugin) = self.registry.get(&update.plugin_id) else {
                continue;
            };
            let feedback = PluginFeedback {
                plugin_id: update.plugin_id.clone(),
                outcome,
                attributed_impact: update.attributed_impact,
                effectiveness: update.new_score,
            };
            if let Err(err) = plugin.receive_feedback(&feedback).await {
                tracing::warn!(plugin_id = %update.plugin_id, error = %err, "plugin rejected feedback");
            }
        }
        Ok(summary)
    }

    /// Drain pending adaptation triggers and forward each to every registered plugin
    pub async fn drain_adaptations(&self) -> Vec<AdaptationTrigger> {
        let triggers = self.learning.drain_adaptations();
        if triggers.is_empty() {
            return triggers;
        }
        let snapshot = self.registry.snapshot();
        for trigger in &triggers {
            for plugin in &snapshot.plugins {
                if let Err(err) = plugin.adapt(trigger).await {
                    tracing::warn!(plugin_id = %plugin.id(), trigger = %trigger, error = %err, "adaptation failed");
                }
            }
        }
        triggers
    }

    /// Up to `n` most recent plugin failures, oldest first
    pub fn recent_failures(&self, n: usize) -> Vec<PluginFailure> {
        self.failures.lock().recent(n).into_iter().cloned().collect()
    }

    fn failure(
        &self,
        round_id: &str,
        plugin_id: String,
        stage: FailureStage,
        error: OrchestratorError,
    ) -> PluginFailure {
        tracing::warn!(round_id = %round_id, plugin_id = %plugin_id, ?stage, error = %error, "plugin failed");
        PluginFailure {
            round_id: round_id.to_string(),
            plugin_id,
            stage,
            error,
            occurred_at: Utc::now(),
        }
    }

    fn finish(&self, report: RoundReport, config: &OrchestrationConfig) -> Result<RoundReport> {
        {
            let mut log = self.failures.lock();
            for failure in &report.failures {
                log.push(failure.clone());
            }
        }
        for failure in &report.failures {
            self.emit(OrchestratorEvent::PluginFailed(failure.clone()));
        }

        tracing::info!(
            round_id = %report.round_id,
            admitted = report.admitted.len(),
            interventions = report.interventions.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "round complete"
        );
        self.emit(OrchestratorEvent::RoundCompleted {
            round_id: report.round_id.clone(),
            admitted: report.admitted.iter().map(|a| a.plugin_id.clone()).collect(),
            interventions: report.interventions.len(),
            failures: report.failures.len(),
            cancelled: report.cancelled,
        });

        if report.cancelled && config.require_complete {
            return Err(OrchestratorError::Cancelled {
                round_id: report.round_id,
            });
        }
        Ok(report)
    }

    fn emit(&self, event: OrchestratorEvent) {
        // Closed receivers are dropped from the list
        self.observers
            .lock()
            .retain(|observer| observer.send(event.clone()).is_ok());
    }
}

/// Drive `pending` to completion, or until cancelled or past `deadline`.
/// Returns finished outputs and whether the wait was cut short.
async fn collect_until<F>(
    mut pending: FuturesUnordered<F>,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
) -> (Vec<F::Output>, bool)
where
    F: Future,
{
    let mut done = Vec::with_capacity(pending.len());
    let expired = wait_until(deadline);
    tokio::pin!(expired);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(in_flight = pending.len(), "round cancelled");
                return (done, true);
            }
            _ = &mut expired => {
                tracing::debug!(in_flight = pending.len(), "round deadline reached");
                return (done, true);
            }
            next = pending.next() => match next {
                Some(output) => done.push(output),
                None => return (done, false),
            },
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LearningConfig, ResilienceConfig};
    use crate::plugin::PluginMetadata;
    use crate::types::Activation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        FailActivation,
        Decline,
        FailIntervene,
        FailWithFallback,
        SlowIntervene(Duration),
    }

    struct Scripted {
        meta: PluginMetadata,
        behavior: Behavior,
        intervene_calls: AtomicUsize,
        feedback: Mutex<Vec<PluginFeedback>>,
        adaptations: Mutex<Vec<AdaptationTrigger>>,
    }

    impl Scripted {
        fn new(id: &str, priority: f64, load: f64, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                meta: PluginMetadata::new(id, priority).with_load(load),
                behavior,
                intervene_calls: AtomicUsize::new(0),
                feedback: Mutex::new(Vec::new()),
                adaptations: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Plugin for Scripted {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }

        async fn should_activate(&self, _context: &Context) -> anyhow::Result<Activation> {
            match self.behavior {
                Behavior::FailActivation => anyhow::bail!("activation exploded"),
                Behavior::Decline => Ok(Activation::skip()),
                _ => Ok(self.meta.baseline_activation()),
            }
        }

        async fn intervene(&self, _context: &Context) -> anyhow::Result<Intervention> {
            self.intervene_calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::FailIntervene | Behavior::FailWithFallback => anyhow::bail!("intervention exploded"),
                Behavior::SlowIntervene(delay) => tokio::time::sleep(delay).await,
                _ => {}
            }
            Ok(Intervention::new(&self.meta.id, "prompt", serde_json::json!({})))
        }

        fn fallback(&self, _context: &Context, _error: &OrchestratorError) -> Option<Intervention> {
            match self.behavior {
                Behavior::FailWithFallback => {
                    Some(Intervention::new(&self.meta.id, "fallback", serde_json::json!({})))
                }
                _ => None,
            }
        }

        async fn receive_feedback(&self, feedback: &PluginFeedback) -> anyhow::Result<()> {
            self.feedback.lock().push(feedback.clone());
            Ok(())
        }

        async fn adapt(&self, trigger: &AdaptationTrigger) -> anyhow::Result<()> {
            self.adaptations.lock().push(trigger.clone());
            Ok(())
        }
    }

    fn orchestrator(plugins: &[Arc<Scripted>]) -> PluginOrchestrator {
        orchestrator_with(
            plugins,
            ResilienceConfig {
                max_retries: 0,
                ..Default::default()
            },
        )
    }

    fn orchestrator_with(plugins: &[Arc<Scripted>], resilience: ResilienceConfig) -> PluginOrchestrator {
        let registry = Arc::new(PluginRegistry::new());
        for plugin in plugins {
            registry.register(plugin.clone());
        }
        let learning = Arc::new(LearningEngine::new(LearningConfig::default(), HistoryCaps::default()).unwrap());
        let resilience = ResilienceWrapper::new(resilience).unwrap();
        PluginOrchestrator::new(registry, learning, resilience, &HistoryCaps::default()).unwrap()
    }

    fn hair_trigger() -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 0,
            failure_threshold: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_plugin_is_skipped() {
        let a = Scripted::new("A", 90.0, 0.6, Behavior::Ok);
        let b = Scripted::new("B", 80.0, 0.4, Behavior::Ok);
        let c = Scripted::new("C", 70.0, 0.3, Behavior::Ok);
        let orch = orchestrator(&[a, b.clone(), c]);
        orch.registry().set_conflicts("A", ["B"]).unwrap();

        let report = orch
            .orchestrate(&Context::new(5.0), &OrchestrationConfig::default())
            .await
            .unwrap();

        assert_eq!(report.admitted_ids(), vec!["A", "C"]);
        assert_eq!(report.intervention_ids(), vec!["A", "C"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(b.intervene_calls.load(Ordering::SeqCst), 0);
        assert!(report.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_failures_and_declines_are_excluded() {
        let ok = Scripted::new("ok", 50.0, 0.1, Behavior::Ok);
        let broken = Scripted::new("broken", 99.0, 0.1, Behavior::FailActivation);
        let shy = Scripted::new("shy", 99.0, 0.1, Behavior::Decline);
        let orch = orchestrator(&[ok, broken, shy]);

        let report = orch
            .orchestrate(&Context::new(5.0), &OrchestrationConfig::default())
            .await
            .unwrap();

        assert_eq!(report.intervention_ids(), vec!["ok"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].plugin_id, "broken");
        assert_eq!(report.failures[0].stage, FailureStage::Activation);
        assert!(matches!(
            report.failures[0].error,
            OrchestratorError::ActivationQueryFailure { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_failure_is_isolated_and_observed() {
        let good = Scripted::new("good", 50.0, 0.1, Behavior::Ok);
        let bad = Scripted::new("bad", 60.0, 0.1, Behavior::FailIntervene);
        let orch = orchestrator(&[good, bad]);
        let mut events = orch.subscribe();

        let report = orch
            .orchestrate(&Context::new(5.0), &OrchestrationConfig::default())
            .await
            .unwrap();

        assert_eq!(report.admitted_ids(), vec!["bad", "good"]);
        assert_eq!(report.intervention_ids(), vec!["good"]);
        assert!(matches!(
            report.failures[0].error,
            OrchestratorError::InvocationFailure { .. }
        ));
        assert_eq!(orch.recent_failures(10).len(), 1);

        match events.try_recv().unwrap() {
            OrchestratorEvent::PluginFailed(failure) => assert_eq!(failure.plugin_id, "bad"),
            other => panic!("unexpected event: {:?}", other),
        }
        match events.try_recv().unwrap() {
            OrchestratorEvent::RoundCompleted { failures, .. } => assert_eq!(failures, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let orch = orchestrator(&[]);
        let report = orch
            .orchestrate(&Context::new(1.0), &OrchestrationConfig::default())
            .await
            .unwrap();
        assert!(report.interventions.is_empty());

        let strict = OrchestrationConfig {
            require_admission: true,
            ..Default::default()
        };
        let err = orch.orchestrate(&Context::new(1.0), &strict).await.unwrap_err();
        assert_eq!(err, OrchestratorError::EmptyRegistry);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let orch = orchestrator(&[Scripted::new("a", 1.0, 0.0, Behavior::Ok)]);
        let err = orch
            .orchestrate(&Context::new(1.0), &OrchestrationConfig::default().with_max_concurrent(0))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfiguration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_results() {
        let fast = Scripted::new("fast", 50.0, 0.1, Behavior::Ok);
        let slow = Scripted::new("slow", 90.0, 0.1, Behavior::SlowIntervene(Duration::from_secs(3)));
        let orch = orchestrator(&[fast, slow]);
        let config = OrchestrationConfig::default().with_deadline(Duration::from_millis(200));

        let report = orch.orchestrate(&Context::new(5.0), &config).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.admitted_ids(), vec!["slow", "fast"]);
        assert_eq!(report.intervention_ids(), vec!["fast"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].plugin_id, "slow");
        assert_eq!(report.failures[0].stage, FailureStage::Intervention);
        assert_eq!(
            report.failures[0].error,
            OrchestratorError::Abandoned { key: "slow:intervene".into() }
        );
        assert_eq!(orch.recent_failures(10), report.failures);

        let strict = OrchestrationConfig {
            require_complete: true,
            ..config
        };
        let err = orch.orchestrate(&Context::new(5.0), &strict).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_pre_cancelled_round_does_nothing() {
        let a = Scripted::new("a", 50.0, 0.1, Behavior::Ok);
        let orch = orchestrator(&[a.clone()]);
        let token = CancellationToken::new();
        token.cancel();

        let report = orch
            .orchestrate_with_cancel(&Context::new(5.0), &OrchestrationConfig::default(), token)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.admitted.is_empty());
        assert_eq!(a.intervene_calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, FailureStage::Activation);
        assert_eq!(
            report.failures[0].error,
            OrchestratorError::Abandoned { key: "a:activation".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_takes_failed_plugins_place() {
        let primary = Scripted::new("primary", 90.0, 0.1, Behavior::FailWithFallback);
        let steady = Scripted::new("steady", 50.0, 0.1, Behavior::Ok);
        let orch = orchestrator_with(&[primary.clone(), steady], hair_trigger());
        let config = OrchestrationConfig::default();

        let first = orch.orchestrate(&Context::new(5.0), &config).await.unwrap();
        assert_eq!(first.intervention_ids(), vec!["primary", "steady"]);
        assert_eq!(first.interventions[0].intervention_type, "fallback");
        assert!(first.failures.is_empty());
        assert_eq!(
            orch.resilience().circuit_state("primary:intervene"),
            crate::resilience::CircuitState::Open
        );

        // circuit open: intervene is skipped and the fallback still fills rank one
        let second = orch.orchestrate(&Context::new(5.0), &config).await.unwrap();
        assert_eq!(second.intervention_ids(), vec!["primary", "steady"]);
        assert_eq!(second.interventions[0].intervention_type, "fallback");
        assert_eq!(primary.intervene_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_activation_circuit_is_reported_as_such() {
        let broken = Scripted::new("broken", 90.0, 0.1, Behavior::FailActivation);
        let orch = orchestrator_with(&[broken], hair_trigger());

        let first = orch
            .orchestrate(&Context::new(5.0), &OrchestrationConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            first.failures[0].error,
            OrchestratorError::ActivationQueryFailure { .. }
        ));

        let second = orch
            .orchestrate(&Context::new(5.0), &OrchestrationConfig::default())
            .await
            .unwrap();
        assert_eq!(second.failures[0].stage, FailureStage::Activation);
        assert_eq!(
            second.failures[0].error,
            OrchestratorError::CircuitOpen { key: "broken:activation".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_outcome_feeds_back_to_plugins() {
        let a = Scripted::new("a", 50.0, 0.1, Behavior::Ok);
        let b = Scripted::new("b", 40.0, 0.1, Behavior::Ok);
        let orch = orchestrator(&[a.clone(), b.clone()]);
        let ctx = Context::new(5.0).with_domain("design");

        let report = orch.orchestrate(&ctx, &OrchestrationConfig::default()).await.unwrap();
        let summary = orch
            .report_outcome(&ctx, &report, OutcomeLabel::Success, 1.0)
            .await
            .unwrap();

        assert_eq!(summary.updates.len(), 2);
        let feedback = a.feedback.lock().clone();
        assert_eq!(feedback.len(), 1);
        assert!((feedback[0].attributed_impact - 0.5).abs() < 1e-9);
        assert!((orch.learning().effectiveness_score("a", "design", 5) - 0.5).abs() < 1e-9);
        assert_eq!(
            orch.learning().intervention_pattern("b", "design", 5).unwrap().total_count,
            1
        );
    }

    #[tokio::test]
    async fn test_drain_adaptations_reaches_every_plugin() {
        let a = Scripted::new("a", 50.0, 0.1, Behavior::Ok);
        let b = Scripted::new("b", 40.0, 0.1, Behavior::Decline);
        let orch = orchestrator(&[a.clone(), b.clone()]);
        orch.learning()
            .schedule_adaptation(AdaptationTrigger::Custom("retune".into()));

        let drained = orch.drain_adaptations().await;
        assert_eq!(drained, vec![AdaptationTrigger::Custom("retune".into())]);
        assert_eq!(a.adaptations.lock().len(), 1);
        assert_eq!(b.adaptations.lock().len(), 1);
        assert!(orch.drain_adaptations().await.is_empty());
    }
}
