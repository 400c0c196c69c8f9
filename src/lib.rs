//! adaptive-orchestrator - admission control for plugin handlers
//!
//! Turns a pool of independent plugins into a conflict-free,
//! resource-bounded, priority-ordered active set for each request, runs
//! them with isolated failure handling, and learns from reported outcomes
//! which plugins deserve priority next time.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use adaptive_orchestrator::{EngineConfig, PluginOrchestrator, PluginRegistry, Context, OutcomeLabel};
//!
//! let registry = Arc::new(PluginRegistry::new());
//! registry.register(Arc::new(MyPlugin::new()));
//!
//! let config = EngineConfig::from_file(&path)?;
//! let orchestrator = PluginOrchestrator::from_config(&config, registry)?;
//!
//! let context = Context::new(6.0).with_domain("architecture");
//! let report = orchestrator.orchestrate(&context, &config.orchestration).await?;
//!
//! // Close the loop
//! orchestrator.report_outcome(&context, &report, OutcomeLabel::Success, 0.8).await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller ──► orchestrate(context)
//!              │ activation queries   (resilience: retry, timeout, circuit)
//!              ▼
//!            admission control        (rank, conflicts, cap, budget)
//!              │ invocations          (resilience)
//!              ▼
//!            RoundReport ──► report_outcome ──► LearningEngine
//!                                                  │ effectiveness scores
//!              next round's ranking ◄──────────────┘
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod history;
pub mod learning;
pub mod orchestrator;
pub mod plugin;
pub mod registry;
pub mod resilience;
pub mod simulation;
pub mod store;
pub mod types;

pub use config::{EngineConfig, HistoryCaps, LearningConfig, OrchestrationConfig, RankingPolicy, ResilienceConfig};
pub use error::{OrchestratorError, Result};
pub use history::BoundedHistory;
pub use types::*;

// Scheduling
pub use admission::{AdmissionDecision, AdmittedPlugin, SkipReason, SkippedCandidate};
pub use orchestrator::{FailureStage, OrchestratorEvent, PluginFailure, PluginOrchestrator, RoundReport};
pub use plugin::{Plugin, PluginFeedback, PluginMetadata};
pub use registry::PluginRegistry;
pub use resilience::{CircuitState, ResilienceWrapper};

// Learning (THE FEEDBACK LOOP)
pub use learning::{AdaptationHandler, AdaptationTrigger, LearningEngine, LearningSnapshot, LearningStats, OutcomeSummary};

// Persistence
pub use store::SnapshotStore;
