//! The filtering core: C3 authentication, C4 Bayesian learning, C5
//! feature scorers, C6 plugin host, C7 orchestrator, C9 action policy,
//! and C10 custom-rule evaluation, tied together by the `Engine` value.

pub mod auth;
pub mod bayes;
pub mod engine;
pub mod orchestrator;
pub mod plugin;
pub mod policy;
pub mod rules;
pub mod scorers;

pub use engine::{Engine, EngineResult, ENGINE_VERSION};
pub use orchestrator::{OrchestrationResult, Orchestrator};
pub use plugin::{Plugin, PluginHost, PluginStats};
pub use rules::RuleEvaluation;
pub use scorers::{FrequencyTracker, Scorer, ScorerInput};
