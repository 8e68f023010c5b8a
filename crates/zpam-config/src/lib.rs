//! The configuration surface consumed by the core (spec §6): a single
//! nested YAML-backed record, immutable after startup except for C10's
//! rules file, which supports hot reload via an atomic-swap pattern.

mod core;
mod rules;

pub use core::{
    AggregationMethod, Config, DetectionConfig, HeadersConfig, KeywordLists, LearningBackend,
    LearningConfig, LevelThresholds, ListenAddr, ListsConfig, MilterConfig, PerformanceConfig,
    PluginConfig, PluginsConfig,
};
pub use rules::{AdvancedSettings, RuleSet, RuleSettings, RuleStore, RulesFile};
