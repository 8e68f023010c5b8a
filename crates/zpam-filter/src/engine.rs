//! The explicit `Engine` value (spec §9 redesign flag: "global
//! singletons for the spam filter and plugin manager... Model as an
//! explicit `Engine` value constructed at startup and passed down;
//! shutdown is a method on that value, not a process-wide teardown
//! hook.").

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use zpam_config::Config;
use zpam_dns::{LiveBackend, RecordSource, Resolver, ResolverConfig};
use zpam_store::KvStore;
use zpam_trc::{Error, EventType, Result};
use zpam_types::action::Action;
use zpam_types::message::Message;
use zpam_types::score::ScoreBundle;

use crate::auth;
use crate::orchestrator::Orchestrator;
use crate::plugin::{Plugin, PluginHost};
use crate::policy;
use crate::rules::RuleEvaluation;
use crate::scorers::{self, FrequencyTracker, Scorer};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The outcome handed back to the milter layer (C8) for one message:
/// the numeric result plus the synthesized action and the whitelist/
/// block/tag signals C10's rules raised.
pub struct EngineResult {
    pub bundle: ScoreBundle,
    pub action: Action,
    pub rule_evaluation: RuleEvaluation,
}

/// Owns every long-lived component the scoring pipeline needs: the
/// immutable `Config`, the hot-reloadable rule set, the DNS resolver,
/// the KV store, the plugin host, and the fixed scorer list. One
/// `Engine` is constructed at process startup and passed down to every
/// milter session; there is no global mutable state outside it.
pub struct Engine {
    config: Config,
    rules: zpam_config::RuleStore,
    resolver: Resolver,
    store: Arc<dyn KvStore>,
    plugins: PluginHost,
    scorers: Vec<Box<dyn Scorer>>,
    frequency: FrequencyTracker,
    open_relay_patterns: Vec<Regex>,
}

impl Engine {
    /// Builds the engine from a loaded `Config`, a rule store (already
    /// loaded or `RuleStore::empty()`), a pre-constructed `KvStore`, and
    /// a list of pre-constructed plugin instances (spec §9: "model
    /// plugins as a list of pre-constructed instances handed to the
    /// plugin host; discovery ... is the job of an outer bootstrap
    /// component, not the core").
    pub async fn start(
        config: Config,
        rules: zpam_config::RuleStore,
        store: Arc<dyn KvStore>,
        plugins: Vec<Box<dyn Plugin>>,
    ) -> Result<Engine> {
        let backend = LiveBackend::from_system_conf(Duration::from_millis(config.headers.dns_timeout_ms))
            .map_err(|e| Error::ConfigurationError(format!("cannot build DNS resolver: {e}")))?;
        let resolver = Resolver::spawn(
            Arc::new(backend),
            RecordSource::Live,
            ResolverConfig {
                workers: config.headers.dns_workers,
                queue_capacity: config.headers.dns_queue_capacity,
                cache_capacity: config.headers.dns_cache_size,
                ..ResolverConfig::default()
            },
        );

        let open_relay_patterns = config
            .headers
            .open_relay_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::ConfigurationError(format!("invalid open-relay pattern: {e}")))?;

        let plugin_host = PluginHost::load(plugins, config.plugins.entries.clone())
            .await
            .map_err(Error::ConfigurationError)?;

        Ok(Engine {
            scorers: scorers::default_scorers(),
            config,
            rules,
            resolver,
            store,
            plugins: plugin_host,
            frequency: FrequencyTracker::new(),
            open_relay_patterns,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reload_rules(&self) -> Result<()> {
        self.rules
            .reload()
            .map_err(|e| Error::ConfigurationError(e.to_string()))
    }

    /// Scores one message end to end: C3 auth, then the C7 orchestrator
    /// (which fans out to C4/C5/C6/C10), then C9's action decision.
    ///
    /// The whole pipeline, including C3's own DNS lookups, is bounded by
    /// `PerMessageTimeout` here so the deadline holds even if auth
    /// evaluation itself hangs; `Orchestrator::run`'s internal timeout
    /// only protects the fan-out stage once auth has already returned.
    /// A full-process timeout degrades to the same neutral (level 1)
    /// result as an orchestrator-only timeout (spec §4.8: availability
    /// wins over precision at the SMTP edge).
    pub async fn process(&self, message: &Message, now_unix: i64) -> EngineResult {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.performance.per_message_timeout_ms);

        match tokio::time::timeout(deadline, self.process_inner(message, now_unix, started)).await
        {
            Ok(result) => result,
            Err(_) => {
                zpam_trc::warn!(EventType::OrchestratorTimeout);
                let bundle = ScoreBundle {
                    heuristic_sum: 0.0,
                    bayes_probability: None,
                    auth_contribution: 0.0,
                    plugin_combined: 0.0,
                    final_raw: 0.0,
                    final_level: 1,
                };
                let action =
                    policy::decide(&bundle, started.elapsed(), &self.config.milter, ENGINE_VERSION);
                EngineResult {
                    bundle,
                    action,
                    rule_evaluation: RuleEvaluation::default(),
                }
            }
        }
    }

    async fn process_inner(&self, message: &Message, now_unix: i64, started: Instant) -> EngineResult {
        let auth_result = auth::evaluate(
            message,
            &self.resolver,
            &self.config.headers,
            &self.open_relay_patterns,
            &self.config.headers.suspicious_hop_substrings,
            self.config.headers.date_skew_window_secs,
            now_unix,
        )
        .await;

        let rules_snapshot = self.rules.snapshot();
        let orchestrator = Orchestrator {
            config: &self.config,
            scorers: &self.scorers,
            resolver: &self.resolver,
            store: self.store.as_ref(),
            plugins: &self.plugins,
            rules: rules_snapshot.as_ref(),
            frequency: &self.frequency,
        };
        let outcome = orchestrator.run(message, auth_result).await;

        let action = if outcome.rule_evaluation.blocked {
            Action::Reject {
                smtp_reply: self.config.milter.reject_smtp_reply.clone(),
            }
        } else {
            policy::decide(&outcome.bundle, started.elapsed(), &self.config.milter, ENGINE_VERSION)
        };

        EngineResult {
            bundle: outcome.bundle,
            action,
            rule_evaluation: outcome.rule_evaluation,
        }
    }

    /// Trains the Bayesian learner on a known-spam or known-ham message
    /// text under `user` (default user for single-tenant deployments).
    pub async fn train(&self, user: &str, text: &str, is_spam: bool) -> Result<()> {
        crate::bayes::train(self.store.as_ref(), &self.config.learning, user, text, is_spam).await
    }

    pub async fn reset_training(&self, user: &str) -> Result<()> {
        crate::bayes::reset(self.store.as_ref(), &self.config.learning, user).await
    }

    /// Graceful shutdown: calls `cleanup` on every plugin, bounded by
    /// `deadline` (spec §9's "shutdown is a method on that value").
    pub async fn shutdown(&self, deadline: Duration) {
        self.resolver.stop().await;
        self.plugins.shutdown(deadline).await;
    }
}
