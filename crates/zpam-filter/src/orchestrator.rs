//! Scoring orchestrator (C7): fans out to C5 scorers, C4 classification,
//! the C6 plugin host, and C10 rule evaluation concurrently, bounded by
//! a per-message deadline, and never returns an error (spec §4.7).

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use zpam_config::{Config, LevelThresholds, RulesFile};
use zpam_dns::Resolver;
use zpam_store::KvStore;
use zpam_trc::EventType;
use zpam_types::auth::AuthResult;
use zpam_types::message::Message;
use zpam_types::score::ScoreBundle;

use crate::bayes;
use crate::plugin::PluginHost;
use crate::rules::{self, RuleEvaluation};
use crate::scorers::{FrequencyTracker, Scorer, ScorerInput};

/// Converts a Bayes classification probability into a score
/// contribution: only evidence of spam (p > 0.5) counts (spec §4.7
/// step 2, "`max(0, (p - 0.5)) * weight_bayes`").
fn bayes_contribution(p: f64, weight: f64) -> f64 {
    (p - 0.5).max(0.0) * weight
}

fn level_for(raw: f64, thresholds: &LevelThresholds) -> u8 {
    if raw <= thresholds.level2 {
        1
    } else if raw <= thresholds.level3 {
        2
    } else if raw <= thresholds.level4 {
        3
    } else if raw <= thresholds.level5 {
        4
    } else {
        5
    }
}

/// Full output of one orchestration pass, including whether any C10
/// rule demanded a hard block (escalated by the caller to Reject
/// regardless of numeric score, per spec §4.10).
pub struct OrchestrationResult {
    pub bundle: ScoreBundle,
    pub rule_evaluation: RuleEvaluation,
    pub auth: AuthResult,
}

/// Ties together every scoring input for one message. Borrowed, not
/// owned: the engine (not yet built at this layer) is expected to
/// construct one of these per message from its long-lived components.
pub struct Orchestrator<'a> {
    pub config: &'a Config,
    pub scorers: &'a [Box<dyn Scorer>],
    pub resolver: &'a Resolver,
    pub store: &'a dyn KvStore,
    pub plugins: &'a PluginHost,
    pub rules: &'a RulesFile,
    pub frequency: &'a FrequencyTracker,
}

impl<'a> Orchestrator<'a> {
    /// Runs the full scoring pipeline for one message, already carrying
    /// its C3 `AuthResult` (evaluated separately since it is itself a
    /// suspension point feeding both the `header_validation` scorer and
    /// `auth_contribution`).
    pub async fn run(&self, message: &Message, auth: AuthResult) -> OrchestrationResult {
        let deadline = Duration::from_millis(self.config.performance.per_message_timeout_ms);
        let started = Instant::now();

        let outcome = tokio::time::timeout(deadline, self.run_inner(message, &auth)).await;
        let (heuristic_sum, bayes_probability, plugin_combined, rule_evaluation) = match outcome {
            Ok(result) => result,
            Err(_) => {
                zpam_trc::warn!(EventType::OrchestratorTimeout);
                (0.0, None, 0.0, RuleEvaluation::default())
            }
        };

        // `HeaderValidationScorer` (scorers.rs) already folds this exact
        // quantity into `heuristic_sum` when enabled, weighted like any
        // other scorer. `auth_contribution` here is a report of that same
        // single value for `ScoreBundle`, not a second addition to
        // `final_raw` — adding it again would double-count C3 evidence.
        let detection = &self.config.detection;
        let header_validation_enabled = *detection
            .scorer_enabled
            .get("header_validation")
            .unwrap_or(&true);
        let header_validation_weight = *detection
            .scorer_weights
            .get("header_validation")
            .unwrap_or(&1.0);
        let auth_contribution = if header_validation_enabled {
            header_validation_weight
                * ((100 - auth.auth_score) as f64 / 2.0 + auth.suspicious_score as f64 / 2.0)
        } else {
            0.0
        };
        let mut final_raw = heuristic_sum + plugin_combined + rule_evaluation.score;
        if let Some(p) = bayes_probability {
            final_raw += bayes_contribution(p, self.config.detection.bayes_weight);
        }

        let final_level = if rule_evaluation.blocked {
            5
        } else {
            level_for(final_raw, &self.config.detection.level_thresholds)
        };

        let bundle = ScoreBundle {
            heuristic_sum,
            bayes_probability,
            auth_contribution,
            plugin_combined,
            final_raw,
            final_level,
        };
        zpam_trc::info!(
            EventType::ScoreComputed,
            final_raw = final_raw,
            final_level = final_level,
            elapsed_ms = started.elapsed().as_millis()
        );

        OrchestrationResult {
            bundle,
            rule_evaluation,
            auth,
        }
    }

    async fn run_inner(
        &self,
        message: &Message,
        auth: &AuthResult,
    ) -> (f64, Option<f64>, f64, RuleEvaluation) {
        tokio::join!(
            self.run_scorers(message, auth),
            self.run_bayes(message),
            self.run_plugins(message),
            self.run_rules(message),
        )
    }

    /// Runs every enabled scorer concurrently. A panicking scorer is
    /// caught via `catch_unwind` and contributes zero, exactly as a
    /// timed-out one would (spec §4.5).
    async fn run_scorers(&self, message: &Message, auth: &AuthResult) -> f64 {
        let detection = &self.config.detection;
        let input = ScorerInput {
            message,
            auth,
            detection,
            lists: &self.config.lists,
            headers: &self.config.headers,
            resolver: self.resolver,
            frequency: self.frequency,
        };

        let futs = self.scorers.iter().map(|scorer| {
            let name = scorer.name();
            let enabled = *detection.scorer_enabled.get(name).unwrap_or(&true);
            let weight = *detection.scorer_weights.get(name).unwrap_or(&1.0);
            let input = &input;
            async move {
                if !enabled {
                    return 0.0;
                }
                match AssertUnwindSafe(scorer.score(input)).catch_unwind().await {
                    Ok(raw) => weight * raw,
                    Err(_) => {
                        zpam_trc::error!(EventType::ScorerPanicked, scorer = name);
                        0.0
                    }
                }
            }
        });

        join_all(futs).await.into_iter().sum()
    }

    async fn run_bayes(&self, message: &Message) -> Option<f64> {
        if !self.config.learning.enabled {
            return None;
        }
        let user = self.config.learning.default_user();
        let text = format!("{} {}", message.subject(), message.body_text);
        match bayes::classify(self.store, &self.config.learning, user, &text).await {
            Ok(p) => {
                zpam_trc::info!(EventType::BayesClassified, probability = p);
                Some(p)
            }
            Err(_) => {
                zpam_trc::warn!(EventType::BayesStoreError);
                None
            }
        }
    }

    async fn run_plugins(&self, message: &Message) -> f64 {
        let results = self.plugins.run_all(message).await;
        self.plugins.aggregate(
            &results,
            self.config.plugins.aggregation,
            self.config.plugins.consensus_threshold,
        )
    }

    async fn run_rules(&self, message: &Message) -> RuleEvaluation {
        rules::evaluate(self.rules, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use zpam_dns::{InjectedBackend, RecordSource, ResolverConfig};
    use zpam_store::MemoryStore;
    use zpam_types::message::SessionInfo;

    fn message() -> Message {
        Message::new(
            "a@example.com".into(),
            vec!["b@example.com".into()],
            vec![("Subject".into(), "FREE MONEY NOW!!!".into())],
            "act now".into(),
            String::new(),
            vec![],
            SessionInfo {
                client_ip: "127.0.0.1".parse().unwrap(),
                helo_name: "mail.example.com".into(),
                tls_cipher: String::new(),
                receive_timestamp: 0,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn run_produces_a_bounded_level_and_never_panics() {
        let config = Config::default();
        let scorers = crate::scorers::default_scorers();
        let resolver = Resolver::spawn(
            Arc::new(InjectedBackend::new()),
            RecordSource::Injected,
            ResolverConfig::default(),
        );
        let store = MemoryStore::new();
        let rules_file = RulesFile::default();
        let frequency = FrequencyTracker::new();
        let plugins = PluginHost::load(vec![], HashMap::new()).await.unwrap();

        let orchestrator = Orchestrator {
            config: &config,
            scorers: &scorers,
            resolver: &resolver,
            store: &store,
            plugins: &plugins,
            rules: &rules_file,
            frequency: &frequency,
        };

        let outcome = orchestrator.run(&message(), AuthResult::default()).await;
        assert!((1..=5).contains(&outcome.bundle.final_level));
    }

    /// A clean message missing only `DKIM-Signature` (`auth_score = 90`,
    /// no other anomalies) must count that one penalty exactly once:
    /// `final_raw` equal to `heuristic_sum` alone, not doubled by a
    /// second `auth_contribution` addition (spec §8 Scenario A).
    #[tokio::test]
    async fn auth_penalty_is_counted_once() {
        let config = Config::default();
        let scorers: Vec<Box<dyn Scorer>> = vec![Box::new(crate::scorers::HeaderValidationScorer)];
        let resolver = Resolver::spawn(
            Arc::new(InjectedBackend::new()),
            RecordSource::Injected,
            ResolverConfig::default(),
        );
        let store = MemoryStore::new();
        let rules_file = RulesFile::default();
        let frequency = FrequencyTracker::new();
        let plugins = PluginHost::load(vec![], HashMap::new()).await.unwrap();

        let orchestrator = Orchestrator {
            config: &config,
            scorers: &scorers,
            resolver: &resolver,
            store: &store,
            plugins: &plugins,
            rules: &rules_file,
            frequency: &frequency,
        };

        let neutral_message = Message::new(
            "a@example.com".into(),
            vec!["b@example.com".into()],
            vec![],
            String::new(),
            String::new(),
            vec![],
            SessionInfo {
                client_ip: "127.0.0.1".parse().unwrap(),
                helo_name: "mail.example.com".into(),
                tls_cipher: String::new(),
                receive_timestamp: 0,
            },
        )
        .unwrap();

        let auth = AuthResult {
            auth_score: 90,
            ..AuthResult::default()
        };
        let outcome = orchestrator.run(&neutral_message, auth).await;

        assert_eq!(outcome.bundle.auth_contribution, 5.0);
        assert_eq!(outcome.bundle.final_raw, 5.0);
        assert_eq!(outcome.bundle.final_level, 1);
    }
}
