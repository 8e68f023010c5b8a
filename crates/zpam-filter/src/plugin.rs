//! Plugin host (C6): runs user-supplied analyzers concurrently, each
//! under its own timeout, and aggregates their scores by one of four
//! configurable methods (spec §4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use zpam_config::{AggregationMethod, PluginConfig};
use zpam_types::message::Message;
use zpam_types::plugin::PluginResult;

/// One of the six interfaces a plugin may implement (spec §4.6):
/// content-analyzer, reputation-checker, attachment-scanner,
/// ML-classifier, external-engine, custom-rule-engine. The host treats
/// all of them uniformly through this trait; the distinction matters
/// only to the plugin's own implementation.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn init(&self) -> Result<(), String> {
        Ok(())
    }

    async fn analyze(&self, message: &Message) -> Result<f64, String>;

    async fn cleanup(&self) {}
}

#[derive(Default, Debug, Clone)]
pub struct PluginStats {
    pub run_count: u64,
    pub error_count: u64,
    pub total_elapsed: Duration,
    pub last_run: Option<Instant>,
}

struct StatsCell {
    run_count: AtomicU64,
    error_count: AtomicU64,
    total_elapsed_micros: AtomicU64,
    last_run: Mutex<Option<Instant>>,
}

impl Default for StatsCell {
    fn default() -> Self {
        StatsCell {
            run_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            total_elapsed_micros: AtomicU64::new(0),
            last_run: Mutex::new(None),
        }
    }
}

impl StatsCell {
    fn record(&self, elapsed: Duration, errored: bool) {
        self.run_count.fetch_add(1, Ordering::Relaxed);
        if errored {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.total_elapsed_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        *self.last_run.lock() = Some(Instant::now());
    }

    fn snapshot(&self) -> PluginStats {
        PluginStats {
            run_count: self.run_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            total_elapsed: Duration::from_micros(self.total_elapsed_micros.load(Ordering::Relaxed)),
            last_run: *self.last_run.lock(),
        }
    }
}

struct Entry {
    plugin: Box<dyn Plugin>,
    config: PluginConfig,
    priority: i32,
    stats: StatsCell,
}

/// Registry + lifecycle + concurrent execution for plugins (spec
/// §4.6). `load` must be called once before `run_all`.
pub struct PluginHost {
    entries: Vec<Entry>,
}

impl PluginHost {
    /// Initialises enabled plugins in ascending priority order.
    /// Aborts on the first initialisation failure (spec §4.6).
    pub async fn load(
        plugins: Vec<Box<dyn Plugin>>,
        configs: HashMap<String, PluginConfig>,
    ) -> Result<PluginHost, String> {
        let mut entries: Vec<Entry> = plugins
            .into_iter()
            .map(|plugin| {
                let config = configs.get(plugin.name()).cloned().unwrap_or_default();
                let priority = config.priority;
                Entry {
                    plugin,
                    config,
                    priority,
                    stats: StatsCell::default(),
                }
            })
            .collect();
        entries.sort_by_key(|e| e.priority);

        for entry in entries.iter().filter(|e| e.config.enabled) {
            entry
                .plugin
                .init()
                .await
                .map_err(|e| format!("plugin {} failed to initialize: {e}", entry.plugin.name()))?;
        }

        Ok(PluginHost { entries })
    }

    pub async fn shutdown(&self, deadline: Duration) {
        let cleanups = self.entries.iter().map(|e| e.plugin.cleanup());
        let _ = tokio::time::timeout(deadline, futures_join_all(cleanups)).await;
    }

    /// Runs every enabled plugin concurrently, each under its own
    /// timeout. Errors and timeouts become zero-score `PluginResult`s
    /// and never abort the batch (spec §4.6).
    pub async fn run_all(&self, message: &Message) -> Vec<PluginResult> {
        let futs = self.entries.iter().filter(|e| e.config.enabled).map(|entry| async move {
            let timeout = Duration::from_millis(entry.config.timeout_ms);
            let start = Instant::now();
            let result = tokio::time::timeout(timeout, entry.plugin.analyze(message)).await;
            let elapsed = start.elapsed();
            match result {
                Ok(Ok(score)) => {
                    entry.stats.record(elapsed, false);
                    PluginResult::ok(entry.plugin.name().to_string(), score, 1.0, elapsed)
                }
                Ok(Err(err)) => {
                    entry.stats.record(elapsed, true);
                    PluginResult::failed(entry.plugin.name().to_string(), err, elapsed)
                }
                Err(_) => {
                    entry.stats.record(elapsed, true);
                    PluginResult::failed(
                        entry.plugin.name().to_string(),
                        "plugin timed out".to_string(),
                        elapsed,
                    )
                }
            }
        });
        futures::future::join_all(futs).await
    }

    pub fn stats(&self) -> HashMap<String, PluginStats> {
        self.entries
            .iter()
            .map(|e| (e.plugin.name().to_string(), e.stats.snapshot()))
            .collect()
    }

    fn weight_for(&self, name: &str) -> f64 {
        self.entries
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.config.weight)
            .unwrap_or(1.0)
    }

    /// Combines a batch of plugin results per the configured method
    /// (spec §4.6): `weighted_sum`, `max`, `average`, or `consensus`.
    pub fn aggregate(
        &self,
        results: &[PluginResult],
        method: AggregationMethod,
        consensus_threshold: f64,
    ) -> f64 {
        let ok_scores: Vec<(&str, f64)> = results
            .iter()
            .filter(|r| !r.is_error())
            .map(|r| (r.name.as_str(), r.raw_score))
            .collect();
        if ok_scores.is_empty() {
            return 0.0;
        }
        match method {
            AggregationMethod::WeightedSum => ok_scores
                .iter()
                .map(|(name, score)| self.weight_for(name) * score)
                .sum(),
            AggregationMethod::Max => ok_scores
                .iter()
                .map(|(_, s)| *s)
                .fold(f64::MIN, f64::max),
            AggregationMethod::Average => {
                let sum: f64 = ok_scores.iter().map(|(_, s)| s).sum();
                sum / ok_scores.len() as f64
            }
            AggregationMethod::Consensus => {
                let over = ok_scores
                    .iter()
                    .filter(|(_, s)| *s > consensus_threshold)
                    .count();
                let fraction = over as f64 / ok_scores.len() as f64;
                fraction * consensus_threshold * 2.0
            }
        }
    }
}

async fn futures_join_all<F: std::future::Future<Output = ()>>(futures: impl Iterator<Item = F>) {
    for fut in futures {
        fut.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zpam_types::message::SessionInfo;

    struct AlwaysScores(f64);
    #[async_trait]
    impl Plugin for AlwaysScores {
        fn name(&self) -> &str {
            "always_scores"
        }
        async fn analyze(&self, _message: &Message) -> Result<f64, String> {
            Ok(self.0)
        }
    }

    struct AlwaysErrors;
    #[async_trait]
    impl Plugin for AlwaysErrors {
        fn name(&self) -> &str {
            "always_errors"
        }
        async fn analyze(&self, _message: &Message) -> Result<f64, String> {
            Err("boom".to_string())
        }
    }

    struct NeverReturns;
    #[async_trait]
    impl Plugin for NeverReturns {
        fn name(&self) -> &str {
            "never_returns"
        }
        async fn analyze(&self, _message: &Message) -> Result<f64, String> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn message() -> Message {
        Message::new(
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
        .unwrap()
    }

    #[tokio::test]
    async fn errored_and_timed_out_plugins_contribute_zero() {
        let mut configs = HashMap::new();
        configs.insert(
            "never_returns".to_string(),
            PluginConfig {
                timeout_ms: 10,
                ..Default::default()
            },
        );
        let host = PluginHost::load(
            vec![
                Box::new(AlwaysScores(7.0)),
                Box::new(AlwaysErrors),
                Box::new(NeverReturns),
            ],
            configs,
        )
        .await
        .unwrap();

        let results = host.run_all(&message()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_error()).count(), 2);

        let combined = host.aggregate(&results, AggregationMethod::WeightedSum, 5.0);
        assert_eq!(combined, 7.0);
    }

    #[tokio::test]
    async fn max_aggregation_picks_the_highest_non_error_score() {
        let host = PluginHost::load(
            vec![Box::new(AlwaysScores(3.0)), Box::new(AlwaysScores(9.0))],
            HashMap::new(),
        )
        .await
        .unwrap();
        let results = host.run_all(&message()).await;
        let combined = host.aggregate(&results, AggregationMethod::Max, 5.0);
        assert_eq!(combined, 9.0);
    }
}
