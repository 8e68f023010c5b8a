use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zpam_trc::Error;

/// The configuration record consumed by the core (spec §6):
/// "A single nested record with sections `detection`, `lists`,
/// `performance`, `headers`, `learning`, `plugins`, `milter`. The core
/// treats this record as immutable after startup except for C10's
/// rules file, which supports reload."
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub lists: ListsConfig,
    pub performance: PerformanceConfig,
    pub headers: HeadersConfig,
    pub learning: LearningConfig,
    pub plugins: PluginsConfig,
    pub milter: MilterConfig,
    /// Path to the C10 custom-rules YAML file (spec §6). Not one of
    /// the seven named sections but carried alongside them since it is
    /// the one piece of the config the core reloads at runtime; `None`
    /// runs with an empty rule set.
    pub rules_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            detection: DetectionConfig::default(),
            lists: ListsConfig::default(),
            performance: PerformanceConfig::default(),
            headers: HeadersConfig::default(),
            learning: LearningConfig::default(),
            plugins: PluginsConfig::default(),
            milter: MilterConfig::default(),
            rules_path: None,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Config, Error> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigurationError(format!("invalid config yaml: {e}")))
    }

    pub fn from_file(path: &std::path::Path) -> Result<Config, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigurationError(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&raw)
    }
}

/// Per-scorer weights, enable flags, keyword lists, and level
/// thresholds for the C5 feature scorers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub scorer_weights: HashMap<String, f64>,
    pub scorer_enabled: HashMap<String, bool>,
    pub bayes_weight: f64,
    pub keywords: KeywordLists,
    pub level_thresholds: LevelThresholds,
    pub frequency_window_secs: u64,
    pub frequency_threshold: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let scorers = [
            "subject_keyword",
            "body_keyword",
            "caps_ratio",
            "exclamation_ratio",
            "url_density",
            "html_ratio",
            "suspicious_headers",
            "attachment_risk",
            "domain_reputation",
            "encoding_issues",
            "from_to_mismatch",
            "subject_length",
            "frequency_penalty",
            "header_validation",
        ];
        let scorer_weights = scorers.iter().map(|s| (s.to_string(), 1.0)).collect();
        let scorer_enabled = scorers.iter().map(|s| (s.to_string(), true)).collect();
        DetectionConfig {
            scorer_weights,
            scorer_enabled,
            bayes_weight: 10.0,
            keywords: KeywordLists::default(),
            level_thresholds: LevelThresholds::default(),
            frequency_window_secs: 60,
            frequency_threshold: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeywordLists {
    pub subject_high: Vec<String>,
    pub subject_medium: Vec<String>,
    pub subject_low: Vec<String>,
    pub body_high: Vec<String>,
    pub body_medium: Vec<String>,
    pub body_low: Vec<String>,
}

/// Overrides spec §4.7's default raw→level cutoffs (≤5→1, ≤15→2,
/// ≤25→3, ≤35→4, else 5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelThresholds {
    pub level2: f64,
    pub level3: f64,
    pub level4: f64,
    pub level5: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        LevelThresholds {
            level2: 5.0,
            level3: 15.0,
            level4: 25.0,
            level5: 35.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ListsConfig {
    pub whitelist_domains: Vec<String>,
    pub blacklist_domains: Vec<String>,
    pub trusted_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_emails: usize,
    pub per_message_timeout_ms: u64,
    pub cache_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            max_concurrent_emails: 100,
            per_message_timeout_ms: 2_000,
            cache_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadersConfig {
    pub enable_spf: bool,
    pub enable_dkim: bool,
    pub enable_dmarc: bool,
    pub dns_timeout_ms: u64,
    pub dns_cache_size: usize,
    pub dns_workers: usize,
    pub dns_queue_capacity: usize,
    pub open_relay_patterns: Vec<String>,
    pub suspicious_hop_substrings: Vec<String>,
    pub date_skew_window_secs: i64,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        HeadersConfig {
            enable_spf: true,
            enable_dkim: true,
            enable_dmarc: true,
            dns_timeout_ms: 3_000,
            dns_cache_size: 4096,
            dns_workers: 10,
            dns_queue_capacity: 1024,
            open_relay_patterns: vec![
                r"unknown\[".to_string(),
                r"\bopen relay\b".to_string(),
            ],
            suspicious_hop_substrings: vec!["dynamic".to_string(), "dialup".to_string()],
            date_skew_window_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningBackend {
    File,
    KvStore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub backend: LearningBackend,
    pub min_token_len: usize,
    pub max_token_len: usize,
    pub osb_window: usize,
    pub max_tokens: usize,
    pub min_learns: u64,
    pub per_user: bool,
    pub token_ttl_secs: u64,
    pub key_prefix: String,
    pub max_significant_tokens: usize,
    pub spamminess_threshold: f64,
    pub reset_batch_size: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        LearningConfig {
            enabled: true,
            backend: LearningBackend::KvStore,
            min_token_len: 3,
            max_token_len: 40,
            osb_window: 5,
            max_tokens: 10_000,
            min_learns: 10,
            per_user: false,
            token_ttl_secs: 60 * 60 * 24 * 30,
            key_prefix: "zpam".to_string(),
            max_significant_tokens: 15,
            spamminess_threshold: 0.1,
            reset_batch_size: 500,
        }
    }
}

impl LearningConfig {
    /// The bayes namespace used when no caller-supplied user id applies
    /// (single-tenant deployments, or `per_user` disabled).
    pub fn default_user(&self) -> &str {
        "global"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    WeightedSum,
    Max,
    Average,
    Consensus,
}

impl Default for AggregationMethod {
    fn default() -> Self {
        AggregationMethod::WeightedSum
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub enabled: bool,
    pub weight: f64,
    pub priority: i32,
    pub timeout_ms: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            enabled: true,
            weight: 1.0,
            priority: 0,
            timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PluginsConfig {
    pub aggregation: AggregationMethod,
    pub consensus_threshold: f64,
    pub entries: HashMap<String, PluginConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenAddr {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

impl Default for ListenAddr {
    fn default() -> Self {
        ListenAddr::Tcp {
            host: "127.0.0.1".to_string(),
            port: 8890,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MilterConfig {
    pub listen: ListenAddr,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_concurrent: usize,
    pub body_buffer_cap_bytes: usize,
    pub shutdown_grace_ms: u64,
    pub header_prefix: String,
    pub reject_threshold: u8,
    pub quarantine_threshold: u8,
    pub reject_smtp_reply: String,
    pub skip_connect: bool,
    pub skip_helo: bool,
    pub skip_body: bool,
    pub can_add_headers: bool,
    pub can_change_headers: bool,
    pub can_add_rcpt: bool,
    pub can_remove_rcpt: bool,
    pub can_change_body: bool,
    pub can_change_from: bool,
    pub can_quarantine: bool,
}

impl Default for MilterConfig {
    fn default() -> Self {
        MilterConfig {
            listen: ListenAddr::default(),
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            max_concurrent: 100,
            body_buffer_cap_bytes: 10 * 1024 * 1024,
            shutdown_grace_ms: 5_000,
            header_prefix: "X-ZPAM-".to_string(),
            reject_threshold: 5,
            quarantine_threshold: 4,
            reject_smtp_reply: "550 5.7.1 Message rejected as spam".to_string(),
            skip_connect: false,
            skip_helo: false,
            skip_body: false,
            can_add_headers: true,
            can_change_headers: true,
            can_add_rcpt: false,
            can_remove_rcpt: false,
            can_change_body: false,
            can_change_from: false,
            can_quarantine: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.milter.header_prefix, "X-ZPAM-");
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config = Config::from_yaml_str("milter:\n  header_prefix: \"X-Custom-\"\n").unwrap();
        assert_eq!(config.milter.header_prefix, "X-Custom-");
        assert_eq!(config.performance.max_concurrent_emails, 100);
    }
}
