//! Plugin host result type (spec C6 / §3 `PluginResult`).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PluginResult {
    pub name: String,
    pub raw_score: f64,
    pub confidence: f64,
    pub triggered_rules: Vec<String>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl PluginResult {
    pub fn ok(name: impl Into<String>, raw_score: f64, confidence: f64, elapsed: Duration) -> Self {
        PluginResult {
            name: name.into(),
            raw_score,
            confidence,
            triggered_rules: Vec::new(),
            elapsed,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        PluginResult {
            name: name.into(),
            raw_score: 0.0,
            confidence: 0.0,
            triggered_rules: Vec::new(),
            elapsed,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
