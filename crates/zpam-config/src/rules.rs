use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use zpam_trc::Error;
use zpam_types::rules::Rule;

/// One entry in a YAML `rule_sets` map (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub enabled: bool,
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuleSettings {
    pub enabled: bool,
    pub case_sensitive: bool,
    pub max_rules_per_email: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdvancedSettings {
    pub combine_scores: bool,
    pub max_total_score: f64,
    pub whitelisted_domains: Vec<String>,
}

/// The fully parsed custom-rules YAML document (spec §6, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RulesFile {
    pub settings: RuleSettings,
    pub rules: Vec<Rule>,
    pub rule_sets: HashMap<String, RuleSet>,
    pub advanced: AdvancedSettings,
}

impl RulesFile {
    pub fn from_yaml_str(yaml: &str) -> Result<RulesFile, Error> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigurationError(format!("invalid rules yaml: {e}")))
    }

    pub fn is_whitelisted(&self, envelope_from_domain: &str) -> bool {
        self.advanced
            .whitelisted_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(envelope_from_domain))
    }
}

/// Read-many/write-rare holder for the active rule set (spec §4.10,
/// §5): "Reload performs a full re-parse into a new rule set and
/// atomically swaps; in-flight evaluations continue against the old
/// snapshot." Backed by `arc-swap`.
pub struct RuleStore {
    path: PathBuf,
    current: ArcSwap<RulesFile>,
}

impl RuleStore {
    pub fn load(path: impl AsRef<Path>) -> Result<RuleStore, Error> {
        let path = path.as_ref().to_path_buf();
        let file = read_rules_file(&path)?;
        Ok(RuleStore {
            path,
            current: ArcSwap::from_pointee(file),
        })
    }

    pub fn empty() -> RuleStore {
        RuleStore {
            path: PathBuf::new(),
            current: ArcSwap::from_pointee(RulesFile::default()),
        }
    }

    /// Returns a stable snapshot for one message's worth of rule
    /// evaluation. Subsequent reloads do not affect callers already
    /// holding a snapshot.
    pub fn snapshot(&self) -> Arc<RulesFile> {
        self.current.load_full()
    }

    pub fn reload(&self) -> Result<(), Error> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::ConfigurationError(
                "rule store has no backing file to reload from".to_string(),
            ));
        }
        let file = read_rules_file(&self.path)?;
        self.current.store(Arc::new(file));
        Ok(())
    }
}

fn read_rules_file(path: &Path) -> Result<RulesFile, Error> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::ConfigurationError(format!("cannot read {}: {e}", path.display())))?;
    RulesFile::from_yaml_str(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(contents: &str) -> tempfile_path::TempPath {
        tempfile_path::TempPath::with_contents(contents)
    }

    mod tempfile_path {
        use std::io::Write;
        use std::path::{Path, PathBuf};

        pub struct TempPath(PathBuf);

        impl TempPath {
            pub fn with_contents(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("zpam-rules-test-{}.yaml", std::process::id()));
                let mut f = std::fs::File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                TempPath(path)
            }
        }

        impl AsRef<Path> for TempPath {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn parses_minimal_rules_document() {
        let yaml = r#"
settings:
  enabled: true
  case_sensitive: false
  max_rules_per_email: 50
rules:
  - id: "lottery"
    enabled: true
    score: 8.0
    conditions:
      - type: subject
        operator: contains
        value: "lottery"
        case_sensitive: false
    actions:
      - type: tag
        value: "lottery-scam"
advanced:
  combine_scores: true
  max_total_score: 100.0
  whitelisted_domains: ["trusted.example"]
"#;
        let file = RulesFile::from_yaml_str(yaml).unwrap();
        assert_eq!(file.rules.len(), 1);
        assert!(file.is_whitelisted("trusted.example"));
        assert!(!file.is_whitelisted("other.example"));
    }

    #[test]
    fn reload_swaps_snapshot_atomically() {
        let path = write_temp("settings:\n  enabled: true\nrules: []\n");
        let store = RuleStore::load(&path).unwrap();
        let before = store.snapshot();
        assert_eq!(before.rules.len(), 0);

        std::fs::write(
            &path,
            "settings:\n  enabled: true\nrules:\n  - id: \"x\"\n    enabled: true\n    score: 1.0\n    conditions: []\n    actions: []\n",
        )
        .unwrap();
        store.reload().unwrap();
        let after = store.snapshot();
        assert_eq!(after.rules.len(), 1);
        assert_eq!(before.rules.len(), 0);
    }
}
