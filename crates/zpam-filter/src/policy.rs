//! Action policy (C9): a pure mapping from `(level, config)` to an
//! `Action` (spec §4.9).

use std::time::Duration;

use zpam_config::MilterConfig;
use zpam_types::action::{Action, Annotation};
use zpam_types::score::ScoreBundle;

/// `level >= RejectThreshold` rejects; `level >= QuarantineThreshold`
/// quarantines if the milter negotiated that capability, otherwise
/// downgrades to an accept carrying a warning annotation; everything
/// else accepts (spec §4.9).
pub fn decide(
    bundle: &ScoreBundle,
    elapsed: Duration,
    config: &MilterConfig,
    engine_version: &str,
) -> Action {
    let level = bundle.final_level;
    let status = if level >= config.quarantine_threshold {
        "Spam"
    } else {
        "Clean"
    };
    let annotation = Annotation {
        status,
        score_level: level,
        score_raw: bundle.final_raw,
        info: format!("{engine_version}; {}ms", elapsed.as_millis()),
    };

    if level >= config.reject_threshold {
        return Action::Reject {
            smtp_reply: config.reject_smtp_reply.clone(),
        };
    }

    if level >= config.quarantine_threshold {
        return if config.can_quarantine {
            Action::Quarantine {
                reason: format!("score level {level} at or above quarantine threshold"),
            }
        } else {
            Action::Accept {
                annotations: Some(annotation),
            }
        };
    }

    Action::Accept {
        annotations: Some(annotation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(level: u8, raw: f64) -> ScoreBundle {
        ScoreBundle {
            heuristic_sum: 0.0,
            bayes_probability: None,
            auth_contribution: 0.0,
            plugin_combined: 0.0,
            final_raw: raw,
            final_level: level,
        }
    }

    #[test]
    fn level_below_thresholds_accepts() {
        let config = MilterConfig::default();
        let action = decide(&bundle(1, 2.0), Duration::from_millis(5), &config, "v1");
        assert!(matches!(action, Action::Accept { .. }));
    }

    #[test]
    fn level_at_reject_threshold_rejects() {
        let config = MilterConfig::default();
        let action = decide(&bundle(5, 40.0), Duration::from_millis(5), &config, "v1");
        match action {
            Action::Reject { smtp_reply } => assert_eq!(smtp_reply, config.reject_smtp_reply),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn quarantine_without_capability_downgrades_to_accept_with_annotation() {
        let config = MilterConfig {
            can_quarantine: false,
            ..MilterConfig::default()
        };
        let action = decide(&bundle(4, 28.0), Duration::from_millis(5), &config, "v1");
        match action {
            Action::Accept { annotations: Some(a) } => assert_eq!(a.status, "Spam"),
            other => panic!("expected downgraded accept, got {other:?}"),
        }
    }

    #[test]
    fn quarantine_with_capability_quarantines() {
        let config = MilterConfig::default();
        let action = decide(&bundle(4, 28.0), Duration::from_millis(5), &config, "v1");
        assert!(matches!(action, Action::Quarantine { .. }));
    }
}
