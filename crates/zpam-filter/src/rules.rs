//! Custom-rule evaluation (C10): matches conditions against a message
//! and applies tag/log/score/block actions (spec §4.10).

use regex::RegexBuilder;
use zpam_config::RulesFile;
use zpam_types::message::Message;
use zpam_types::rules::{Condition, ConditionOp, ConditionTarget, Rule, RuleAction, RuleActionKind};

/// Outcome of evaluating one rule-set snapshot against one message.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluation {
    pub score: f64,
    pub matched_rule_ids: Vec<String>,
    pub tags: Vec<String>,
    pub log_messages: Vec<String>,
    pub blocked: bool,
}

/// Evaluates every enabled rule in `snapshot` against `message`, up to
/// `max_rules_per_email` matches. A whitelisted envelope-from domain
/// short-circuits to a zero-score, unmatched result (spec §4.10).
pub fn evaluate(snapshot: &RulesFile, message: &Message) -> RuleEvaluation {
    if snapshot.is_whitelisted(message.envelope_from_domain()) {
        return RuleEvaluation::default();
    }

    let cap = if snapshot.settings.max_rules_per_email > 0 {
        snapshot.settings.max_rules_per_email
    } else {
        usize::MAX
    };

    let mut result = RuleEvaluation::default();
    for rule in snapshot.rules.iter().filter(|r| r.enabled) {
        if result.matched_rule_ids.len() >= cap {
            break;
        }
        if rule_matches(rule, message, snapshot.settings.case_sensitive) {
            result.score += rule.score;
            result.matched_rule_ids.push(rule.id.clone());
            apply_actions(rule, &mut result);
        }
    }
    result
}

fn rule_matches(rule: &Rule, message: &Message, default_case_sensitive: bool) -> bool {
    if rule.conditions.is_empty() {
        return false;
    }
    rule.conditions
        .iter()
        .all(|c| condition_matches(c, message, default_case_sensitive))
}

fn apply_actions(rule: &Rule, result: &mut RuleEvaluation) {
    for action in &rule.actions {
        apply_action(action, result);
    }
}

fn apply_action(action: &RuleAction, result: &mut RuleEvaluation) {
    match action.kind {
        RuleActionKind::Tag => result.tags.push(action.value.clone()),
        RuleActionKind::Log => result.log_messages.push(action.value.clone()),
        RuleActionKind::Score => {
            if let Ok(extra) = action.value.parse::<f64>() {
                result.score += extra;
            }
        }
        RuleActionKind::Block => result.blocked = true,
    }
}

fn condition_matches(condition: &Condition, message: &Message, default_case_sensitive: bool) -> bool {
    let case_sensitive = condition.case_sensitive || default_case_sensitive;
    match condition.target {
        ConditionTarget::Subject => text_matches(message.subject(), condition, case_sensitive),
        ConditionTarget::Body => {
            text_matches(message.body_text.as_str(), condition, case_sensitive)
                || text_matches(message.body_html.as_str(), condition, case_sensitive)
        }
        ConditionTarget::From => text_matches(&message.envelope_from, condition, case_sensitive),
        ConditionTarget::To => message
            .envelope_to
            .iter()
            .any(|to| text_matches(to, condition, case_sensitive)),
        ConditionTarget::Header => {
            // `value` carries "Header-Name:expected" for header conditions;
            // the part before the first `:` names the header to inspect.
            let (header_name, expected) = match condition.value.split_once(':') {
                Some((name, rest)) => (name, rest),
                None => (condition.value.as_str(), ""),
            };
            let header_value = message.header(header_name);
            let probe = Condition {
                target: condition.target,
                operator: condition.operator,
                value: expected.to_string(),
                case_sensitive: condition.case_sensitive,
            };
            text_matches(header_value, &probe, case_sensitive)
        }
        ConditionTarget::Attachment => message.attachments.iter().any(|a| {
            text_matches(&a.filename, condition, case_sensitive)
                || text_matches(&a.content_type, condition, case_sensitive)
        }),
    }
}

fn text_matches(haystack: &str, condition: &Condition, case_sensitive: bool) -> bool {
    match condition.operator {
        ConditionOp::Contains => contains(haystack, &condition.value, case_sensitive),
        ConditionOp::Equals => {
            if case_sensitive {
                haystack == condition.value
            } else {
                haystack.eq_ignore_ascii_case(&condition.value)
            }
        }
        ConditionOp::Regex => RegexBuilder::new(&condition.value)
            .case_insensitive(!case_sensitive)
            .build()
            .map(|re| re.is_match(haystack))
            .unwrap_or(false),
        ConditionOp::StartsWith => {
            if case_sensitive {
                haystack.starts_with(&condition.value)
            } else {
                haystack.to_lowercase().starts_with(&condition.value.to_lowercase())
            }
        }
        ConditionOp::EndsWith => {
            if case_sensitive {
                haystack.ends_with(&condition.value)
            } else {
                haystack.to_lowercase().ends_with(&condition.value.to_lowercase())
            }
        }
        ConditionOp::LengthGt => condition
            .value
            .parse::<usize>()
            .map(|n| haystack.len() > n)
            .unwrap_or(false),
        ConditionOp::LengthLt => condition
            .value
            .parse::<usize>()
            .map(|n| haystack.len() < n)
            .unwrap_or(false),
    }
}

fn contains(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zpam_config::{AdvancedSettings, RuleSettings};
    use zpam_types::message::SessionInfo;

    fn message(subject: &str, from: &str) -> Message {
        Message::new(
            from.to_string(),
            vec!["victim@example.com".into()],
            vec![("Subject".into(), subject.into())],
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

    fn rule(id: &str, score: f64, value: &str, kind: RuleActionKind) -> Rule {
        Rule {
            id: id.to_string(),
            enabled: true,
            score,
            conditions: vec![Condition {
                target: ConditionTarget::Subject,
                operator: ConditionOp::Contains,
                value: "lottery".to_string(),
                case_sensitive: false,
            }],
            actions: vec![RuleAction {
                kind,
                value: value.to_string(),
            }],
        }
    }

    #[test]
    fn matching_rule_contributes_score_and_tag() {
        let mut file = RulesFile::default();
        file.rules.push(rule("lottery", 8.0, "lottery-scam", RuleActionKind::Tag));
        let msg = message("You won the lottery!", "spammer@example.com");
        let result = evaluate(&file, &msg);
        assert_eq!(result.score, 8.0);
        assert_eq!(result.matched_rule_ids, vec!["lottery".to_string()]);
        assert_eq!(result.tags, vec!["lottery-scam".to_string()]);
    }

    #[test]
    fn whitelisted_domain_short_circuits_to_zero() {
        let mut file = RulesFile::default();
        file.rules.push(rule("lottery", 8.0, "lottery-scam", RuleActionKind::Tag));
        file.advanced = AdvancedSettings {
            combine_scores: true,
            max_total_score: 100.0,
            whitelisted_domains: vec!["example.com".to_string()],
        };
        let msg = message("You won the lottery!", "spammer@example.com");
        let result = evaluate(&file, &msg);
        assert_eq!(result.score, 0.0);
        assert!(result.matched_rule_ids.is_empty());
    }

    #[test]
    fn max_rules_per_email_caps_matches() {
        let mut file = RulesFile::default();
        file.settings = RuleSettings {
            enabled: true,
            case_sensitive: false,
            max_rules_per_email: 1,
        };
        file.rules.push(rule("r1", 1.0, "x", RuleActionKind::Log));
        file.rules.push(rule("r2", 1.0, "y", RuleActionKind::Log));
        let msg = message("lottery lottery", "spammer@example.com");
        let result = evaluate(&file, &msg);
        assert_eq!(result.matched_rule_ids.len(), 1);
    }

    #[test]
    fn block_action_sets_blocked_flag() {
        let mut file = RulesFile::default();
        file.rules.push(rule("block-me", 1.0, "", RuleActionKind::Block));
        let msg = message("lottery win", "spammer@example.com");
        let result = evaluate(&file, &msg);
        assert!(result.blocked);
    }

    #[test]
    fn header_condition_matches_named_header_value() {
        let mut file = RulesFile::default();
        file.rules.push(Rule {
            id: "bulk".to_string(),
            enabled: true,
            score: 2.0,
            conditions: vec![Condition {
                target: ConditionTarget::Header,
                operator: ConditionOp::Contains,
                value: "Precedence:bulk".to_string(),
                case_sensitive: false,
            }],
            actions: vec![],
        });
        let msg = Message::new(
            "sender@example.com".into(),
            vec!["victim@example.com".into()],
            vec![("Precedence".into(), "bulk".into())],
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
        let result = evaluate(&file, &msg);
        assert_eq!(result.matched_rule_ids, vec!["bulk".to_string()]);
    }
}
