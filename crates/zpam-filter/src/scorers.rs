//! Feature scorers (C5): a fixed, registered set, each taking a
//! `Message` and returning a single non-negative float. Weighting and
//! enable/disable live in configuration, not in the scorer itself
//! (spec §4.5).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use zpam_config::{DetectionConfig, HeadersConfig, ListsConfig};
use zpam_dns::{QType, Resolver};
use zpam_types::auth::AuthResult;
use zpam_types::message::Message;

/// Everything a scorer may read. Scorers never mutate shared state
/// except through `FrequencyTracker`, which is internally synchronised.
pub struct ScorerInput<'a> {
    pub message: &'a Message,
    pub auth: &'a AuthResult,
    pub detection: &'a DetectionConfig,
    pub lists: &'a ListsConfig,
    pub headers: &'a HeadersConfig,
    pub resolver: &'a Resolver,
    pub frequency: &'a FrequencyTracker,
}

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn score(&self, input: &ScorerInput<'_>) -> f64;
}

/// Short-window rate limiter keyed by `envelope_from` (scorer 13).
/// Each clone shares the same table; internally synchronised so it can
/// be read and written from concurrently running scorer tasks.
#[derive(Default)]
pub struct FrequencyTracker {
    seen: Mutex<std::collections::HashMap<String, VecDeque<Instant>>>,
}

impl FrequencyTracker {
    pub fn new() -> Self {
        FrequencyTracker::default()
    }

    /// Records one occurrence of `key` and returns the count observed
    /// within `window`.
    pub fn record(&self, key: &str, window: Duration) -> u32 {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        let entries = seen.entry(key.to_string()).or_default();
        entries.push_back(now);
        while let Some(&front) = entries.front() {
            if now.duration_since(front) > window {
                entries.pop_front();
            } else {
                break;
            }
        }
        entries.len() as u32
    }
}

fn text_len_ratio(text: &str, predicate: impl Fn(char) -> bool) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let matching = text.chars().filter(|c| predicate(*c)).count();
    matching as f64 / text.chars().count() as f64
}

fn keyword_score(text: &str, high: &[String], medium: &[String], low: &[String]) -> f64 {
    let lower = text.to_ascii_lowercase();
    let hits = |list: &[String]| list.iter().filter(|k| lower.contains(k.as_str())).count() as f64;
    hits(high) * 5.0 + hits(medium) * 2.0 + hits(low) * 1.0
}

pub struct SubjectKeywordScorer;
#[async_trait]
impl Scorer for SubjectKeywordScorer {
    fn name(&self) -> &'static str {
        "subject_keyword"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        keyword_score(
            input.message.subject(),
            &input.detection.keywords.subject_high,
            &input.detection.keywords.subject_medium,
            &input.detection.keywords.subject_low,
        )
    }
}

pub struct BodyKeywordScorer;
#[async_trait]
impl Scorer for BodyKeywordScorer {
    fn name(&self) -> &'static str {
        "body_keyword"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        keyword_score(
            &input.message.body_text,
            &input.detection.keywords.body_high,
            &input.detection.keywords.body_medium,
            &input.detection.keywords.body_low,
        )
    }
}

pub struct CapsRatioScorer {
    pub threshold: f64,
}
#[async_trait]
impl Scorer for CapsRatioScorer {
    fn name(&self) -> &'static str {
        "caps_ratio"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let combined = format!("{}{}", input.message.subject(), input.message.body_text);
        let ratio = text_len_ratio(&combined, |c| c.is_ascii_uppercase());
        if ratio > self.threshold {
            (ratio - self.threshold) * 10.0
        } else {
            0.0
        }
    }
}

pub struct ExclamationRatioScorer;
#[async_trait]
impl Scorer for ExclamationRatioScorer {
    fn name(&self) -> &'static str {
        "exclamation_ratio"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let combined = format!("{}{}", input.message.subject(), input.message.body_text);
        text_len_ratio(&combined, |c| c == '!') * 20.0
    }
}

pub struct UrlDensityScorer;
#[async_trait]
impl Scorer for UrlDensityScorer {
    fn name(&self) -> &'static str {
        "url_density"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let body = &input.message.body_text;
        if body.is_empty() {
            return 0.0;
        }
        let url_count = body.matches("http://").count() + body.matches("https://").count();
        (url_count as f64 / (body.len() as f64 / 1000.0).max(1.0)) * 5.0
    }
}

pub struct HtmlRatioScorer;
#[async_trait]
impl Scorer for HtmlRatioScorer {
    fn name(&self) -> &'static str {
        "html_ratio"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let html_len = input.message.body_html.len() as f64;
        let text_len = input.message.body_text.len() as f64;
        if html_len == 0.0 {
            0.0
        } else if text_len == 0.0 {
            10.0
        } else {
            (html_len / (html_len + text_len) * 10.0).min(10.0)
        }
    }
}

pub struct SuspiciousHeadersScorer;
#[async_trait]
impl Scorer for SuspiciousHeadersScorer {
    fn name(&self) -> &'static str {
        "suspicious_headers"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let mut score = 0.0;
        if !input.message.header("X-Priority").is_empty()
            && input.message.header("X-Priority") == "1"
        {
            score += 2.0;
        }
        if !input.message.header("X-Mailer").is_empty()
            && input.message.header("X-Mailer").to_ascii_lowercase().contains("bulk")
        {
            score += 5.0;
        }
        if input.message.header("Precedence").eq_ignore_ascii_case("bulk") {
            score += 2.0;
        }
        score
    }
}

const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "scr", "bat", "cmd", "com", "pif", "js", "vbs"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "ace"];

pub struct AttachmentRiskScorer;
#[async_trait]
impl Scorer for AttachmentRiskScorer {
    fn name(&self) -> &'static str {
        "attachment_risk"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let mut score = 0.0;
        for attachment in &input.message.attachments {
            let lower = attachment.filename.to_ascii_lowercase();
            let parts: Vec<&str> = lower.rsplit('.').collect();
            if let Some(ext) = parts.first() {
                if EXECUTABLE_EXTENSIONS.contains(ext) {
                    score += 15.0;
                } else if ARCHIVE_EXTENSIONS.contains(ext) {
                    score += 5.0;
                }
            }
            if parts.len() >= 3 && EXECUTABLE_EXTENSIONS.contains(&parts[0]) {
                score += 10.0;
            }
        }
        score
    }
}

pub struct DomainReputationScorer;
#[async_trait]
impl Scorer for DomainReputationScorer {
    fn name(&self) -> &'static str {
        "domain_reputation"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let domain = input.message.envelope_from_domain();
        if input
            .lists
            .blacklist_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
        {
            return 30.0;
        }
        if input
            .lists
            .whitelist_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
            || input
                .lists
                .trusted_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(domain))
        {
            return 0.0;
        }
        let deadline = Duration::from_millis(input.headers.dns_timeout_ms);
        match input.resolver.lookup_sync(domain, QType::Mx, deadline).await {
            Ok((values, _)) if !values.is_empty() => 0.0,
            _ => 3.0,
        }
    }
}

const ABUSED_ENCODINGS: &[&str] = &["quoted-printable-overlong", "x-uuencode", "base64"];

pub struct EncodingIssuesScorer;
#[async_trait]
impl Scorer for EncodingIssuesScorer {
    fn name(&self) -> &'static str {
        "encoding_issues"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let transfer_encoding = input.message.header("Content-Transfer-Encoding").to_ascii_lowercase();
        if transfer_encoding.is_empty() {
            return 0.0;
        }
        if ABUSED_ENCODINGS.iter().any(|e| transfer_encoding.contains(e)) {
            5.0
        } else {
            0.0
        }
    }
}

pub struct FromToMismatchScorer;
#[async_trait]
impl Scorer for FromToMismatchScorer {
    fn name(&self) -> &'static str {
        "from_to_mismatch"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let from_header_domain = Message::domain_of(input.message.header("From"));
        let envelope_domain = input.message.envelope_from_domain();
        if from_header_domain.is_empty() || envelope_domain.is_empty() {
            0.0
        } else if from_header_domain.eq_ignore_ascii_case(envelope_domain) {
            0.0
        } else {
            8.0
        }
    }
}

pub struct SubjectLengthScorer {
    pub too_short: usize,
    pub too_long: usize,
}
#[async_trait]
impl Scorer for SubjectLengthScorer {
    fn name(&self) -> &'static str {
        "subject_length"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let len = input.message.subject().chars().count();
        if len == 0 {
            3.0
        } else if len < self.too_short {
            2.0
        } else if len > self.too_long {
            2.0
        } else {
            0.0
        }
    }
}

pub struct FrequencyPenaltyScorer;
#[async_trait]
impl Scorer for FrequencyPenaltyScorer {
    fn name(&self) -> &'static str {
        "frequency_penalty"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let window = Duration::from_secs(input.detection.frequency_window_secs);
        let count = input.frequency.record(&input.message.envelope_from, window);
        if count > input.detection.frequency_threshold {
            ((count - input.detection.frequency_threshold) as f64).min(50.0)
        } else {
            0.0
        }
    }
}

pub struct HeaderValidationScorer;
#[async_trait]
impl Scorer for HeaderValidationScorer {
    fn name(&self) -> &'static str {
        "header_validation"
    }
    async fn score(&self, input: &ScorerInput<'_>) -> f64 {
        let auth_penalty = (100 - input.auth.auth_score) as f64 / 2.0;
        let suspicious = input.auth.suspicious_score as f64 / 2.0;
        auth_penalty + suspicious
    }
}

/// Names, in a fixed order, every built-in scorer. `Engine` looks up
/// weight/enabled flags from `DetectionConfig` by these names (spec
/// §4.5 lists 14 representative scorers; all 14 are implemented here).
pub fn default_scorers() -> Vec<Box<dyn Scorer>> {
    vec![
        Box::new(SubjectKeywordScorer),
        Box::new(BodyKeywordScorer),
        Box::new(CapsRatioScorer { threshold: 0.3 }),
        Box::new(ExclamationRatioScorer),
        Box::new(UrlDensityScorer),
        Box::new(HtmlRatioScorer),
        Box::new(SuspiciousHeadersScorer),
        Box::new(AttachmentRiskScorer),
        Box::new(DomainReputationScorer),
        Box::new(EncodingIssuesScorer),
        Box::new(FromToMismatchScorer),
        Box::new(SubjectLengthScorer {
            too_short: 3,
            too_long: 100,
        }),
        Box::new(FrequencyPenaltyScorer),
        Box::new(HeaderValidationScorer),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zpam_dns::{InjectedBackend, RecordSource, ResolverConfig};
    use zpam_types::message::SessionInfo;

    fn session() -> SessionInfo {
        SessionInfo {
            client_ip: "127.0.0.1".parse().unwrap(),
            helo_name: "mail.example.com".into(),
            tls_cipher: String::new(),
            receive_timestamp: 0,
        }
    }

    fn resolver() -> Resolver {
        Resolver::spawn(
            Arc::new(InjectedBackend::new()),
            RecordSource::Injected,
            ResolverConfig::default(),
        )
    }

    #[tokio::test]
    async fn caps_ratio_scores_uppercase_heavy_subject() {
        let msg = Message::new(
            "a@example.com".into(),
            vec!["b@example.com".into()],
            vec![("Subject".into(), "YOU WON FREE MONEY".into())],
            String::new(),
            String::new(),
            vec![],
            session(),
        )
        .unwrap();
        let detection = DetectionConfig::default();
        let lists = ListsConfig::default();
        let headers = HeadersConfig::default();
        let auth = AuthResult::default();
        let freq = FrequencyTracker::new();
        let res = resolver();
        let input = ScorerInput {
            message: &msg,
            auth: &auth,
            detection: &detection,
            lists: &lists,
            headers: &headers,
            resolver: &res,
            frequency: &freq,
        };
        let score = CapsRatioScorer { threshold: 0.3 }.score(&input).await;
        assert!(score > 0.0);
    }

    #[tokio::test]
    async fn frequency_penalty_rises_with_repeated_sender() {
        let tracker = FrequencyTracker::new();
        let window = Duration::from_secs(60);
        for _ in 0..25 {
            tracker.record("spammer@example.com", window);
        }
        let count = tracker.record("spammer@example.com", window);
        assert!(count > 20);
    }

    #[tokio::test]
    async fn from_to_mismatch_flags_divergent_domains() {
        let msg = Message::new(
            "a@example.com".into(),
            vec!["b@example.com".into()],
            vec![("From".into(), "display@other.example".into())],
            String::new(),
            String::new(),
            vec![],
            session(),
        )
        .unwrap();
        let detection = DetectionConfig::default();
        let lists = ListsConfig::default();
        let headers = HeadersConfig::default();
        let auth = AuthResult::default();
        let freq = FrequencyTracker::new();
        let res = resolver();
        let input = ScorerInput {
            message: &msg,
            auth: &auth,
            detection: &detection,
            lists: &lists,
            headers: &headers,
            resolver: &res,
            frequency: &freq,
        };
        let score = FromToMismatchScorer.score(&input).await;
        assert_eq!(score, 8.0);
    }
}
