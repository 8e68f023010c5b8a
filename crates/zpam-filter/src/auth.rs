//! Authentication validator (C3). SPF and DMARC are advisory: DNS
//! failures never propagate as errors, only as weaker result tokens
//! (spec §4.3, "authentication is advisory, not blocking").

use std::time::Duration;

use regex::Regex;
use zpam_config::HeadersConfig;
use zpam_dns::{DnsErrorKind, QType, Resolver};
use zpam_types::auth::{AuthResult, SpfResult};
use zpam_types::message::Message;

const SPF_FAIL_PENALTY: u8 = 40;
const SPF_SOFTFAIL_PENALTY: u8 = 15;
const SPF_TEMPERROR_PENALTY: u8 = 5;
const DKIM_MISSING_PENALTY: u8 = 10;
const DMARC_FAIL_PENALTY: u8 = 20;
const MISSING_MESSAGE_ID_WEIGHT: u8 = 10;
const FROM_RETURN_PATH_MISMATCH_WEIGHT: u8 = 15;
const DATE_SKEW_WEIGHT: u8 = 10;
const OPEN_RELAY_HOP_WEIGHT: u8 = 20;
const SUSPICIOUS_HOP_WEIGHT: u8 = 10;

/// Evaluates SPF, DKIM presence, DMARC, `Received`-chain routing, and
/// header anomalies for one message. Never returns an error: DNS
/// failures degrade the relevant result token instead (spec §4.3).
pub async fn evaluate(
    message: &Message,
    resolver: &Resolver,
    config: &HeadersConfig,
    open_relay_patterns: &[Regex],
    suspicious_hop_substrings: &[String],
    date_skew_window_secs: i64,
    now_unix: i64,
) -> AuthResult {
    let mut result = AuthResult::default();
    let deadline = Duration::from_millis(config.dns_timeout_ms);

    let return_path_domain = extract_domain(message.header("Return-Path"));
    let from_domain = extract_domain(message.header("From"));
    let spf_domain = if !return_path_domain.is_empty() {
        return_path_domain.clone()
    } else {
        from_domain.clone()
    };

    if config.enable_spf && !spf_domain.is_empty() {
        result.spf = evaluate_spf(&spf_domain, message.session.client_ip, resolver, deadline).await;
    }
    match result.spf {
        SpfResult::Fail => result.auth_score = result.auth_score.saturating_sub(SPF_FAIL_PENALTY),
        SpfResult::SoftFail => {
            result.auth_score = result.auth_score.saturating_sub(SPF_SOFTFAIL_PENALTY)
        }
        SpfResult::TempError => {
            result.auth_score = result.auth_score.saturating_sub(SPF_TEMPERROR_PENALTY)
        }
        _ => {}
    }

    if config.enable_dkim {
        let dkim_signatures: Vec<&str> = message.headers_all("DKIM-Signature").collect();
        result.dkim_present = !dkim_signatures.is_empty();
        result.dkim_domains = dkim_signatures
            .iter()
            .filter_map(|sig| dkim_field(sig, "d"))
            .collect();
        if !result.dkim_present {
            result.auth_score = result.auth_score.saturating_sub(DKIM_MISSING_PENALTY);
        }
    }

    if config.enable_dmarc && !from_domain.is_empty() {
        match evaluate_dmarc(&from_domain, &result, resolver, deadline).await {
            Some(aligned) => {
                result.dmarc_aligned = aligned;
                if !aligned {
                    result.auth_score = result.auth_score.saturating_sub(DMARC_FAIL_PENALTY);
                }
            }
            None => result.dmarc_aligned = false,
        }
    }

    analyze_received_chain(
        message,
        open_relay_patterns,
        suspicious_hop_substrings,
        &mut result,
    );
    analyze_header_anomalies(
        message,
        &return_path_domain,
        &from_domain,
        date_skew_window_secs,
        now_unix,
        &mut result,
    );

    result
}

async fn evaluate_spf(
    domain: &str,
    _client_ip: std::net::IpAddr,
    resolver: &Resolver,
    deadline: Duration,
) -> SpfResult {
    match resolver.lookup_sync(domain, QType::Txt, deadline).await {
        Ok((values, _)) => {
            let record = values.iter().find(|v| v.starts_with("v=spf1"));
            match record {
                None => SpfResult::None,
                Some(record) => classify_spf_record(record),
            }
        }
        Err(DnsErrorKind::NxDomain) => SpfResult::None,
        Err(_) => SpfResult::TempError,
    }
}

/// Coarse SPF classification (spec's explicit non-goal: "does not
/// implement a full SPF... validator"). A trailing `-all` without an
/// explicit allow mechanism for the sender is treated as a soft signal
/// rather than fully walking `include`/`ip4`/`ip6` mechanisms.
fn classify_spf_record(record: &str) -> SpfResult {
    if record.contains("-all") {
        SpfResult::SoftFail
    } else if record.contains("~all") {
        SpfResult::SoftFail
    } else if record.contains("?all") {
        SpfResult::Neutral
    } else if record.contains("+all") {
        SpfResult::Pass
    } else {
        SpfResult::Neutral
    }
}

/// Returns `None` when no DMARC policy is published at all (unpenalized,
/// mirroring `SpfResult::None`), or `Some(aligned)` when a policy exists
/// and alignment either held or failed.
async fn evaluate_dmarc(
    from_domain: &str,
    result: &AuthResult,
    resolver: &Resolver,
    deadline: Duration,
) -> Option<bool> {
    let qname = format!("_dmarc.{from_domain}");
    let has_policy = matches!(
        resolver.lookup_sync(&qname, QType::Txt, deadline).await,
        Ok((values, _)) if values.iter().any(|v| v.starts_with("v=DMARC1"))
    );
    if !has_policy {
        return None;
    }
    let spf_pass = matches!(result.spf, SpfResult::Pass);
    let dkim_aligned = result
        .dkim_domains
        .iter()
        .any(|d| zpam_utils::domain::domain_aligns(d, from_domain));
    Some(spf_pass || dkim_aligned)
}

fn analyze_received_chain(
    message: &Message,
    open_relay_patterns: &[Regex],
    suspicious_hop_substrings: &[String],
    result: &mut AuthResult,
) {
    for hop in message.headers_all("Received") {
        result.routing_hops += 1;
        if let Some(pattern) = open_relay_patterns.iter().find(|re| re.is_match(hop)) {
            result.open_relay_markers.push(pattern.as_str().to_string());
            result.suspicious_score = (result.suspicious_score + OPEN_RELAY_HOP_WEIGHT).min(100);
        }
        if let Some(marker) = suspicious_hop_substrings
            .iter()
            .find(|s| hop.to_ascii_lowercase().contains(&s.to_ascii_lowercase()))
        {
            result.suspicious_hop_markers.push(marker.clone());
            result.suspicious_score = (result.suspicious_score + SUSPICIOUS_HOP_WEIGHT).min(100);
        }
    }
}

fn analyze_header_anomalies(
    message: &Message,
    return_path_domain: &str,
    from_domain: &str,
    date_skew_window_secs: i64,
    now_unix: i64,
    result: &mut AuthResult,
) {
    if message.header("Message-ID").is_empty() {
        result.anomaly_notes.push("missing_message_id".to_string());
        result.suspicious_score = (result.suspicious_score + MISSING_MESSAGE_ID_WEIGHT).min(100);
    }

    if !return_path_domain.is_empty()
        && !from_domain.is_empty()
        && !return_path_domain.eq_ignore_ascii_case(from_domain)
    {
        result.anomaly_notes.push("from_return_path_mismatch".to_string());
        result.suspicious_score =
            (result.suspicious_score + FROM_RETURN_PATH_MISMATCH_WEIGHT).min(100);
    }

    let date_header = message.header("Date");
    if !date_header.is_empty() {
        if let Some(parsed) = parse_rfc2822_date_unix(date_header) {
            if (now_unix - parsed).abs() > date_skew_window_secs {
                result.anomaly_notes.push("date_skew".to_string());
                result.suspicious_score = (result.suspicious_score + DATE_SKEW_WEIGHT).min(100);
            }
        }
    }
}

fn extract_domain(header_value: &str) -> String {
    let trimmed = header_value.trim().trim_start_matches('<').trim_end_matches('>');
    let address = trimmed.rsplit(['<', ' ']).next().unwrap_or(trimmed);
    let address = address.trim_end_matches('>');
    zpam_utils::domain::domain_of(address).to_string()
}

fn dkim_field<'a>(signature: &'a str, field: &str) -> Option<&'a str> {
    signature.split(';').find_map(|part| {
        let part = part.trim();
        let (key, value) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(field) {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Minimal RFC 2822 date parser sufficient for skew detection; returns
/// `None` rather than erroring on dates it cannot confidently parse.
fn parse_rfc2822_date_unix(value: &str) -> Option<i64> {
    httpdate_like_parse(value)
}

fn httpdate_like_parse(value: &str) -> Option<i64> {
    // "Day, DD Mon YYYY HH:MM:SS +ZZZZ" — only the pieces we need.
    let value = value.split('(').next().unwrap_or(value).trim();
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }
    let (day_part, month_part, year_part, time_part, offset_part) =
        if parts[0].ends_with(',') {
            (parts[1], parts[2], parts[3], parts[4], parts.get(5).copied())
        } else {
            (parts[0], parts[1], parts[2], parts[3], parts.get(4).copied())
        };
    let day: i64 = day_part.parse().ok()?;
    let month = month_index(month_part)?;
    let year: i64 = year_part.parse().ok()?;
    let mut time_parts = time_part.split(':');
    let hour: i64 = time_parts.next()?.parse().ok()?;
    let minute: i64 = time_parts.next()?.parse().ok()?;
    let second: i64 = time_parts.next().unwrap_or("0").parse().unwrap_or(0);

    let offset_secs = offset_part
        .and_then(|o| {
            let sign = if o.starts_with('-') { -1 } else { 1 };
            let digits = o.trim_start_matches(['+', '-']);
            if digits.len() == 4 {
                let hh: i64 = digits[0..2].parse().ok()?;
                let mm: i64 = digits[2..4].parse().ok()?;
                Some(sign * (hh * 3600 + mm * 60))
            } else {
                None
            }
        })
        .unwrap_or(0);

    let days_since_epoch = days_from_civil(year, month, day);
    Some(days_since_epoch * 86_400 + hour * 3600 + minute * 60 + second - offset_secs)
}

fn month_index(name: &str) -> Option<i64> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let name = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| name.starts_with(m))
        .map(|i| (i as i64) + 1)
}

/// Howard Hinnant's civil-from-days algorithm, used here in reverse to
/// avoid pulling in a full calendar dependency for one date-skew check.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use zpam_dns::{InjectedBackend, RecordSource, ResolverConfig};
    use zpam_types::message::SessionInfo;

    fn session() -> SessionInfo {
        SessionInfo {
            client_ip: "203.0.113.5".parse().unwrap(),
            helo_name: "mail.example.com".into(),
            tls_cipher: String::new(),
            receive_timestamp: 0,
        }
    }

    fn message(headers: Vec<(&str, &str)>) -> Message {
        Message::new(
            "alice@example.com".into(),
            vec!["bob@example.org".into()],
            headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            String::new(),
            String::new(),
            vec![],
            session(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn spf_pass_and_dmarc_pass_keep_auth_score_high() {
        let backend = Arc::new(InjectedBackend::new());
        backend.insert("example.com", QType::Txt, vec!["v=spf1 +all".into()], Duration::from_secs(60));
        backend.insert(
            "_dmarc.example.com",
            QType::Txt,
            vec!["v=DMARC1; p=reject".into()],
            Duration::from_secs(60),
        );
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let config = HeadersConfig::default();
        let msg = message(vec![
            ("From", "alice@example.com"),
            ("Message-ID", "<m1@example.com>"),
        ]);
        let result = evaluate(&msg, &resolver, &config, &[], &[], 3 * 86_400, 0).await;
        assert_eq!(result.spf, SpfResult::Pass);
        assert!(result.dmarc_aligned);
        assert_eq!(result.auth_score, 100);
    }

    #[tokio::test]
    async fn missing_spf_record_yields_none_result() {
        let backend = Arc::new(InjectedBackend::new());
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let config = HeadersConfig::default();
        let msg = message(vec![("From", "eve@nodns.example")]);
        let result = evaluate(&msg, &resolver, &config, &[], &[], 3 * 86_400, 0).await;
        assert_eq!(result.spf, SpfResult::None);
    }

    #[tokio::test]
    async fn missing_message_id_raises_suspicious_score() {
        let backend = Arc::new(InjectedBackend::new());
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let config = HeadersConfig::default();
        let msg = message(vec![("From", "eve@nodns.example")]);
        let result = evaluate(&msg, &resolver, &config, &[], &[], 3 * 86_400, 0).await;
        assert_eq!(result.suspicious_score, MISSING_MESSAGE_ID_WEIGHT);
    }

    /// spec.md Scenario A: clean Gmail-style business mail with SPF
    /// pass, no DKIM signature, and no DMARC policy published at all.
    /// "No policy" must not incur the same penalty as a published
    /// policy that failed alignment.
    #[tokio::test]
    async fn no_dmarc_policy_is_not_penalized_like_a_dmarc_failure() {
        let backend = Arc::new(InjectedBackend::new());
        backend.insert("example.com", QType::Txt, vec!["v=spf1 +all".into()], Duration::from_secs(60));
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let config = HeadersConfig::default();
        let msg = message(vec![
            ("From", "alice@example.com"),
            ("Message-ID", "<m1@example.com>"),
        ]);
        let result = evaluate(&msg, &resolver, &config, &[], &[], 3 * 86_400, 0).await;
        assert_eq!(result.spf, SpfResult::Pass);
        assert!(!result.dkim_present);
        assert!(!result.dmarc_aligned);
        // 100 - DKIM_MISSING_PENALTY only; no DMARC penalty for an absent policy.
        assert_eq!(result.auth_score, 100 - DKIM_MISSING_PENALTY);
    }

    #[tokio::test]
    async fn disabling_dkim_check_skips_the_missing_dkim_penalty() {
        let backend = Arc::new(InjectedBackend::new());
        backend.insert("example.com", QType::Txt, vec!["v=spf1 +all".into()], Duration::from_secs(60));
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let mut config = HeadersConfig::default();
        config.enable_dkim = false;
        let msg = message(vec![
            ("From", "alice@example.com"),
            ("Message-ID", "<m1@example.com>"),
        ]);
        let result = evaluate(&msg, &resolver, &config, &[], &[], 3 * 86_400, 0).await;
        assert!(!result.dkim_present);
        assert_eq!(result.auth_score, 100);
    }

    #[tokio::test]
    async fn open_relay_pattern_in_received_header_is_flagged() {
        let backend = Arc::new(InjectedBackend::new());
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let config = HeadersConfig::default();
        let msg = message(vec![
            ("From", "eve@nodns.example"),
            ("Message-ID", "<m1@nodns.example>"),
            ("Received", "from open-relay.example by mx.example.org"),
        ]);
        let patterns = vec![Regex::new("open-relay").unwrap()];
        let result = evaluate(&msg, &resolver, &config, &patterns, &[], 3 * 86_400, 0).await;
        assert_eq!(result.suspicious_score, OPEN_RELAY_HOP_WEIGHT);
        assert_eq!(result.routing_hops, 1);
    }
}
