//! Bayesian learner (C4): OSB tokenisation, pipelined training writes,
//! and Robinson geometric-mean classification (spec §4.4).

use std::time::Duration;

use zpam_config::LearningConfig;
use zpam_nlp::{hash_if_long, OsbTokenizer, TokenizerConfig};
use zpam_store::{KvStore, PipelineOp};
use zpam_trc::Result;

fn token_key(prefix: &str, user: &str, token: &str) -> String {
    format!("{prefix}:bayes:token:{user}:{}", hash_if_long(token))
}

fn user_key(prefix: &str, user: &str) -> String {
    format!("{prefix}:bayes:user:{user}")
}

fn tokenizer_for(config: &LearningConfig) -> OsbTokenizer {
    OsbTokenizer::new(TokenizerConfig {
        min_len: config.min_token_len,
        max_len: config.max_token_len,
        window: config.osb_window,
        max_tokens: config.max_tokens,
    })
}

/// Trains on `text`, incrementing per-token and per-user counters in a
/// single pipelined round-trip (spec §4.4: "no single-key round-trip
/// per token is acceptable for messages with thousands of tokens").
pub async fn train(
    store: &dyn KvStore,
    config: &LearningConfig,
    user: &str,
    text: &str,
    is_spam: bool,
) -> Result<()> {
    let tokenizer = tokenizer_for(config);
    let tokens = tokenizer.tokenize(text);
    let ttl = Duration::from_secs(config.token_ttl_secs);
    let field = if is_spam { "spam" } else { "ham" };

    let mut ops: Vec<PipelineOp> = Vec::with_capacity(tokens.len() + 1);
    for token in &tokens {
        ops.push(PipelineOp::HashIncrWithExpire {
            key: token_key(&config.key_prefix, user, token),
            field: field.to_string(),
            delta: 1,
            ttl,
        });
    }
    let user_field_count = if is_spam { "spam_learned" } else { "ham_learned" };
    let user_token_field = if is_spam { "spam_tokens" } else { "ham_tokens" };
    ops.push(PipelineOp::HashIncr {
        key: user_key(&config.key_prefix, user),
        field: user_field_count.to_string(),
        delta: 1,
    });
    ops.push(PipelineOp::HashIncr {
        key: user_key(&config.key_prefix, user),
        field: user_token_field.to_string(),
        delta: tokens.len() as i64,
    });

    store.pipeline(ops).await
}

/// `reset(user)` (spec §4.4): deletes the user stats hash and all
/// `token:<u>:*` entries in batches.
pub async fn reset(store: &dyn KvStore, config: &LearningConfig, user: &str) -> Result<()> {
    store
        .delete_prefix(
            &format!("{}:bayes:token:{user}:", config.key_prefix),
            config.reset_batch_size,
        )
        .await?;
    store.key_delete(&user_key(&config.key_prefix, user)).await
}

/// Classification outcome: `0.5` is returned both for "not enough
/// training data yet" and for "no token carried signal" — both are
/// legitimately neutral under spec §4.4's algorithm, not an error.
pub async fn classify(
    store: &dyn KvStore,
    config: &LearningConfig,
    user: &str,
    text: &str,
) -> Result<f64> {
    let user_stats = store.hash_get_all(&user_key(&config.key_prefix, user)).await?;
    let spam_learned: u64 = parse_field(&user_stats, "spam_learned");
    let ham_learned: u64 = parse_field(&user_stats, "ham_learned");
    if spam_learned < config.min_learns || ham_learned < config.min_learns {
        return Ok(0.5);
    }

    let tokenizer = tokenizer_for(config);
    let tokens = tokenizer.tokenize(text);

    let spam_tokens = parse_field(&user_stats, "spam_tokens") as f64;
    let ham_tokens = parse_field(&user_stats, "ham_tokens") as f64;

    // One round-trip for every token record, not one per token (spec
    // §4.4: "batch-fetch all token records for the message").
    let token_keys: Vec<String> = tokens
        .iter()
        .map(|token| token_key(&config.key_prefix, user, token))
        .collect();
    let token_fields = store.hash_get_many(&token_keys).await?;

    let mut spamminess_values = Vec::with_capacity(tokens.len());
    for fields in &token_fields {
        if fields.is_empty() {
            continue;
        }
        let spam: f64 = parse_field(fields, "spam") as f64;
        let ham: f64 = parse_field(fields, "ham") as f64;

        let p_spam = (spam + 1.0) / (spam_tokens + 2.0);
        let p_ham = (ham + 1.0) / (ham_tokens + 2.0);
        if p_spam + p_ham == 0.0 {
            continue;
        }
        let spamminess = p_spam / (p_spam + p_ham);
        if (spamminess - 0.5).abs() > config.spamminess_threshold {
            spamminess_values.push(spamminess);
        }
    }

    if spamminess_values.is_empty() {
        return Ok(0.5);
    }

    spamminess_values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let retained = if spamminess_values.len() > config.max_significant_tokens {
        let half = config.max_significant_tokens / 2;
        let mut extreme = Vec::with_capacity(config.max_significant_tokens);
        extreme.extend_from_slice(&spamminess_values[..half]);
        let tail_start = spamminess_values.len() - (config.max_significant_tokens - half);
        extreme.extend_from_slice(&spamminess_values[tail_start..]);
        extreme
    } else {
        spamminess_values
    };

    Ok(robinson_combine(&retained))
}

fn robinson_combine(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let log_s: f64 = values.iter().map(|v| v.ln()).sum();
    let log_h: f64 = values.iter().map(|v| (1.0 - v).ln()).sum();
    let s = (log_s / n).exp();
    let h = (log_h / n).exp();
    if s + h == 0.0 {
        0.5
    } else {
        s / (s + h)
    }
}

fn parse_field(fields: &std::collections::HashMap<String, String>, name: &str) -> u64 {
    fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zpam_store::MemoryStore;

    fn config() -> LearningConfig {
        LearningConfig {
            min_learns: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn below_min_learns_returns_neutral() {
        let store = MemoryStore::new();
        let config = config();
        let score = classify(&store, &config, "global", "free money act now").await.unwrap();
        assert_eq!(score, 0.5);
    }

    #[tokio::test]
    async fn trained_spam_tokens_raise_classification_above_neutral() {
        let store = MemoryStore::new();
        let config = config();
        for _ in 0..5 {
            train(&store, &config, "global", "free money act now urgent", true)
                .await
                .unwrap();
            train(&store, &config, "global", "meeting tomorrow afternoon schedule", false)
                .await
                .unwrap();
        }
        let spam_score = classify(&store, &config, "global", "free money act now urgent")
            .await
            .unwrap();
        let ham_score = classify(&store, &config, "global", "meeting tomorrow afternoon schedule")
            .await
            .unwrap();
        assert!(spam_score > 0.5, "spam_score={spam_score}");
        assert!(ham_score < 0.5, "ham_score={ham_score}");
    }

    #[tokio::test]
    async fn reset_clears_user_and_token_state() {
        let store = MemoryStore::new();
        let config = config();
        train(&store, &config, "global", "free money act now", true)
            .await
            .unwrap();
        reset(&store, &config, "global").await.unwrap();
        let stats = store
            .hash_get_all(&user_key(&config.key_prefix, "global"))
            .await
            .unwrap();
        assert!(stats.is_empty());
    }
}
