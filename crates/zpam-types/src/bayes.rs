//! Bayesian learner value types (spec C4 / §3 `Token`, `UserStats`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Unigram,
    OsbBigram,
}

/// A tokenised unit ready to be counted against a user's spam/ham
/// tables. `surface` is either the raw token text or, for tokens over
/// 64 bytes, `"hash_" + hex(sha1(token))` per spec §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub surface: String,
    pub class: TokenClass,
}

/// Per-user training counters (spec §3 `UserStats`). `spam_tokens` and
/// `ham_tokens` count tokens observed *with multiplicity* at training
/// time, not unique tokens — spec §9 Open Question, resolved that way
/// here and enforced consistently by `zpam-filter::bayes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub spam_learned: u64,
    pub ham_learned: u64,
    pub spam_tokens: u64,
    pub ham_tokens: u64,
    pub last_trained: i64,
}
