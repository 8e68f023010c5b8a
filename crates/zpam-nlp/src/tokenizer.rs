//! Deterministic, locale-independent OSB tokenization (spec §4.4).
//!
//! Normalisation: lower-case, replace every byte that is not an ASCII
//! letter, ASCII digit, or whitespace with a single space, then split
//! on whitespace. Words are filtered to `[min_len, max_len]`. Each
//! surviving word is emitted as a unigram; every pair of positions
//! `i < j` with `j - i <= window` is then emitted as an OSB bigram
//! `"w_i|w_j|(j-i)"`. The whole document is capped at `max_tokens`
//! emitted tokens (unigrams and bigrams share the cap, unigrams
//! emitted first, matching the order a streaming tokenizer would
//! naturally produce them in).
//!
//! No Unicode case-folding beyond ASCII is performed, per spec §4.4:
//! "bytes outside ASCII letters are treated as separators."

#[derive(Debug, Clone, Copy)]
pub struct TokenizerConfig {
    pub min_len: usize,
    pub max_len: usize,
    pub window: usize,
    pub max_tokens: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        TokenizerConfig {
            min_len: 3,
            max_len: 40,
            window: 5,
            max_tokens: 10_000,
        }
    }
}

pub struct OsbTokenizer {
    config: TokenizerConfig,
}

impl OsbTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        OsbTokenizer { config }
    }

    fn normalize_words(&self, text: &str) -> Vec<String> {
        let mut normalized = String::with_capacity(text.len());
        for b in text.bytes() {
            if b.is_ascii_alphanumeric() {
                normalized.push((b as char).to_ascii_lowercase());
            } else if b.is_ascii_whitespace() {
                normalized.push(' ');
            } else {
                normalized.push(' ');
            }
        }
        normalized
            .split_whitespace()
            .filter(|w| w.len() >= self.config.min_len && w.len() <= self.config.max_len)
            .map(|w| w.to_string())
            .collect()
    }

    /// Tokenizes `text` into a flat list of token surface strings:
    /// unigrams first (document order), then OSB bigrams in increasing
    /// `(i, j)` order, truncated at `max_tokens`.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let words = self.normalize_words(text);
        let mut tokens = Vec::with_capacity(words.len().min(self.config.max_tokens));

        for w in &words {
            if tokens.len() >= self.config.max_tokens {
                return tokens;
            }
            tokens.push(w.clone());
        }

        let n = words.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if j - i > self.config.window {
                    break;
                }
                if tokens.len() >= self.config.max_tokens {
                    return tokens;
                }
                tokens.push(format!("{}|{}|{}", words[i], words[j], j - i));
            }
        }

        tokens
    }
}
