use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use zpam_trc::Result;

/// One write inside a batched `pipeline` call. The Bayesian learner's
/// training path (spec §4.4) must use the store's native pipelining —
/// "no single-key round-trip per token is acceptable for messages with
/// thousands of tokens" — so `pipeline` takes a list of these rather
/// than exposing a round-trip-per-call API.
#[derive(Debug, Clone)]
pub enum PipelineOp {
    HashIncr {
        key: String,
        field: String,
        delta: i64,
    },
    HashIncrWithExpire {
        key: String,
        field: String,
        delta: i64,
        ttl: Duration,
    },
    Delete(String),
}

/// The minimal interface the Bayesian learner depends on (spec §9).
/// Deliberately small: five operations plus pipelining, so that both
/// an in-memory test double and a real external key-value service can
/// implement it without either being a leaky superset of the other.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Fetches every key in `keys` in a single round-trip, in order.
    /// A key with no hash at the backend comes back as an empty map,
    /// matching what `hash_get_all` would return for it individually.
    /// Bayes classification (spec §4.4: "batch-fetch all token records
    /// for the message") depends on this instead of one `hash_get_all`
    /// per token.
    async fn hash_get_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.hash_get_all(key).await?);
        }
        Ok(out)
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    async fn key_delete(&self, key: &str) -> Result<()>;

    async fn scan_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Executes every operation in `ops` as a single round-trip to the
    /// backend. Implementations that cannot batch natively must still
    /// honor the "no error until the whole pipeline is attempted"
    /// contract, but should prefer batching when the backend supports it.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()>;

    /// Deletes `key` and every `prefix:*` key in batches of
    /// `batch_size`, as required by `reset(user)` (spec §4.4).
    async fn delete_prefix(&self, prefix: &str, batch_size: usize) -> Result<()> {
        let keys = self.scan_by_prefix(prefix).await?;
        for chunk in keys.chunks(batch_size.max(1)) {
            for key in chunk {
                self.key_delete(key).await?;
            }
        }
        Ok(())
    }
}
