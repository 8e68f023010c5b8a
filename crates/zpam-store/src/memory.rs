use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use zpam_trc::Result;

use crate::kv::{KvStore, PipelineOp};

struct Entry {
    fields: HashMap<String, String>,
    expires_at: Option<Instant>,
}

/// In-memory `KvStore` with real concurrency semantics (a `Mutex`
/// guarding the whole map, short critical sections), used by tests and
/// benchmarks in place of an external key-value service. Spec §4.4:
/// "Two trainers for the same user may run concurrently; counter
/// increments are atomic" — satisfied here because every mutating
/// operation takes the lock for the duration of a single op.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn is_live(entry: &Entry, now: Instant) -> bool {
        entry.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let data = self.data.lock();
        Ok(data
            .get(key)
            .filter(|e| Self::is_live(e, now))
            .and_then(|e| e.fields.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let now = Instant::now();
        let data = self.data.lock();
        Ok(data
            .get(key)
            .filter(|e| Self::is_live(e, now))
            .map(|e| e.fields.clone())
            .unwrap_or_default())
    }

    async fn hash_get_many(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>> {
        let now = Instant::now();
        let data = self.data.lock();
        Ok(keys
            .iter()
            .map(|key| {
                data.get(key)
                    .filter(|e| Self::is_live(e, now))
                    .map(|e| e.fields.clone())
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut data = self.data.lock();
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            fields: HashMap::new(),
            expires_at: None,
        });
        let value = entry
            .fields
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let new_value: i64 = value.parse().unwrap_or(0) + delta;
        *value = new_value.to_string();
        Ok(new_value)
    }

    async fn key_delete(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    async fn scan_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let data = self.data.lock();
        Ok(data
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && Self::is_live(e, now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> Result<()> {
        let mut data = self.data.lock();
        let now = Instant::now();
        for op in ops {
            match op {
                PipelineOp::HashIncr { key, field, delta } => {
                    let entry = data.entry(key).or_insert_with(|| Entry {
                        fields: HashMap::new(),
                        expires_at: None,
                    });
                    let value = entry.fields.entry(field).or_insert_with(|| "0".to_string());
                    let new_value: i64 = value.parse().unwrap_or(0) + delta;
                    *value = new_value.to_string();
                }
                PipelineOp::HashIncrWithExpire {
                    key,
                    field,
                    delta,
                    ttl,
                } => {
                    let entry = data.entry(key).or_insert_with(|| Entry {
                        fields: HashMap::new(),
                        expires_at: None,
                    });
                    let value = entry.fields.entry(field).or_insert_with(|| "0".to_string());
                    let new_value: i64 = value.parse().unwrap_or(0) + delta;
                    *value = new_value.to_string();
                    entry.expires_at = Some(now + ttl);
                }
                PipelineOp::Delete(key) => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[allow(dead_code)]
fn _assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_incr_accumulates() {
        let store = MemoryStore::new();
        store.hash_incr("k", "spam", 1).await.unwrap();
        store.hash_incr("k", "spam", 2).await.unwrap();
        assert_eq!(store.hash_get("k", "spam").await.unwrap(), Some("3".into()));
    }

    #[tokio::test]
    async fn expiry_hides_entry_without_removing_others() {
        let store = MemoryStore::new();
        store
            .pipeline(vec![PipelineOp::HashIncrWithExpire {
                key: "k".into(),
                field: "spam".into(),
                delta: 1,
                ttl: Duration::from_millis(1),
            }])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.hash_get("k", "spam").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_get_many_preserves_order_and_fills_missing_with_empty() {
        let store = MemoryStore::new();
        store.hash_incr("token:u:a", "spam", 3).await.unwrap();
        store.hash_incr("token:u:c", "ham", 2).await.unwrap();
        let keys = vec!["token:u:a".to_string(), "token:u:b".to_string(), "token:u:c".to_string()];
        let rows = store.hash_get_many(&keys).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("spam"), Some(&"3".to_string()));
        assert!(rows[1].is_empty());
        assert_eq!(rows[2].get("ham"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn delete_prefix_removes_matching_keys_only() {
        let store = MemoryStore::new();
        store.hash_incr("token:u:a", "spam", 1).await.unwrap();
        store.hash_incr("token:u:b", "spam", 1).await.unwrap();
        store.hash_incr("user:u", "spam_learned", 1).await.unwrap();
        store.delete_prefix("token:u:", 10).await.unwrap();
        assert!(store.hash_get_all("token:u:a").await.unwrap().is_empty());
        assert!(!store.hash_get_all("user:u").await.unwrap().is_empty());
    }
}
