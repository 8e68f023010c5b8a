use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::RwLock;
use zpam_types::dns::{DnsRecord, QType, RecordSource};

/// LRU+TTL cache for resolved records (spec §4.2): "Cache hit path
/// must be lock-cheap: a single read under a shared lock, TTL check,
/// return." Reads take the shared lock only; eviction and insertion
/// take the exclusive path, kept short.
pub struct DnsCache {
    capacity: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    entries: AHashMap<(String, QType), DnsRecord>,
    order: VecDeque<(String, QType)>,
}

impl DnsCache {
    pub fn new(capacity: usize) -> Self {
        DnsCache {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner {
                entries: AHashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Returns a live record for `(qname, qtype)`, discarding it first
    /// if it has expired.
    pub fn get(&self, qname: &str, qtype: QType) -> Option<DnsRecord> {
        let now = Instant::now();
        let key = (qname.to_ascii_lowercase(), qtype);
        let guard = self.inner.read();
        let record = guard.entries.get(&key)?;
        if record.is_expired(now) {
            None
        } else {
            Some(record.clone())
        }
    }

    pub fn insert(
        &self,
        qname: &str,
        qtype: QType,
        values: Vec<String>,
        ttl: Duration,
        source: RecordSource,
    ) {
        let key = (qname.to_ascii_lowercase(), qtype);
        let record = DnsRecord {
            qname: key.0.clone(),
            qtype,
            values,
            expires_at: Instant::now() + ttl,
            source,
        };
        let mut guard = self.inner.write();
        if !guard.entries.contains_key(&key) {
            guard.order.push_back(key.clone());
        }
        guard.entries.insert(key, record);
        while guard.entries.len() > self.capacity {
            if let Some(oldest) = guard.order.pop_front() {
                guard.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = DnsCache::new(10);
        cache.insert(
            "example.com",
            QType::Txt,
            vec!["v=spf1 -all".into()],
            Duration::from_millis(0),
            RecordSource::Injected,
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("example.com", QType::Txt).is_none());
    }

    #[test]
    fn lru_eviction_drops_oldest_when_over_capacity() {
        let cache = DnsCache::new(2);
        cache.insert("a.com", QType::A, vec!["1.1.1.1".into()], Duration::from_secs(60), RecordSource::Injected);
        cache.insert("b.com", QType::A, vec!["2.2.2.2".into()], Duration::from_secs(60), RecordSource::Injected);
        cache.insert("c.com", QType::A, vec!["3.3.3.3".into()], Duration::from_secs(60), RecordSource::Injected);
        assert!(cache.get("a.com", QType::A).is_none());
        assert!(cache.get("b.com", QType::A).is_some());
        assert!(cache.get("c.com", QType::A).is_some());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cache = DnsCache::new(10);
        cache.insert("Example.COM", QType::Mx, vec!["mx.example.com".into()], Duration::from_secs(60), RecordSource::Injected);
        assert!(cache.get("example.com", QType::Mx).is_some());
    }
}
