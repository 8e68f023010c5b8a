use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use zpam_types::dns::{DnsErrorKind, QType, RecordSource};

use crate::backend::Backend;
use crate::cache::DnsCache;

pub type LookupOutcome = Result<Vec<String>, DnsErrorKind>;

/// A pending or already-resolved lookup (spec §4.2): "a pending-lookup
/// handle exposing a single completion event." Coalesced submitters
/// each hold their own `Pending` variant backed by distinct receivers
/// fed from the same in-flight backend call.
pub enum AsyncLookup {
    Ready {
        outcome: LookupOutcome,
        from_cache: bool,
    },
    Pending(oneshot::Receiver<LookupOutcome>),
}

impl AsyncLookup {
    pub async fn wait(self, deadline: Duration) -> Result<(Vec<String>, bool), DnsErrorKind> {
        match self {
            AsyncLookup::Ready { outcome, from_cache } => outcome.map(|v| (v, from_cache)),
            AsyncLookup::Pending(rx) => match tokio::time::timeout(deadline, rx).await {
                Err(_) => Err(DnsErrorKind::Timeout),
                Ok(Err(_)) => Err(DnsErrorKind::NetworkError),
                Ok(Ok(outcome)) => outcome.map(|v| (v, false)),
            },
        }
    }
}

struct Request {
    qname: String,
    qtype: QType,
}

type WaiterMap = AHashMap<(String, QType), Vec<oneshot::Sender<LookupOutcome>>>;

struct Inner {
    cache: DnsCache,
    backend: Arc<dyn Backend>,
    in_flight: Mutex<WaiterMap>,
    sender: Mutex<Option<mpsc::Sender<Request>>>,
    stopped: AtomicBool,
    drained: Notify,
    negative_ttl: Duration,
    default_ttl: Duration,
    record_source: RecordSource,
}

/// Bounded worker-pool DNS resolver with request coalescing and a
/// TTL+LRU cache (spec §4.2). Cheap to clone: every clone shares the
/// same queue, cache, and in-flight map.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

pub struct ResolverConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub cache_capacity: usize,
    pub default_ttl: Duration,
    pub negative_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            workers: 10,
            queue_capacity: 1024,
            cache_capacity: 4096,
            default_ttl: Duration::from_secs(300),
            negative_ttl: Duration::from_secs(60),
        }
    }
}

impl Resolver {
    pub fn spawn(backend: Arc<dyn Backend>, record_source: RecordSource, config: ResolverConfig) -> Resolver {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            cache: DnsCache::new(config.cache_capacity),
            backend,
            in_flight: Mutex::new(AHashMap::new()),
            sender: Mutex::new(Some(tx)),
            stopped: AtomicBool::new(false),
            drained: Notify::new(),
            negative_ttl: config.negative_ttl,
            default_ttl: config.default_ttl,
            record_source,
        });
        let dispatcher_inner = inner.clone();
        tokio::spawn(dispatch_loop(dispatcher_inner, rx, config.workers.max(1)));
        Resolver { inner }
    }

    /// Submits `(qname, qtype)`. Returns immediately: a cache hit or a
    /// full queue resolves synchronously via `AsyncLookup::Ready`;
    /// otherwise the caller gets a handle to await.
    pub fn lookup(&self, qname: &str, qtype: QType) -> AsyncLookup {
        if self.inner.stopped.load(Ordering::Acquire) {
            return AsyncLookup::Ready {
                outcome: Err(DnsErrorKind::Stopped),
                from_cache: false,
            };
        }
        if let Some(record) = self.inner.cache.get(qname, qtype) {
            return AsyncLookup::Ready {
                outcome: Ok(record.values),
                from_cache: true,
            };
        }

        let key = (qname.to_ascii_lowercase(), qtype);
        let (resp_tx, resp_rx) = oneshot::channel();
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(waiters) = in_flight.get_mut(&key) {
            waiters.push(resp_tx);
            return AsyncLookup::Pending(resp_rx);
        }

        let sender_guard = self.inner.sender.lock();
        let Some(sender) = sender_guard.as_ref() else {
            drop(sender_guard);
            return AsyncLookup::Ready {
                outcome: Err(DnsErrorKind::Stopped),
                from_cache: false,
            };
        };
        let send_result = sender.try_send(Request {
            qname: qname.to_string(),
            qtype,
        });
        drop(sender_guard);
        match send_result {
            Ok(()) => {
                in_flight.insert(key, vec![resp_tx]);
                AsyncLookup::Pending(resp_rx)
            }
            Err(_) => AsyncLookup::Ready {
                outcome: Err(DnsErrorKind::Busy),
                from_cache: false,
            },
        }
    }

    /// Convenience wrapper that blocks the calling thread until the
    /// lookup completes or `deadline` elapses. Implemented purely on
    /// top of `lookup`/`AsyncLookup::wait` per spec §4.2.
    pub async fn lookup_sync(
        &self,
        qname: &str,
        qtype: QType,
        deadline: Duration,
    ) -> Result<(Vec<String>, bool), DnsErrorKind> {
        self.lookup(qname, qtype).wait(deadline).await
    }

    /// Drains the queue, signals workers to exit, and rejects further
    /// submissions with `Stopped` (spec §4.2).
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        // Register as a waiter before dropping the sender: `notify_waiters`
        // stores no permit, so a waiter that starts listening after
        // `dispatch_loop` has already fired it would wait forever.
        let drained = self.inner.drained.notified();
        let sender = self.inner.sender.lock().take();
        drop(sender);
        drained.await;
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }
}

async fn dispatch_loop(inner: Arc<Inner>, mut rx: mpsc::Receiver<Request>, workers: usize) {
    let permits = Arc::new(Semaphore::new(workers));
    while let Some(request) = rx.recv().await {
        let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
        let inner = inner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            resolve_one(&inner, request).await;
        });
    }
    inner.drained.notify_waiters();
}

async fn resolve_one(inner: &Inner, request: Request) {
    let key = (request.qname.to_ascii_lowercase(), request.qtype);
    let result = inner.backend.resolve(&request.qname, request.qtype).await;

    let outcome: LookupOutcome = match &result {
        Ok((values, ttl)) => {
            let ttl = if ttl.is_zero() { inner.default_ttl } else { *ttl };
            inner.cache.insert(
                &request.qname,
                request.qtype,
                values.clone(),
                ttl,
                inner.record_source,
            );
            Ok(values.clone())
        }
        Err(DnsErrorKind::NxDomain) => {
            inner
                .cache
                .insert(&request.qname, request.qtype, Vec::new(), inner.negative_ttl, inner.record_source);
            Err(DnsErrorKind::NxDomain)
        }
        Err(kind) => Err(*kind),
    };

    let waiters = inner.in_flight.lock().remove(&key);
    if let Some(waiters) = waiters {
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InjectedBackend;

    #[tokio::test]
    async fn cache_hit_avoids_backend_call() {
        let backend = Arc::new(InjectedBackend::new());
        backend.insert("example.com", QType::Txt, vec!["v=spf1 -all".into()], Duration::from_secs(60));
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let (values, from_cache) = resolver
            .lookup_sync("example.com", QType::Txt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!from_cache);
        assert_eq!(values, vec!["v=spf1 -all".to_string()]);

        let (_, from_cache) = resolver
            .lookup_sync("example.com", QType::Txt, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(from_cache);
    }

    #[tokio::test]
    async fn concurrent_lookups_for_same_key_coalesce() {
        let backend = Arc::new(InjectedBackend::new());
        backend.insert("coalesce.com", QType::A, vec!["9.9.9.9".into()], Duration::from_secs(60));
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());

        let a = resolver.lookup("coalesce.com", QType::A);
        let b = resolver.lookup("coalesce.com", QType::A);
        let (ra, rb) = tokio::join!(a.wait(Duration::from_secs(1)), b.wait(Duration::from_secs(1)));
        assert_eq!(ra.unwrap().0, rb.unwrap().0);
    }

    #[tokio::test]
    async fn nxdomain_is_cached_with_negative_ttl() {
        let backend = Arc::new(InjectedBackend::new());
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        let result = resolver
            .lookup_sync("missing.example", QType::Mx, Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap_err(), DnsErrorKind::NxDomain);
        assert_eq!(resolver.cache_len(), 1);
    }

    #[tokio::test]
    async fn stop_rejects_subsequent_submissions() {
        let backend = Arc::new(InjectedBackend::new());
        let resolver = Resolver::spawn(backend, RecordSource::Injected, ResolverConfig::default());
        resolver.stop().await;
        let result = resolver
            .lookup_sync("anything.com", QType::A, Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap_err(), DnsErrorKind::Stopped);
    }
}
