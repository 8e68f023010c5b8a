use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use zpam_types::dns::{DnsErrorKind, QType};

/// Raw result of a single backend call: the record values (as opaque
/// strings — callers interpret them per `QType`) and the TTL the
/// backend reported for them.
pub type BackendResult = Result<(Vec<String>, Duration), DnsErrorKind>;

/// Pluggable DNS backend (spec §4.2): "the backend is chosen at
/// construction time; the resolver does not inspect the choice
/// elsewhere."
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn resolve(&self, qname: &str, qtype: QType) -> BackendResult;
}

/// System resolver backed by `hickory-resolver`, used in production.
pub struct LiveBackend {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl LiveBackend {
    pub fn new(timeout: Duration) -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        LiveBackend { resolver, timeout }
    }

    pub fn from_system_conf(timeout: Duration) -> std::io::Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(LiveBackend { resolver, timeout })
    }
}

#[async_trait::async_trait]
impl Backend for LiveBackend {
    async fn resolve(&self, qname: &str, qtype: QType) -> BackendResult {
        let record_type = match qtype {
            QType::Txt => RecordType::TXT,
            QType::A => RecordType::A,
            QType::Aaaa => RecordType::AAAA,
            QType::Mx => RecordType::MX,
        };
        let fut = self.resolver.lookup(qname, record_type);
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(DnsErrorKind::Timeout),
            Ok(Err(err)) => {
                use hickory_resolver::error::ResolveErrorKind;
                match err.kind() {
                    ResolveErrorKind::NoRecordsFound { .. } => Err(DnsErrorKind::NxDomain),
                    _ => Err(DnsErrorKind::NetworkError),
                }
            }
            Ok(Ok(lookup)) => {
                let ttl = lookup
                    .record_iter()
                    .map(|r| r.ttl())
                    .min()
                    .unwrap_or(300);
                let values: Vec<String> = lookup
                    .record_iter()
                    .filter_map(|r| record_to_string(r, qtype))
                    .collect();
                if values.is_empty() {
                    Err(DnsErrorKind::NxDomain)
                } else {
                    Ok((values, Duration::from_secs(ttl as u64)))
                }
            }
        }
    }
}

fn record_to_string(record: &hickory_resolver::proto::rr::Record, qtype: QType) -> Option<String> {
    use hickory_resolver::proto::rr::RData;
    match (record.data()?, qtype) {
        (RData::TXT(txt), QType::Txt) => Some(
            txt.txt_data()
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect::<Vec<_>>()
                .join(""),
        ),
        (RData::A(addr), QType::A) => Some(IpAddr::from(addr.0).to_string()),
        (RData::AAAA(addr), QType::Aaaa) => Some(IpAddr::from(addr.0).to_string()),
        (RData::MX(mx), QType::Mx) => Some(mx.exchange().to_string()),
        _ => None,
    }
}

/// Deterministic in-process backend for tests and benchmarks (spec
/// §4.2). Entries are seeded with `insert` and served without any
/// network I/O; domains not seeded resolve as `NxDomain`.
#[derive(Default)]
pub struct InjectedBackend {
    table: parking_lot::RwLock<ahash::AHashMap<(String, QType), BackendEntry>>,
}

#[derive(Clone)]
struct BackendEntry {
    values: Vec<String>,
    ttl: Duration,
    error: Option<DnsErrorKind>,
}

impl InjectedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, qname: &str, qtype: QType, values: Vec<String>, ttl: Duration) {
        self.table.write().insert(
            (qname.to_ascii_lowercase(), qtype),
            BackendEntry {
                values,
                ttl,
                error: None,
            },
        );
    }

    pub fn insert_error(&self, qname: &str, qtype: QType, error: DnsErrorKind) {
        self.table.write().insert(
            (qname.to_ascii_lowercase(), qtype),
            BackendEntry {
                values: Vec::new(),
                ttl: Duration::from_secs(0),
                error: Some(error),
            },
        );
    }
}

#[async_trait::async_trait]
impl Backend for InjectedBackend {
    async fn resolve(&self, qname: &str, qtype: QType) -> BackendResult {
        let key = (qname.to_ascii_lowercase(), qtype);
        match self.table.read().get(&key) {
            Some(entry) => match &entry.error {
                Some(kind) => Err(kind.clone()),
                None => Ok((entry.values.clone(), entry.ttl)),
            },
            None => Err(DnsErrorKind::NxDomain),
        }
    }
}
