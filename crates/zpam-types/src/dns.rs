//! DNS record value type shared between `zpam-dns` (producer) and
//! `zpam-filter` (consumer). Kept here rather than in `zpam-dns` so
//! that `zpam-filter`'s injected-backend test fixtures don't need a
//! dependency on the resolver's worker-pool machinery.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Live,
    Injected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QType {
    Txt,
    A,
    Aaaa,
    Mx,
}

#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub qname: String,
    pub qtype: QType,
    pub values: Vec<String>,
    pub expires_at: Instant,
    pub source: RecordSource,
}

impl DnsRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DnsErrorKind {
    #[error("dns lookup timed out")]
    Timeout,
    #[error("dns name does not exist")]
    NxDomain,
    #[error("dns network error")]
    NetworkError,
    #[error("dns resolver queue is full")]
    Busy,
    #[error("dns resolver has been stopped")]
    Stopped,
}
