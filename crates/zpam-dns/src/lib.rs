//! Bounded async DNS resolver (C2): worker pool, request coalescing,
//! TTL+LRU cache, and a pluggable backend (live resolver vs. an
//! in-process deterministic table for tests), generalized to an
//! arbitrary `(qname, qtype)` keyspace rather than a fixed ipv4/ipv6
//! cache pair.

mod backend;
mod cache;
mod resolver;

pub use backend::{Backend, BackendResult, InjectedBackend, LiveBackend};
pub use resolver::{AsyncLookup, Resolver, ResolverConfig};

pub use zpam_types::dns::{DnsErrorKind, DnsRecord, QType, RecordSource};
