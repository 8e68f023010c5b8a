#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Disable,
}

impl Level {
    pub fn as_tracing_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Disable => "off",
        }
    }
}

/// The catalogue of structured events the core emits, grouped by the
/// component that raises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    // C8 milter server
    ConnectionStart,
    ConnectionEnd,
    SessionError,
    ConcurrencyLimitReached,
    ShutdownBegin,
    ShutdownComplete,
    // C2 DNS
    DnsLookupStart,
    DnsLookupHit,
    DnsLookupCoalesced,
    DnsTimeout,
    DnsNxDomain,
    DnsNetworkError,
    DnsQueueFull,
    // C3 auth
    AuthEvaluated,
    // C4 bayes
    BayesTrained,
    BayesClassified,
    BayesReset,
    BayesStoreError,
    // C5/C6/C7 scoring
    ScorerPanicked,
    PluginError,
    PluginTimeout,
    OrchestratorTimeout,
    ScoreComputed,
    // C9/C10
    ActionDecided,
    RuleReload,
    RuleMatched,
}
