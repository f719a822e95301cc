#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub client_ip: String,
    pub domain: String,
    pub query_type: String,
    pub action: QueryLogAction,
    pub upstream: Option<String>, // Server whose reply was served
    pub latency_ms: u64,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum QueryLogAction {
    /// Name is on the domain blacklist; an empty reply was served.
    Blacklisted,
    /// Reply from the trusted group was accepted.
    Trusted,
    /// Reply from the untrusted group was accepted.
    Untrusted,
    /// A suspect reply was served because the other group never answered.
    Fallback,
    /// Nobody answered; an empty reply was synthesized.
    Empty,
}

pub trait QueryLogSink: Send + Sync {
    fn log(&self, entry: &QueryLogEntry);
}
