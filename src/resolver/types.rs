use anyhow::Result;
use hickory_server::proto::op::Message;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Whether answers from an upstream may have been tampered with on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustClass {
    Trusted,
    Untrusted,
}

impl TrustClass {
    /// The competing group.
    pub fn other(self) -> Self {
        match self {
            TrustClass::Trusted => TrustClass::Untrusted,
            TrustClass::Untrusted => TrustClass::Trusted,
        }
    }
}

impl fmt::Display for TrustClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustClass::Trusted => f.write_str("trusted"),
            TrustClass::Untrusted => f.write_str("untrusted"),
        }
    }
}

/// One configured upstream server. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    id: usize,
    addr: SocketAddr,
    trust: TrustClass,
}

impl Resolver {
    pub fn new(id: usize, addr: SocketAddr, trust: TrustClass) -> Self {
        Self { id, addr, trust }
    }

    /// Index used for per-upstream statistics.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn trust(&self) -> TrustClass {
        self.trust
    }

    /// Printable address, for logs only.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl fmt::Display for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Performs one query against one upstream.
///
/// Returns the reply and the round-trip time. Implementations are free to pick the
/// transport and to rewrite the packet on the wire.
#[async_trait::async_trait]
pub trait Lookup: Send + Sync {
    async fn lookup(&self, request: Message, resolver: &Resolver) -> Result<(Message, Duration)>;
}

/// A reply delivered by a race, with the upstream that produced it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub reply: Message,
    pub server: Resolver,
    pub rtt: Duration,
}
