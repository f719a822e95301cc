//! Periodic reachability probes against every configured upstream.

use crate::resolver::{Lookup, Resolver};
use anyhow::{anyhow, Context, Result};
use hickory_server::proto::op::{Message, Query};
use hickory_server::proto::rr::{Name, RecordType};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct HealthChecker {
    resolvers: Arc<[Resolver]>,
    domains: Arc<[Name]>,
    lookup: Arc<dyn Lookup>,
    interval: Duration,
    next_id: Arc<AtomicU16>,
}

impl HealthChecker {
    pub fn new(
        resolvers: Vec<Resolver>,
        domains: &[String],
        lookup: Arc<dyn Lookup>,
        interval: Duration,
    ) -> Result<Self> {
        let domains = domains
            .iter()
            .map(|d| Name::from_ascii(d).with_context(|| format!("Invalid test domain {}", d)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            resolvers: resolvers.into(),
            domains: domains.into(),
            lookup,
            interval,
            next_id: Arc::new(AtomicU16::new(1)),
        })
    }

    fn probe(&self, name: &Name) -> Message {
        let mut message = Message::new();
        message
            .set_id(self.next_id.fetch_add(1, Ordering::Relaxed))
            .set_recursion_desired(true);
        message.add_query(Query::query(name.clone(), RecordType::A));
        message
    }

    /// Queries every test domain against every upstream once.
    ///
    /// Fails only when there was something to probe and every probe failed.
    pub async fn check_once(&self) -> Result<()> {
        let mut probes = Vec::new();
        for resolver in self.resolvers.iter() {
            for name in self.domains.iter() {
                let request = self.probe(name);
                probes.push(async move {
                    let outcome = self.lookup.lookup(request, resolver).await;
                    (resolver, name, outcome)
                });
            }
        }
        if probes.is_empty() {
            return Ok(());
        }

        let total = probes.len();
        let mut failed = 0;
        for (resolver, name, outcome) in futures::future::join_all(probes).await {
            match outcome {
                Ok((reply, rtt)) => info!(
                    server = %resolver,
                    domain = %name,
                    ?rtt,
                    answers = reply.answers().len(),
                    "Health check OK"
                ),
                Err(e) => {
                    failed += 1;
                    warn!(server = %resolver, domain = %name, "Health check failed: {:#}", e)
                }
            }
        }

        if failed == total {
            return Err(anyhow!("All {} health probes failed", total));
        }
        Ok(())
    }

    /// One supervised round: a check, then the configured pause.
    pub async fn round(self) -> Result<()> {
        self.check_once().await?;
        tokio::time::sleep(self.interval).await;
        Ok(())
    }
}
