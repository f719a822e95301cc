pub mod client;
pub mod mutation;
pub mod race;
pub mod types;

use crate::config::{parse_server_addr, Config};
use crate::engine::AddressMatcher;
use tracing::{error, info, warn};

pub use self::client::UpstreamClient;
pub use self::race::{describe_question, Admission, EscalationController, RaceCoordinator};
pub use self::types::{Answer, Lookup, Resolver, TrustClass};

/// Configured upstreams split by trust class, in priority order.
#[derive(Debug, Clone, Default)]
pub struct Upstreams {
    pub trusted: Vec<Resolver>,
    pub untrusted: Vec<Resolver>,
}

impl Upstreams {
    /// Splits the configured servers by trust class.
    ///
    /// `trusted_servers` are always trusted. Entries of `servers` are untrusted when their
    /// address is in the domestic table, trusted otherwise.
    pub fn classify(config: &Config, domestic: &dyn AddressMatcher) -> Self {
        let mut upstreams = Upstreams::default();
        let mut next_id = 0;

        for addr in &config.trusted_servers {
            match parse_server_addr(addr) {
                Ok(sa) => {
                    upstreams
                        .trusted
                        .push(Resolver::new(next_id, sa, TrustClass::Trusted));
                    next_id += 1;
                }
                Err(e) => error!("Skipping trusted server: {:#}", e),
            }
        }

        for addr in &config.servers {
            let sa = match parse_server_addr(addr) {
                Ok(sa) => sa,
                Err(e) => {
                    error!("Skipping server: {:#}", e);
                    continue;
                }
            };
            let domestic = domestic.contains(sa.ip()).unwrap_or_else(|e| {
                warn!("CIDR lookup failed for server {}: {:#}", sa, e);
                false
            });
            let trust = if domestic {
                TrustClass::Untrusted
            } else {
                TrustClass::Trusted
            };
            let resolver = Resolver::new(next_id, sa, trust);
            next_id += 1;
            match trust {
                TrustClass::Trusted => upstreams.trusted.push(resolver),
                TrustClass::Untrusted => upstreams.untrusted.push(resolver),
            }
        }

        info!(
            "Trusted servers: [{}], untrusted servers: [{}]",
            join(&upstreams.trusted),
            join(&upstreams.untrusted)
        );
        upstreams
    }

    /// Every upstream, ordered by id.
    pub fn all(&self) -> Vec<Resolver> {
        let mut all: Vec<Resolver> = self
            .trusted
            .iter()
            .chain(self.untrusted.iter())
            .cloned()
            .collect();
        all.sort_by_key(|r| r.id());
        all
    }

    /// Addresses indexed by resolver id, for statistics.
    pub fn names(&self) -> Vec<String> {
        self.all().iter().map(|r| r.address()).collect()
    }
}

fn join(resolvers: &[Resolver]) -> String {
    resolvers
        .iter()
        .map(|r| r.address())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CidrTable;

    #[test]
    fn test_classify_by_domestic_table() {
        let config = Config {
            servers: vec![
                "114.114.114.114".to_string(),
                "8.8.8.8:53".to_string(),
                "bogus".to_string(),
                "119.29.29.29:5353".to_string(),
            ],
            trusted_servers: vec!["223.5.5.5".to_string()],
            ..Config::default()
        };
        let domestic = CidrTable::new(["114.114.0.0/16", "119.29.0.0/16", "223.5.0.0/16"]).unwrap();

        let upstreams = Upstreams::classify(&config, &domestic);

        let trusted: Vec<String> = upstreams.trusted.iter().map(|r| r.address()).collect();
        let untrusted: Vec<String> = upstreams.untrusted.iter().map(|r| r.address()).collect();
        assert_eq!(trusted, vec!["223.5.5.5:53", "8.8.8.8:53"]);
        assert_eq!(untrusted, vec!["114.114.114.114:53", "119.29.29.29:5353"]);
        assert!(upstreams.trusted.iter().all(|r| r.trust() == TrustClass::Trusted));
        assert_eq!(
            upstreams.names(),
            vec![
                "223.5.5.5:53",
                "114.114.114.114:53",
                "8.8.8.8:53",
                "119.29.29.29:5353"
            ]
        );
    }

    #[test]
    fn test_empty_domestic_table_trusts_everything() {
        let config = Config::default();
        let upstreams = Upstreams::classify(&config, &CidrTable::default());
        assert_eq!(upstreams.trusted.len(), 2);
        assert!(upstreams.untrusted.is_empty());
    }
}
