//! Per-request resolution: blacklist short-circuit, two concurrent races, one reply.

use super::classifier::{AnswerClassifier, Classified};
use super::message::{empty_reply, normalize_request};
use crate::engine::Rules;
use crate::logger::QueryLogAction;
use crate::resolver::{describe_question, RaceCoordinator, Resolver, TrustClass};
use crate::stats::StatsCollector;
use hickory_server::proto::op::{Message, ResponseCode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The reply chosen for one request and how it was reached.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub reply: Message,
    pub action: QueryLogAction,
    /// Upstream whose reply was served, if any.
    pub upstream: Option<Resolver>,
}

impl Resolution {
    fn empty(reply: Message, action: QueryLogAction) -> Self {
        Self {
            reply,
            action,
            upstream: None,
        }
    }
}

pub struct Orchestrator {
    rules: Rules,
    trusted: RaceCoordinator,
    untrusted: RaceCoordinator,
    classifier: AnswerClassifier,
    udp_max_bytes: u16,
    tcp_only: bool,
    stats: Option<Arc<StatsCollector>>,
}

impl Orchestrator {
    pub fn new(
        rules: Rules,
        trusted: RaceCoordinator,
        untrusted: RaceCoordinator,
        bidirectional: bool,
    ) -> Self {
        Self {
            classifier: AnswerClassifier::new(rules.clone(), bidirectional),
            rules,
            trusted,
            untrusted,
            udp_max_bytes: crate::resolver::client::MIN_UDP_SIZE,
            tcp_only: false,
            stats: None,
        }
    }

    /// Payload size advertised upstream and whether upstream traffic is TCP only.
    pub fn with_transport(mut self, udp_max_bytes: u16, tcp_only: bool) -> Self {
        self.udp_max_bytes = udp_max_bytes;
        self.tcp_only = tcp_only;
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Resolves one client request. Always produces a reply.
    pub async fn serve(&self, mut request: Message) -> Resolution {
        let Some(query) = request.queries().first() else {
            let mut reply = empty_reply(&request);
            reply.set_response_code(ResponseCode::FormErr);
            self.count(QueryLogAction::Empty);
            return Resolution::empty(reply, QueryLogAction::Empty);
        };
        let name = query.name().to_string();
        let question = describe_question(&request);

        if self.rules.domain_blacklist.contains(&name) {
            info!(question = %question, "Domain is in blacklist");
            self.count(QueryLogAction::Blacklisted);
            return Resolution::empty(empty_reply(&request), QueryLogAction::Blacklisted);
        }

        normalize_request(&mut request, self.udp_max_bytes, self.tcp_only);
        let request = Arc::new(request);

        let root = CancellationToken::new();
        let _stop = root.clone().drop_guard();
        let trusted_token = root.child_token();
        let untrusted_token = root.child_token();

        let (trusted_tx, mut trusted_rx) = mpsc::channel(1);
        let (untrusted_tx, mut untrusted_rx) = mpsc::channel(1);

        let untrusted_tx = if self.rules.domain_polluted.contains(&name) {
            debug!(question = %question, "Polluted domain. Skip untrusted servers.");
            if let Some(stats) = &self.stats {
                stats.inc_polluted_skip();
            }
            untrusted_token.cancel();
            drop(untrusted_tx);
            None
        } else {
            Some(untrusted_tx)
        };

        let trusted = self.trusted.clone();
        let untrusted = self.untrusted.clone();
        let supervisor_root = root.clone();
        let supervisor_request = request.clone();
        tokio::spawn(async move {
            let trusted_race = trusted.run(trusted_token, supervisor_request.clone(), trusted_tx);
            let untrusted_race = async move {
                if let Some(tx) = untrusted_tx {
                    untrusted.run(untrusted_token, supervisor_request, tx).await;
                }
            };
            tokio::join!(trusted_race, untrusted_race);
            supervisor_root.cancel();
        });

        let classified = self
            .classifier
            .resolve(&question, &mut trusted_rx, &mut untrusted_rx, &root)
            .await;
        root.cancel();

        let resolution = match classified {
            Some(classified) => Self::served(&request, classified),
            None => {
                info!(question = %question, "No upstream answered. Serve empty reply.");
                Resolution::empty(empty_reply(&request), QueryLogAction::Empty)
            }
        };
        self.count(resolution.action);
        resolution
    }

    fn served(request: &Message, classified: Classified) -> Resolution {
        let action = match (classified.fallback, classified.origin) {
            (true, _) => QueryLogAction::Fallback,
            (false, TrustClass::Trusted) => QueryLogAction::Trusted,
            (false, TrustClass::Untrusted) => QueryLogAction::Untrusted,
        };
        let mut reply = classified.answer.reply;
        reply.set_id(request.id());
        Resolution {
            reply,
            action,
            upstream: Some(classified.answer.server),
        }
    }

    fn count(&self, action: QueryLogAction) {
        let Some(stats) = &self.stats else {
            return;
        };
        match action {
            QueryLogAction::Blacklisted => stats.inc_blacklisted(),
            QueryLogAction::Trusted => stats.inc_trusted_answer(),
            QueryLogAction::Untrusted => stats.inc_untrusted_answer(),
            QueryLogAction::Fallback => stats.inc_fallback(),
            QueryLogAction::Empty => stats.inc_empty_reply(),
        }
    }
}
