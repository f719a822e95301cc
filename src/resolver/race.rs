//! Staggered racing of one trust class of upstreams.
//!
//! The first server is queried immediately. Each further server is admitted when the
//! stagger timer fires or when an in-flight query fails, whichever comes first. The
//! first successful reply is handed off through a single-slot channel and stops the
//! escalation; later replies are dropped.

use super::types::{Answer, Lookup, Resolver};
use hickory_server::proto::op::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Why the next server was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A permit was available: the initial one, or one released by a failed query.
    Permit,
    /// The stagger interval elapsed.
    Timer,
}

/// Releases admission permits from query tasks.
#[derive(Clone)]
pub struct PermitGranter(Arc<Semaphore>);

impl PermitGranter {
    pub fn grant(&self) {
        self.0.add_permits(1);
    }
}

/// Decides when the next server in priority order may be queried.
pub struct EscalationController {
    permits: Arc<Semaphore>,
    ticker: Option<Interval>,
}

impl EscalationController {
    /// Seeded with one permit. A zero stagger admits every server at once.
    pub fn new(stagger: Duration) -> Self {
        let ticker = (!stagger.is_zero()).then(|| {
            let mut ticker = time::interval_at(Instant::now() + stagger, stagger);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        Self {
            permits: Arc::new(Semaphore::new(1)),
            ticker,
        }
    }

    pub fn granter(&self) -> PermitGranter {
        PermitGranter(self.permits.clone())
    }

    /// Waits until the next server may be admitted.
    pub async fn admit(&mut self) -> Admission {
        let Some(ticker) = self.ticker.as_mut() else {
            return Admission::Timer;
        };
        tokio::select! {
            biased;
            permit = self.permits.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                Admission::Permit
            }
            _ = ticker.tick() => Admission::Timer,
        }
    }
}

/// Races an ordered list of upstreams that share one trust class.
#[derive(Clone)]
pub struct RaceCoordinator {
    servers: Arc<[Resolver]>,
    stagger: Duration,
    lookup: Arc<dyn Lookup>,
}

impl RaceCoordinator {
    pub fn new(servers: Vec<Resolver>, stagger: Duration, lookup: Arc<dyn Lookup>) -> Self {
        Self {
            servers: servers.into(),
            stagger,
            lookup,
        }
    }

    /// Runs one race for `request`.
    ///
    /// At most one [`Answer`] is placed on `result`. `token` is cancelled when the race
    /// returns, and cancelling it from outside stops further escalation. Every spawned
    /// query is joined before this returns; in-flight queries are not aborted.
    pub async fn run(
        &self,
        token: CancellationToken,
        request: Arc<Message>,
        result: mpsc::Sender<Answer>,
    ) {
        let _done = token.clone().drop_guard();
        if self.servers.is_empty() {
            return;
        }

        let question = describe_question(&request);
        let mut escalation = EscalationController::new(self.stagger);
        let mut queries = JoinSet::new();

        for server in self.servers.iter() {
            let admission = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                admission = escalation.admit() => admission,
            };
            debug!(question = %question, server = %server, ?admission, "Querying upstream");

            let task = QueryTask {
                lookup: self.lookup.clone(),
                request: (*request).clone(),
                server: server.clone(),
                result: result.clone(),
                token: token.clone(),
                granter: escalation.granter(),
                question: question.clone(),
            };
            queries.spawn(task.run());
        }

        while let Some(joined) = queries.join_next().await {
            if let Err(e) = joined {
                error!(question = %question, "Upstream query task failed: {}", e);
            }
        }
    }
}

struct QueryTask {
    lookup: Arc<dyn Lookup>,
    request: Message,
    server: Resolver,
    result: mpsc::Sender<Answer>,
    token: CancellationToken,
    granter: PermitGranter,
    question: String,
}

impl QueryTask {
    async fn run(self) {
        match self.lookup.lookup(self.request, &self.server).await {
            Ok((reply, rtt)) => {
                let answer = Answer {
                    reply,
                    server: self.server.clone(),
                    rtt,
                };
                match self.result.try_send(answer) {
                    Ok(()) => {
                        debug!(question = %self.question, server = %self.server, ?rtt, "Query RTT")
                    }
                    Err(_) => {
                        debug!(question = %self.question, server = %self.server, ?rtt, "Discarding late reply")
                    }
                }
                self.token.cancel();
            }
            Err(e) => {
                debug!(question = %self.question, server = %self.server, "Query failed: {:#}", e);
                self.granter.grant();
            }
        }
    }
}

/// `name type` of the first question, for logs.
pub fn describe_question(message: &Message) -> String {
    match message.queries().first() {
        Some(q) => format!("{} {}", q.name(), q.query_type()),
        None => "<no question>".to_string(),
    }
}
