#![allow(dead_code)]

use anyhow::{anyhow, Result};
use dns_arbiter::engine::{CidrTable, DomainList, Rules};
use dns_arbiter::logger::QueryLogger;
use dns_arbiter::resolver::{Lookup, RaceCoordinator, Resolver, TrustClass};
use dns_arbiter::server::{DnsHandler, Orchestrator};
use dns_arbiter::stats::StatsCollector;
use hickory_server::proto::op::{Message, MessageType, Query};
use hickory_server::proto::rr::{Name, RData, Record, RecordType};
use hickory_server::ServerFuture;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Answers every query for a server with one fixed address after a delay.
#[derive(Default)]
pub struct FixedLookup {
    answers: HashMap<SocketAddr, (Duration, IpAddr)>,
    calls: AtomicUsize,
}

impl FixedLookup {
    pub fn answer(mut self, server: &Resolver, delay_ms: u64, ip: &str) -> Self {
        self.answers.insert(
            server.socket_addr(),
            (Duration::from_millis(delay_ms), ip.parse().unwrap()),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Lookup for FixedLookup {
    async fn lookup(&self, request: Message, resolver: &Resolver) -> Result<(Message, Duration)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, ip) = self
            .answers
            .get(&resolver.socket_addr())
            .copied()
            .ok_or_else(|| anyhow!("unreachable {}", resolver))?;
        tokio::time::sleep(delay).await;

        let mut reply = Message::new();
        reply
            .set_id(request.id())
            .set_message_type(MessageType::Response)
            .set_recursion_available(true);
        reply.add_queries(request.queries().to_vec());
        let rdata = match ip {
            IpAddr::V4(v4) => RData::A(v4.into()),
            IpAddr::V6(v6) => RData::AAAA(v6.into()),
        };
        reply.add_answer(Record::from_rdata(
            request.queries()[0].name().clone(),
            300,
            rdata,
        ));
        Ok((reply, delay))
    }
}

pub fn resolver(id: usize, addr: &str, trust: TrustClass) -> Resolver {
    Resolver::new(id, addr.parse().unwrap(), trust)
}

pub fn rules(domestic: &[&str], blacklist: &[&str]) -> Rules {
    Rules {
        domain_blacklist: Arc::new(DomainList::new(blacklist.iter().copied())),
        domain_polluted: Arc::new(DomainList::default()),
        ip_blacklist: Arc::new(CidrTable::default()),
        domestic: Arc::new(CidrTable::new(domestic.iter().copied()).unwrap()),
    }
}

pub struct Harness {
    pub addr: SocketAddr,
    pub stats: Arc<StatsCollector>,
}

/// Serves `orchestrator` over UDP on an ephemeral loopback port.
pub async fn serve(orchestrator: Orchestrator, logger: Arc<QueryLogger>) -> Harness {
    let stats = StatsCollector::new(0, vec![]);
    let orchestrator = Arc::new(orchestrator.with_stats(stats.clone()));
    let handler = DnsHandler::new(orchestrator, stats.clone(), logger);

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let mut server = ServerFuture::new(handler);
    server.register_socket(socket);
    tokio::spawn(async move {
        let _ = server.block_until_done().await;
    });

    Harness { addr, stats }
}

pub fn orchestrator(
    rules: Rules,
    trusted: Vec<Resolver>,
    untrusted: Vec<Resolver>,
    lookup: Arc<FixedLookup>,
) -> Orchestrator {
    Orchestrator::new(
        rules,
        RaceCoordinator::new(trusted, Duration::from_millis(50), lookup.clone()),
        RaceCoordinator::new(untrusted, Duration::from_millis(50), lookup),
        true,
    )
    .with_transport(4096, false)
}

pub fn query(id: u16, name: &str) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id).set_recursion_desired(true);
    msg.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    msg.to_vec().unwrap()
}

/// Sends one query and collects every datagram that comes back within `window`.
pub async fn exchange(server: SocketAddr, packet: &[u8], window: Duration) -> Vec<Message> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(packet, server).await.unwrap();

    let mut replies = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok((len, _))) = tokio::time::timeout_at(deadline, client.recv_from(&mut buf)).await {
        replies.push(Message::from_vec(&buf[..len]).unwrap());
    }
    replies
}

pub fn first_a(reply: &Message) -> Option<String> {
    reply.answers().iter().find_map(|r| match r.data() {
        RData::A(a) => Some(a.0.to_string()),
        _ => None,
    })
}
