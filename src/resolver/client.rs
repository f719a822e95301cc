use super::mutation;
use super::types::{Lookup, Resolver};
use crate::stats::StatsCollector;
use anyhow::{anyhow, Context, Result};
use hickory_server::proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tracing::debug;

/// Smallest UDP payload every DNS implementation must accept.
pub const MIN_UDP_SIZE: u16 = 512;

/// Receive buffer for UDP replies. Upstreams may exceed the advertised payload size.
const MAX_UDP_SIZE: usize = 65535;

/// Plain DNS exchange over UDP, with TCP for truncated replies or when forced.
#[derive(Clone)]
pub struct UpstreamClient {
    timeout: Duration,
    tcp_only: bool,
    mutation: bool,
    stats: Option<Arc<StatsCollector>>,
}

impl UpstreamClient {
    pub fn new(timeout: Duration, tcp_only: bool) -> Self {
        Self {
            timeout,
            tcp_only,
            mutation: false,
            stats: None,
        }
    }

    /// Enables compression pointer mutation on outgoing queries.
    pub fn with_mutation(mut self, enable: bool) -> Self {
        self.mutation = enable;
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    fn encode(&self, request: &Message) -> Result<Vec<u8>> {
        let packet = request.to_vec().context("Failed to encode query")?;
        if self.mutation {
            if let Some(mutated) = mutation::mutate(&packet) {
                return Ok(mutated);
            }
        }
        Ok(packet)
    }

    async fn exchange(&self, request: &Message, server: SocketAddr) -> Result<Message> {
        let packet = self.encode(request)?;
        if self.tcp_only {
            return exchange_tcp(&packet, request.id(), server).await;
        }

        let reply = exchange_udp(&packet, request.id(), server).await?;
        if reply.truncated() {
            debug!(server = %server, "Truncated UDP reply, retrying over TCP");
            return exchange_tcp(&packet, request.id(), server).await;
        }
        Ok(reply)
    }
}

#[async_trait::async_trait]
impl Lookup for UpstreamClient {
    async fn lookup(&self, request: Message, resolver: &Resolver) -> Result<(Message, Duration)> {
        let start = Instant::now();
        let reply = tokio::time::timeout(self.timeout, self.exchange(&request, resolver.socket_addr()))
            .await
            .map_err(|_| anyhow!("Query to {} timed out after {:?}", resolver, self.timeout))??;
        let rtt = start.elapsed();

        if let Some(stats) = &self.stats {
            stats.record_upstream_latency(resolver.id(), rtt.as_millis() as u64);
        }
        Ok((reply, rtt))
    }
}

fn check_id(reply: &Message, id: u16, server: SocketAddr) -> Result<()> {
    if reply.id() != id {
        return Err(anyhow!(
            "Reply id {} from {} does not match query id {}",
            reply.id(),
            server,
            id
        ));
    }
    Ok(())
}

async fn exchange_udp(
    packet: &[u8],
    id: u16,
    server: SocketAddr,
) -> Result<Message> {
    let bind: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;
    socket.send(packet).await?;

    let mut buf = vec![0u8; MAX_UDP_SIZE];
    loop {
        let len = socket.recv(&mut buf).await?;
        let reply = match Message::from_vec(&buf[..len]) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(server = %server, "Dropping undecodable datagram: {}", e);
                continue;
            }
        };
        // Stray datagrams are ignored; the caller's timeout bounds the wait.
        if check_id(&reply, id, server).is_ok() {
            return Ok(reply);
        }
    }
}

async fn exchange_tcp(packet: &[u8], id: u16, server: SocketAddr) -> Result<Message> {
    let len = u16::try_from(packet.len()).context("Query too large for TCP framing")?;
    let mut stream = TcpStream::connect(server).await?;

    let mut framed = Vec::with_capacity(packet.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(packet);
    stream.write_all(&framed).await?;

    let len = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;

    let reply = Message::from_vec(&buf).context("Failed to decode TCP reply")?;
    check_id(&reply, id, server)?;
    Ok(reply)
}
