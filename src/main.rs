use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dns_arbiter::config::Config;
use dns_arbiter::engine::ListManager;
use dns_arbiter::health::HealthChecker;
use dns_arbiter::init::{init_orchestrator, init_stats, setup_logging};
use dns_arbiter::logger::QueryLogger;
use dns_arbiter::resolver::{UpstreamClient, Upstreams};
use dns_arbiter::server::DnsHandler;
use dns_arbiter::supervisor;
use hickory_server::ServerFuture;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args().nth(1).unwrap_or("config.toml".to_string());
    let config_exists = std::path::Path::new(&config_path).exists();
    let config = if config_exists {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting dns-arbiter...");

    if !config_exists {
        info!("Config file not found, using defaults.");
    }

    // 3. Load Lists & Classify Upstreams
    let manager = ListManager::new(config.clone());
    let domestic = manager.load_domestic().await;
    let upstreams = Upstreams::classify(&config, &domestic);
    let rules = manager.load(domestic).await?;

    // 4. Init Stats & QueryLogger
    let stats = init_stats(&config, &upstreams);
    let logger = QueryLogger::new(config.logging.clone(), vec![]);

    // 5. Build Handler
    let orchestrator = Arc::new(init_orchestrator(&config, rules, &upstreams, stats.clone()));
    let handler = DnsHandler::new(orchestrator, stats.clone(), logger);

    // 6. Spawn Health Check
    let shutdown = CancellationToken::new();
    let checker = HealthChecker::new(
        upstreams.all(),
        &config.test_domains,
        Arc::new(UpstreamClient::new(config.timeout(), config.force_tcp)),
        Duration::from_secs(config.health_check_interval_sec),
    )?;
    let health_token = shutdown.clone();
    tokio::spawn(async move {
        supervisor::run_until_cancelled(health_token, "health-check", move || {
            checker.clone().round()
        })
        .await;
    });

    // 7. Start Server
    let mut server = ServerFuture::new(handler);
    let addr = config.listen_addr()?;

    // UDP
    let udp_socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("Failed to bind UDP {}", addr))?;
    server.register_socket(udp_socket);

    // TCP
    let tcp_listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP {}", addr))?;
    server.register_listener(tcp_listener, Duration::from_secs(5));

    info!("DNS Server listening on {}", addr);

    // 8. Graceful Shutdown
    tokio::select! {
        res = server.block_until_done() => {
            if let Err(e) = res {
                error!("Server stopped: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }
    shutdown.cancel();

    Ok(())
}
