//! Initialization helpers for the application startup.

use crate::config::Config;
use crate::engine::Rules;
use crate::resolver::{Lookup, RaceCoordinator, UpstreamClient, Upstreams};
use crate::server::Orchestrator;
use crate::stats::StatsCollector;
use std::sync::Arc;
use tracing::info;

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = config.logging.level.clone();

        // Suppress hickory_server logs unless explicitly enabled/overridden
        if !filter.contains("hickory_server") {
            filter.push_str(",hickory_server=off");
        }
        // Also suppress hickory_proto if not set
        if !filter.contains("hickory_proto") {
            filter.push_str(",hickory_proto=off");
        }

        tracing_subscriber::EnvFilter::new(filter)
    });

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Creates the statistics collector. A disabled collector still counts but never dumps.
pub fn init_stats(config: &Config, upstreams: &Upstreams) -> Arc<StatsCollector> {
    let interval = if config.stats.enable {
        config.stats.log_interval_seconds
    } else {
        0
    };
    StatsCollector::new(interval, upstreams.names())
}

/// Lookup capabilities for the trusted and the untrusted group.
///
/// Only the trusted side mutates queries; untrusted servers see plain packets.
pub fn init_lookups(
    config: &Config,
    stats: Arc<StatsCollector>,
) -> (Arc<dyn Lookup>, Arc<dyn Lookup>) {
    let plain = UpstreamClient::new(config.timeout(), config.force_tcp).with_stats(stats);
    let trusted = plain.clone().with_mutation(config.mutation);
    if config.mutation {
        info!("Compression pointer mutation enabled for trusted servers.");
    }
    (Arc::new(trusted), Arc::new(plain))
}

/// Wires the two racing groups and the classification rules into one orchestrator.
pub fn init_orchestrator(
    config: &Config,
    rules: Rules,
    upstreams: &Upstreams,
    stats: Arc<StatsCollector>,
) -> Orchestrator {
    let (trusted_lookup, untrusted_lookup) = init_lookups(config, stats.clone());
    let trusted = RaceCoordinator::new(upstreams.trusted.clone(), config.delay(), trusted_lookup);
    let untrusted =
        RaceCoordinator::new(upstreams.untrusted.clone(), config.delay(), untrusted_lookup);

    Orchestrator::new(rules, trusted, untrusted, config.bidirectional)
        .with_transport(config.udp_max_bytes, config.force_tcp)
        .with_stats(stats)
}
