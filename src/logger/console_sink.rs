use crate::config::LoggingConfig;
use crate::logger::types::{QueryLogAction, QueryLogEntry, QueryLogSink};
use tracing::info;

/// Writes query entries through `tracing`, as structured fields or one text line.
pub struct ConsoleLogSink {
    json: bool,
}

impl ConsoleLogSink {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            json: config.format == "json",
        }
    }
}

fn outcome(entry: &QueryLogEntry) -> String {
    let upstream = entry.upstream.as_deref().unwrap_or("?");
    match entry.action {
        QueryLogAction::Blacklisted => "blacklisted, empty reply".to_string(),
        QueryLogAction::Trusted => format!("trusted answer from {}", upstream),
        QueryLogAction::Untrusted => format!("untrusted answer from {}", upstream),
        QueryLogAction::Fallback => format!("fallback answer from {}", upstream),
        QueryLogAction::Empty => "no answer, empty reply".to_string(),
    }
}

impl QueryLogSink for ConsoleLogSink {
    fn log(&self, entry: &QueryLogEntry) {
        if self.json {
            info!(
                target: "dns_query",
                client = %entry.client_ip,
                domain = %entry.domain,
                r#type = %entry.query_type,
                action = ?entry.action,
                upstream = entry.upstream.as_deref().unwrap_or(""),
                lat = entry.latency_ms
            );
            return;
        }

        info!(
            target: "dns_query",
            "{} {} ({}) -> {} [{}ms]",
            entry.client_ip,
            entry.domain,
            entry.query_type,
            outcome(entry),
            entry.latency_ms
        );
    }
}
