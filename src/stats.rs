use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::info;

/// Upstreams beyond this index are not tracked.
const MAX_UPSTREAMS: usize = 16;

#[derive(Debug)]
pub struct StatsCollector {
    // Basic Counters
    total_queries: AtomicU64,
    blacklisted: AtomicU64,
    polluted_skips: AtomicU64,

    // Which group the final answer came from
    trusted_answers: AtomicU64,
    untrusted_answers: AtomicU64,
    fallbacks: AtomicU64,
    empty_replies: AtomicU64,

    // Upstream Latency Tracking, split into TotalTime and Count arrays to stay lock-free.
    upstream_total_ms: [AtomicU64; MAX_UPSTREAMS],
    upstream_count: [AtomicU64; MAX_UPSTREAMS],
    upstream_names: Vec<String>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub blacklisted: u64,
    pub polluted_skips: u64,
    pub trusted_answers: u64,
    pub untrusted_answers: u64,
    pub fallbacks: u64,
    pub empty_replies: u64,
}

impl StatsCollector {
    /// Creates the collector and, for a non-zero interval, spawns the periodic dumper.
    pub fn new(log_interval_sec: u64, upstream_names: Vec<String>) -> Arc<Self> {
        let stats = Arc::new(Self {
            total_queries: AtomicU64::new(0),
            blacklisted: AtomicU64::new(0),
            polluted_skips: AtomicU64::new(0),
            trusted_answers: AtomicU64::new(0),
            untrusted_answers: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            empty_replies: AtomicU64::new(0),
            upstream_total_ms: [0; MAX_UPSTREAMS].map(|_| AtomicU64::new(0)),
            upstream_count: [0; MAX_UPSTREAMS].map(|_| AtomicU64::new(0)),
            upstream_names,
        });

        if log_interval_sec > 0 {
            let stats_clone = stats.clone();
            let interval = Duration::from_secs(log_interval_sec);
            tokio::spawn(async move {
                stats_clone.run_logger(interval).await;
            });
        }

        stats
    }

    pub fn inc_queries(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_blacklisted(&self) {
        self.blacklisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_polluted_skip(&self) {
        self.polluted_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_trusted_answer(&self) {
        self.trusted_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_untrusted_answer(&self) {
        self.untrusted_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_empty_reply(&self) {
        self.empty_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_latency(&self, upstream_idx: usize, ms: u64) {
        if upstream_idx < MAX_UPSTREAMS {
            self.upstream_total_ms[upstream_idx].fetch_add(ms, Ordering::Relaxed);
            self.upstream_count[upstream_idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            blacklisted: self.blacklisted.load(Ordering::Relaxed),
            polluted_skips: self.polluted_skips.load(Ordering::Relaxed),
            trusted_answers: self.trusted_answers.load(Ordering::Relaxed),
            untrusted_answers: self.untrusted_answers.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            empty_replies: self.empty_replies.load(Ordering::Relaxed),
        }
    }

    /// Average latency in milliseconds for one upstream, if it has answered at all.
    pub fn upstream_average_ms(&self, upstream_idx: usize) -> Option<f64> {
        if upstream_idx >= MAX_UPSTREAMS {
            return None;
        }
        let count = self.upstream_count[upstream_idx].load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let total_ms = self.upstream_total_ms[upstream_idx].load(Ordering::Relaxed);
        Some(total_ms as f64 / count as f64)
    }

    async fn run_logger(&self, log_interval: Duration) {
        let mut interval = time::interval(log_interval);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.dump_stats();
        }
    }

    fn dump_stats(&self) {
        let s = self.snapshot();

        let mut upstream_stats = String::new();
        for i in 0..MAX_UPSTREAMS {
            if let Some(avg) = self.upstream_average_ms(i) {
                let name = self
                    .upstream_names
                    .get(i)
                    .map(|s| s.as_str())
                    .unwrap_or("Unknown");
                upstream_stats.push_str(&format!("[{}: {:.1}ms] ", name, avg));
            }
        }

        info!(
            "STATS DUMP: Total: {}, Blacklisted: {}, PollutedSkips: {}, Trusted: {}, Untrusted: {}, Fallbacks: {}, Empty: {}, Upstreams: {}",
            s.total_queries,
            s.blacklisted,
            s.polluted_skips,
            s.trusted_answers,
            s.untrusted_answers,
            s.fallbacks,
            s.empty_replies,
            upstream_stats
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_and_latency() {
        let stats = StatsCollector::new(0, vec!["8.8.8.8:53".to_string()]);
        stats.inc_queries();
        stats.inc_queries();
        stats.inc_blacklisted();
        stats.inc_fallback();
        stats.record_upstream_latency(0, 10);
        stats.record_upstream_latency(0, 30);
        stats.record_upstream_latency(MAX_UPSTREAMS, 30);

        let snap = stats.snapshot();
        assert_eq!(snap.total_queries, 2);
        assert_eq!(snap.blacklisted, 1);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.trusted_answers, 0);
        assert_eq!(stats.upstream_average_ms(0), Some(20.0));
        assert_eq!(stats.upstream_average_ms(1), None);
        assert_eq!(stats.upstream_average_ms(MAX_UPSTREAMS), None);
    }
}
