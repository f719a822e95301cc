pub mod console_sink;
pub mod memory_sink;
pub mod types;

pub use self::console_sink::ConsoleLogSink;
pub use self::memory_sink::MemoryLogSink;
pub use self::types::{QueryLogAction, QueryLogEntry, QueryLogSink};

use crate::config::LoggingConfig;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Fans query log entries out to sinks without ever blocking request handling.
pub struct QueryLogger {
    sinks: Vec<mpsc::Sender<QueryLogEntry>>,
}

impl QueryLogger {
    /// Console logging per `config`, plus any extra sinks.
    pub fn new(config: LoggingConfig, extra_sinks: Vec<Box<dyn QueryLogSink>>) -> Arc<Self> {
        let mut sinks: Vec<Box<dyn QueryLogSink>> = Vec::new();
        if config.enable {
            sinks.push(Box::new(ConsoleLogSink::new(config)));
        }
        sinks.extend(extra_sinks);
        Self::with_sinks(sinks)
    }

    pub fn with_sinks(sinks: Vec<Box<dyn QueryLogSink>>) -> Arc<Self> {
        let senders = sinks
            .into_iter()
            .map(|sink| {
                let (tx, mut rx) = mpsc::channel::<QueryLogEntry>(1000);
                tokio::spawn(async move {
                    while let Some(entry) = rx.recv().await {
                        sink.log(&entry);
                    }
                });
                tx
            })
            .collect();

        Arc::new(Self { sinks: senders })
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub fn log(&self, entry: QueryLogEntry) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        // Fire and forget, don't block caller if buffer full
        for sink in rest {
            let _ = sink.try_send(entry.clone());
        }
        let _ = last.try_send(entry);
    }
}
