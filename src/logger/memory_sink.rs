use super::{QueryLogEntry, QueryLogSink};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Keeps the most recent entries in a bounded ring buffer.
pub struct MemoryLogSink {
    buffer: Arc<RwLock<VecDeque<QueryLogEntry>>>,
    capacity: usize,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    // Shares the buffer with whoever inspects recent queries.
    pub fn clone_buffer(&self) -> Arc<RwLock<VecDeque<QueryLogEntry>>> {
        self.buffer.clone()
    }
}

impl QueryLogSink for MemoryLogSink {
    fn log(&self, entry: &QueryLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut buffer) = self.buffer.write() else {
            return;
        };
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }
}
