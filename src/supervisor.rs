//! Restarts a background task with exponential backoff, isolating its failures.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const INITIAL_GAP: Duration = Duration::from_millis(100);
const MAX_GAP: Duration = Duration::from_secs(16);

/// Gap between two runs of a supervised task.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_GAP,
        }
    }
}

impl Backoff {
    /// Gap after a failed run. Doubles on every consecutive failure.
    pub fn failure(&mut self) -> Duration {
        let gap = self.current;
        self.current = (self.current * 2).min(MAX_GAP);
        gap
    }

    /// Gap after a successful run. Resets the doubling.
    pub fn success(&mut self) -> Duration {
        self.current = INITIAL_GAP;
        INITIAL_GAP
    }
}

/// Runs `task` repeatedly until `token` is cancelled.
///
/// Each run is spawned on its own so a panic ends only that run. Errors and panics are
/// logged and delay the next run by the backoff gap.
pub async fn run_until_cancelled<F, Fut>(token: CancellationToken, name: &'static str, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut backoff = Backoff::default();
    loop {
        let mut handle = tokio::spawn(task());
        let joined = tokio::select! {
            _ = token.cancelled() => {
                handle.abort();
                return;
            }
            joined = &mut handle => joined,
        };

        let gap = match joined {
            Ok(Ok(())) => backoff.success(),
            Ok(Err(e)) => {
                error!(task = name, "Background task failed: {:#}", e);
                backoff.failure()
            }
            Err(e) => {
                error!(task = name, "Background task aborted: {}", e);
                backoff.failure()
            }
        };
        debug!(task = name, ?gap, "Next run scheduled");

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(gap) => {}
        }
    }
}
