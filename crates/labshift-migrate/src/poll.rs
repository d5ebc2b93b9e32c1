//! Deadline-bounded polling of asynchronous export/import jobs.

use crate::error::{MigrationError, PollPhase, Result, TransferError};
use crate::types::PollStatus;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum wait for one polling phase.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60 * 60);

/// Stand-in deadline for a `max_wait` beyond what `Instant` can represent.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cadence and deadline of a polling phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between polls.
    pub interval: Duration,
    /// Total wait after which the phase fails.
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl PollPolicy {
    /// Create a new polling policy.
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// Time source for polling phases.
///
/// Production code reads and sleeps on the tokio timer. Tests substitute a
/// clock that advances only when asked to sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer; honours a paused runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Outcome of a polling phase that reached a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Number of status requests made.
    pub polls: u32,
    /// Time from the first poll until the terminal status.
    pub waited: Duration,
}

/// Poll until the job reaches a terminal status or the deadline passes.
///
/// The deadline is `policy.max_wait` after the first poll and covers the
/// status requests as well as the pauses between them: a request still
/// running at the deadline is abandoned. The first poll happens
/// immediately; the last pause is shortened so the phase ends exactly at
/// the deadline. Transient errors count as "not ready yet"; any other
/// error ends the phase.
pub async fn poll_until_terminal<F, Fut>(
    phase: PollPhase,
    policy: PollPolicy,
    clock: &dyn Clock,
    mut poll: F,
) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus>>,
{
    let start = clock.now();
    let deadline = start
        .checked_add(policy.max_wait)
        .unwrap_or_else(|| start + UNBOUNDED_WAIT);
    let timed_out = |now: Instant| {
        MigrationError::Transfer(TransferError::Timeout {
            phase,
            waited: now.saturating_duration_since(start),
        })
    };
    let mut polls = 0u32;

    loop {
        polls += 1;
        let remaining = deadline.saturating_duration_since(clock.now());
        let Ok(status) = tokio::time::timeout(remaining, poll()).await else {
            warn!(%phase, polls, "Status request still running at the deadline");
            return Err(timed_out(clock.now()));
        };

        let waited = clock.now().saturating_duration_since(start);
        match status {
            Ok(PollStatus::Finished) => {
                debug!(%phase, polls, waited_secs = waited.as_secs(), "Phase finished");
                return Ok(PollOutcome { polls, waited });
            }
            Ok(PollStatus::Failed(reason)) => {
                let error = match phase {
                    PollPhase::Export => TransferError::ExportFailed(reason),
                    PollPhase::Import => TransferError::ImportFailed(reason),
                };
                return Err(error.into());
            }
            Ok(PollStatus::Pending) => {
                debug!(%phase, polls, waited_secs = waited.as_secs(), "Not ready yet");
            }
            Err(e) if e.is_transient() => {
                warn!(%phase, polls, error = %e, "Transient error while polling, will retry");
            }
            Err(e) => return Err(e),
        }

        let now = clock.now();
        if now >= deadline {
            return Err(timed_out(now));
        }

        clock
            .sleep(policy.interval.min(deadline.saturating_duration_since(now)))
            .await;
    }
}
