//! Counters shared between the poller and in-flight executions.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// How a single claimed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Handler succeeded; payload delete was attempted.
    Completed,
    /// Handler returned an error; payload left in place.
    Failed,
    /// Handler exceeded the handler timeout; payload left in place.
    TimedOut,
    /// Payload was absent when the executor went to read it.
    PayloadMissing,
    /// Reading the payload failed; payload (if any) left in place.
    FetchFailed,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::PayloadMissing => "payload_missing",
            Self::FetchFailed => "fetch_failed",
        }
    }

    /// Whether the payload table entry is left behind for manual recovery.
    pub fn orphans_payload(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::FetchFailed)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a queue instance's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Poll ticks processed.
    pub ticks: u64,
    /// Tasks claimed from the schedule index.
    pub claimed: u64,
    /// Claim attempts that failed with a store error.
    pub claim_errors: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub payload_missing: u64,
    pub fetch_failed: u64,
    /// Payload deletes that failed after a successful handler run.
    pub delete_errors: u64,
    /// Executions running right now.
    pub in_flight: usize,
    /// Highest `in_flight` ever observed.
    pub peak_in_flight: usize,
}

impl QueueStats {
    /// Claimed tasks whose execution has finished, whatever the outcome.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.timed_out + self.payload_missing + self.fetch_failed
    }
}

#[derive(Default)]
pub(crate) struct SharedQueueStats {
    ticks: AtomicU64,
    claimed: AtomicU64,
    claim_errors: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    payload_missing: AtomicU64,
    fetch_failed: AtomicU64,
    delete_errors: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl SharedQueueStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_claim(&self) {
        self.claimed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_claim_error(&self) {
        self.claim_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_delete_error(&self) {
        self.delete_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_outcome(&self, outcome: ExecutionOutcome) {
        let counter = match outcome {
            ExecutionOutcome::Completed => &self.completed,
            ExecutionOutcome::Failed => &self.failed,
            ExecutionOutcome::TimedOut => &self.timed_out,
            ExecutionOutcome::PayloadMissing => &self.payload_missing,
            ExecutionOutcome::FetchFailed => &self.fetch_failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the in-flight count after incrementing.
    pub(crate) fn begin_execution(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        now
    }

    /// Returns the in-flight count after decrementing.
    pub(crate) fn end_execution(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            ticks: self.ticks.load(Ordering::SeqCst),
            claimed: self.claimed.load(Ordering::SeqCst),
            claim_errors: self.claim_errors.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            payload_missing: self.payload_missing.load(Ordering::SeqCst),
            fetch_failed: self.fetch_failed.load(Ordering::SeqCst),
            delete_errors: self.delete_errors.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}
