//! Coalescing guard for heavy periodic work.
//!
//! At most one run is in flight. Triggers arriving meanwhile collapse into a
//! single pending re-run that the in-flight caller performs before it
//! returns, so overlapping triggers never queue up and never run
//! concurrently.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// What happened to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightOutcome {
    /// This caller ran the work, `runs` times in total (1 + re-runs).
    Ran { runs: u32 },
    /// Another run was in flight; a re-run has been requested.
    Coalesced,
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: AtomicBool,
    pending: AtomicBool,
    completed: AtomicU64,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Total number of completed runs.
    pub fn completed_runs(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run `work`, or coalesce into the run already in flight.
    pub async fn run<F, Fut>(&self, mut work: F) -> FlightOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.pending.store(true, Ordering::Release);
            debug!("Run already in flight, coalescing trigger");
            return FlightOutcome::Coalesced;
        }

        let mut runs = 0;
        loop {
            work().await;
            runs += 1;
            self.completed.fetch_add(1, Ordering::Relaxed);

            if self.pending.swap(false, Ordering::AcqRel) {
                continue;
            }
            self.in_flight.store(false, Ordering::Release);

            // A trigger may have landed between the swap and the release.
            if !self.pending.load(Ordering::Acquire)
                || self
                    .in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
            self.pending.store(false, Ordering::Release);
        }

        FlightOutcome::Ran { runs }
    }
}
