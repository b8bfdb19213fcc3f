//! Fixed-interval driver for the poll cycle.

use crate::poll::cycle::PollCycle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}

/// Runs a poll cycle immediately and then once per interval until cancelled.
///
/// Cycles never overlap. A cycle that outlasts the interval delays the next
/// tick instead of causing a burst of catch-up cycles.
pub struct Scheduler {
    cycle: PollCycle,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    pub fn new(cycle: PollCycle, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            cycle,
            interval,
            state,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Tick until `shutdown` is cancelled. Returns the number of completed cycles.
    ///
    /// Cancellation is only observed between cycles: a cycle in flight always
    /// finishes before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        info!("going to poll every {}", humantime::format_duration(self.interval));
        self.state.send_replace(SchedulerState::Running);

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let report = self.cycle.run().await;
            cycles += 1;

            info!(
                "poll cycle {} took {:?}: {} points from {} hosts ({} failed, {} devices skipped)",
                cycles,
                started.elapsed(),
                report.points_submitted,
                report.hosts_polled,
                report.hosts_failed,
                report.devices_skipped
            );
        }

        self.state.send_replace(SchedulerState::Stopped);
        info!("scheduler stopped after {} cycles", cycles);
        cycles
    }
}
