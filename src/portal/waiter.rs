use std::sync::Arc;
use std::time::Duration;

use chrono::Timelike;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::portal::countdown::format_hms;
use crate::portal::traits::WallClock;
use crate::status::SharedSink;

const TICK: Duration = Duration::from_secs(1);
const WALL_CLOCK_REPORT_EVERY: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Deadline reached, go ahead and submit
    Elapsed,
    /// Stop was requested; the run is aborted
    Cancelled,
}

/// Blocks until the application window opens, checking for stop once per tick.
pub struct ScheduledWaiter {
    sink: SharedSink,
    clock: Arc<dyn WallClock>,
    application_hour: u32,
}

impl ScheduledWaiter {
    pub fn new(sink: SharedSink, clock: Arc<dyn WallClock>, application_hour: u32) -> Self {
        Self {
            sink,
            clock,
            application_hour,
        }
    }

    /// Wait out `countdown` if the server gave one, otherwise until the
    /// application hour on the wall clock.
    pub async fn wait(&self, countdown: Option<Duration>, cancel: &CancellationToken) -> WaitOutcome {
        let outcome = match countdown {
            Some(remaining) => self.wait_for_countdown(remaining, cancel).await,
            None => self.wait_for_hour(cancel).await,
        };

        match outcome {
            WaitOutcome::Elapsed => {
                info!("🚀 Application window open");
                self.sink.info("Application window is open!");
            }
            WaitOutcome::Cancelled => {
                self.sink.warning("Wait aborted, no applications will be sent.");
            }
        }
        outcome
    }

    async fn wait_for_countdown(&self, remaining: Duration, cancel: &CancellationToken) -> WaitOutcome {
        let deadline = Instant::now() + remaining;

        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return WaitOutcome::Elapsed;
            }

            self.sink
                .info(&format!("Applications open in {}", format_hms(left)));

            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = sleep(left.min(TICK)) => {}
            }
        }
    }

    async fn wait_for_hour(&self, cancel: &CancellationToken) -> WaitOutcome {
        let mut ticks: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }

            let now = self.clock.now();
            if now.hour() >= self.application_hour {
                return WaitOutcome::Elapsed;
            }

            if ticks % WALL_CLOCK_REPORT_EVERY == 0 {
                self.sink.info(&format!(
                    "It's {}. Waiting for {:02}:00...",
                    now.format("%H:%M:%S"),
                    self.application_hour
                ));
            } else {
                debug!("Wall-clock wait tick at {}", now.format("%H:%M:%S"));
            }
            ticks = ticks.wrapping_add(1);

            tokio::select! {
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = sleep(TICK) => {}
            }
        }
    }
}
