//! Round countdown derived from an absolute end timestamp.

use std::{future, time::Duration};

use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::debug;

use crate::clock::SharedClock;

/// Nominal spacing between two ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Events produced while the countdown runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// Whole seconds left, always positive.
    Tick(u32),
    /// Emitted once when the end time is reached.
    Finished,
}

/// Cooperative countdown.
///
/// Every reading recomputes from the end timestamp, so late or skipped ticks
/// never accumulate drift.
pub struct Countdown {
    clock: SharedClock,
    tick: Duration,
    end_time_ms: Option<i64>,
    interval: Option<Interval>,
}

impl Countdown {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_tick(clock, TICK_INTERVAL)
    }

    pub fn with_tick(clock: SharedClock, tick: Duration) -> Self {
        Self {
            clock,
            tick,
            end_time_ms: None,
            interval: None,
        }
    }

    /// (Re)arm the countdown toward `end_time_ms`. The first tick fires immediately.
    pub fn start_from_absolute_end(&mut self, end_time_ms: i64) {
        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.end_time_ms = Some(end_time_ms);
        self.interval = Some(interval);
        debug!(end_time_ms, remaining = self.remaining_seconds(), "countdown started");
    }

    /// Stop ticking without emitting [`CountdownEvent::Finished`].
    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            debug!(remaining = self.remaining_seconds(), "countdown stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn end_time_ms(&self) -> Option<i64> {
        self.end_time_ms
    }

    /// `max(0, ceil((end - now) / 1000))`, or 0 when never started.
    pub fn remaining_seconds(&self) -> u32 {
        let Some(end) = self.end_time_ms else {
            return 0;
        };
        let left_ms = end - self.clock.now_ms();
        if left_ms <= 0 {
            0
        } else {
            u32::try_from((left_ms + 999) / 1000).unwrap_or(u32::MAX)
        }
    }

    /// Wait for the next tick. Pends forever while stopped. Cancel safe.
    pub async fn next_event(&mut self) -> CountdownEvent {
        let Some(interval) = self.interval.as_mut() else {
            return future::pending().await;
        };
        interval.tick().await;

        match self.remaining_seconds() {
            0 => {
                self.interval = None;
                debug!("countdown finished");
                CountdownEvent::Finished
            }
            seconds => CountdownEvent::Tick(seconds),
        }
    }
}
