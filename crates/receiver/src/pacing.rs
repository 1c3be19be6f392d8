use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30);

/// Frame budget for the producer loop.
///
/// Each iteration sleeps only for whatever is left of the poll interval after
/// receiving and decoding, so a slow decode never adds a full extra interval.
#[derive(Debug, Clone, Copy)]
pub struct FramePacing {
    interval: Duration,
}

impl FramePacing {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn frame_duration(&self) -> Duration {
        self.interval
    }

    /// Time left in the budget of an iteration that started at `started`.
    pub fn remaining(&self, started: Instant) -> Option<Duration> {
        self.interval
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
    }

    /// Sleep out the rest of the budget. Returns `false` when the iteration
    /// already overran it.
    pub fn wait(&self, started: Instant) -> bool {
        match self.remaining(started) {
            Some(rest) => {
                std::thread::sleep(rest);
                true
            }
            None => {
                tracing::trace!(
                    "Frame took longer than the {:?} budget: {:?}",
                    self.interval,
                    started.elapsed()
                );
                false
            }
        }
    }
}

impl Default for FramePacing {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}
