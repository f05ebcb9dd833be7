//! Frame pacing for the render loop.

use std::{
    thread,
    time::{Duration, Instant},
};

/// Longest step handed to the simulation; a stall longer than this is
/// absorbed rather than replayed.
pub const MAX_FRAME_DT: f64 = 0.25;

/// Measures the time between frames and sleeps to hold a target rate.
#[derive(Debug, Clone)]
pub struct FrameClock {
    period: Duration,
    last: Instant,
    deadline: Instant,
    frame: u64,
}

impl FrameClock {
    pub fn new(frame_rate: u32, now: Instant) -> Self {
        let period = Duration::from_secs_f64(1.0 / frame_rate.max(1) as f64);
        Self {
            period,
            last: now,
            deadline: now + period,
            frame: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Frames ticked so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Seconds since the previous tick, clamped to [`MAX_FRAME_DT`].
    pub fn tick(&mut self, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.frame += 1;
        dt.min(MAX_FRAME_DT)
    }

    /// Time left before the next frame is due.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Sleeps until the next frame is due. A loop that has fallen more than
    /// a period behind restarts its schedule from `now`.
    pub fn wait(&mut self) {
        let now = Instant::now();
        let remaining = self.remaining(now);
        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
        self.advance(now);
    }

    fn advance(&mut self, now: Instant) {
        self.deadline += self.period;
        if self.deadline + self.period < now {
            self.deadline = now + self.period;
        }
    }
}
