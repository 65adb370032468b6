// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-cadence tick scheduling
//!
//! Tick `n` is due at `start + n * interval`. Deadlines are always computed
//! from the start instant, never from the previous wake-up, so sleep jitter
//! does not accumulate. When a tick overruns, the missed deadlines are
//! skipped rather than replayed in a burst.

use std::time::{Duration, Instant};

/// What to do after finishing a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Sleep this long before the next tick
    Sleep(Duration),
    /// Already late; start the next tick immediately
    Proceed { skipped: u64 },
}

#[derive(Debug, Clone)]
pub struct FramePacer {
    start: Instant,
    interval: Duration,
    /// Index of the tick currently being produced
    tick: u64,
}

impl FramePacer {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval: interval.max(Duration::from_micros(1)),
            tick: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Index of the current tick
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Stream timestamp of the current tick, `tick * interval`
    pub fn timestamp(&self) -> Duration {
        self.offset(self.tick)
    }

    fn offset(&self, tick: u64) -> Duration {
        Duration::from_nanos((self.interval.as_nanos() as u64).saturating_mul(tick))
    }

    /// Deadline of tick `n`
    pub fn deadline(&self, tick: u64) -> Instant {
        self.start + self.offset(tick)
    }

    /// Finish the current tick at `now` and pick the next one
    ///
    /// The next tick is the first one whose deadline is not already past.
    pub fn advance(&mut self, now: Instant) -> Pace {
        let next = self.tick + 1;
        let next_deadline = self.deadline(next);
        if now <= next_deadline {
            self.tick = next;
            return Pace::Sleep(next_deadline - now);
        }

        // Late: jump to the tick whose slot contains `now`
        let elapsed = now.duration_since(self.start).as_nanos() as u64;
        let current = elapsed / self.interval.as_nanos() as u64;
        let target = current.max(next);
        let skipped = target - next;
        self.tick = target;
        Pace::Proceed { skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_on_time_sleeps_until_deadline() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(start, 10 * MS);
        assert_eq!(pacer.timestamp(), Duration::ZERO);

        assert_eq!(pacer.advance(start + 3 * MS), Pace::Sleep(7 * MS));
        assert_eq!(pacer.tick(), 1);
        assert_eq!(pacer.timestamp(), 10 * MS);
    }

    #[test]
    fn test_sleep_is_anchored_to_start() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(start, 10 * MS);
        pacer.advance(start + 2 * MS);
        // Woke up late for tick 1, finished at 14 ms: tick 2 is still due at 20 ms
        assert_eq!(pacer.advance(start + 14 * MS), Pace::Sleep(6 * MS));
        assert_eq!(pacer.tick(), 2);
    }

    #[test]
    fn test_overrun_drops_missed_ticks() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(start, 10 * MS);
        // Tick 0 took 35 ms: ticks 1 and 2 are dropped, tick 3 starts now
        assert_eq!(pacer.advance(start + 35 * MS), Pace::Proceed { skipped: 2 });
        assert_eq!(pacer.tick(), 3);
        assert_eq!(pacer.timestamp(), 30 * MS);
        assert_eq!(pacer.advance(start + 36 * MS), Pace::Sleep(4 * MS));
    }

    #[test]
    fn test_slightly_late_proceeds_without_skipping() {
        let start = Instant::now();
        let mut pacer = FramePacer::new(start, 10 * MS);
        assert_eq!(pacer.advance(start + 12 * MS), Pace::Proceed { skipped: 0 });
        assert_eq!(pacer.tick(), 1);
    }
}
