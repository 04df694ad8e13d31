use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::record::Timestamp;

/// A source of per-line timestamps for one run.
pub trait RunClock: Send + Sync + 'static {
    /// Time elapsed since the run started, plus the current wall-clock time.
    fn now(&self) -> Timestamp;
}

/// A clock anchored to wall-clock time when the run starts.
///
/// Elapsed time comes from the TSC via `quanta`, so it never runs backwards
/// even when NTP steps the system clock. Wall-clock time is derived from the
/// anchor plus elapsed time.
#[derive(Debug, Clone)]
pub struct SystemRunClock {
    clock: quanta::Clock,
    start_epoch_millis: i64,
    start_instant: quanta::Instant,
}

impl Default for SystemRunClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        Self {
            clock,
            start_epoch_millis: wall_clock_millis(),
            start_instant,
        }
    }
}

impl SystemRunClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock for a run that started at `start_epoch_millis`.
    pub fn starting_at(start_epoch_millis: i64) -> Self {
        Self {
            start_epoch_millis,
            ..Self::default()
        }
    }
}

impl RunClock for SystemRunClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.clock.now().duration_since(self.start_instant);
        let elapsed_millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let epoch_millis = self
            .start_epoch_millis
            .saturating_add(i64::try_from(elapsed_millis).unwrap_or(i64::MAX));
        Timestamp::new(elapsed_millis, epoch_millis)
    }
}

fn wall_clock_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}
