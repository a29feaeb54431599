//! Time source for timer drivers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Sleep;

/// Source of the current instant, and of the waits armed against it.
///
/// Drivers compute occurrences from [`Clock::now`] and wait with
/// [`Clock::sleep`]; test clocks should follow tokio's clock so paused time
/// advances both together.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// One wait segment. Never longer than the driver's maximum segment.
    fn sleep(&self, duration: Duration) -> Sleep {
        tokio::time::sleep(duration)
    }
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
