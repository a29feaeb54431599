//! Schedule status stores.
//!
//! A monitor remembers, per schedule id, which occurrence last fired and
//! which is expected next, so missed occurrences can be detected after a
//! restart.

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::past_due::{self, PastDue};
use crate::{MonitorError, Schedule, ScheduleId, ScheduleStatus};

pub use file::FileScheduleMonitor;
pub use memory::MemoryScheduleMonitor;

/// Persistent status store for schedules.
///
/// Implementations are shared between drivers and must be safe to call
/// concurrently for different ids. A failure must surface as an error, never
/// as `Ok(None)`.
#[async_trait]
pub trait ScheduleMonitor: Send + Sync {
    /// Read the stored status for `id`, or `None` when nothing was recorded.
    async fn get_status(&self, id: &ScheduleId) -> Result<Option<ScheduleStatus>, MonitorError>;

    /// Replace the stored status for `id`.
    async fn set_status(&self, id: &ScheduleId, status: &ScheduleStatus)
    -> Result<(), MonitorError>;

    /// Decide whether `id` missed an occurrence, initializing or repairing
    /// the stored status as needed.
    async fn check_past_due(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
        schedule: &Schedule,
    ) -> Result<PastDue, MonitorError> {
        past_due::check_past_due(self, id, now, schedule).await
    }

    /// Shorthand for [`check_past_due`](Self::check_past_due) when only the
    /// verdict matters.
    async fn is_past_due(
        &self,
        id: &ScheduleId,
        now: DateTime<Utc>,
        schedule: &Schedule,
    ) -> Result<bool, MonitorError> {
        Ok(self.check_past_due(id, now, schedule).await?.is_past_due)
    }
}
