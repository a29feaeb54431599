//! Missed-occurrence detection.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::monitor::ScheduleMonitor;
use crate::{MonitorError, Schedule, ScheduleId, ScheduleStatus};

/// Outcome of a past-due check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PastDue {
    /// Whether an occurrence was missed while nothing was running.
    pub is_past_due: bool,
    /// The occurrence to report for a replay (the check time when past due).
    pub last_occurrence: DateTime<Utc>,
    /// The stored status as it stood after the check, `None` when the
    /// schedule had never been seen.
    pub status: Option<ScheduleStatus>,
}

/// Compare the stored status for `id` against `now`.
///
/// - Nothing stored: record `{last: now, next: next(now)}`; not past due.
/// - Stored `next` no longer follows stored `last` under `schedule`: the
///   schedule changed, so `next` is recomputed from `last` and written back
///   before comparing.
/// - `now >= next`: past due. However many occurrences were missed, this
///   reports a single replay.
pub async fn check_past_due<M>(
    monitor: &M,
    id: &ScheduleId,
    now: DateTime<Utc>,
    schedule: &Schedule,
) -> Result<PastDue, MonitorError>
where
    M: ScheduleMonitor + ?Sized,
{
    let Some(mut status) = monitor.get_status(id).await? else {
        let fresh = ScheduleStatus::new(now, schedule.next_occurrence(now), now);
        monitor.set_status(id, &fresh).await?;
        debug!(schedule_id = %id, next = ?fresh.next, "recorded initial status");
        return Ok(PastDue {
            is_past_due: false,
            last_occurrence: now,
            status: None,
        });
    };

    let expected_next = match (status.last, status.next) {
        (Some(last), recorded) => Some(schedule.next_occurrence(last)).filter(|e| Some(*e) != recorded),
        (None, None) => Some(schedule.next_occurrence(now)),
        (None, Some(_)) => None,
    };
    if let Some(expected_next) = expected_next {
        info!(
            schedule_id = %id,
            recorded = ?status.next,
            recomputed = %expected_next,
            "schedule changed since status was recorded, recomputing next occurrence"
        );
        status.next = Some(expected_next);
        status.last_updated = Some(now);
        monitor.set_status(id, &status).await?;
    }

    let next = status.next.unwrap_or(now);
    let is_past_due = now >= next;
    let last_occurrence = if is_past_due {
        now
    } else {
        status.last.unwrap_or(now)
    };
    if is_past_due {
        info!(schedule_id = %id, missed = %next, "schedule is past due");
    }

    Ok(PastDue {
        is_past_due,
        last_occurrence,
        status: Some(status),
    })
}
