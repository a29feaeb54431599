//! Error types for timer scheduling.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::driver::DriverState;
use crate::status::ScheduleId;

/// Errors raised while parsing or constructing a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The expression is neither a duration nor a cron expression, or a
    /// calendar schedule was built from invalid entries.
    #[error("invalid schedule format '{expression}': {reason}")]
    InvalidFormat { expression: String, reason: String },
}

impl ScheduleError {
    pub(crate) fn invalid(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a schedule status store.
///
/// Every variant means the store could not answer; callers must not read a
/// failure as "no status recorded".
#[derive(Debug, Error)]
pub enum MonitorError {
    /// IO error while reading or writing status.
    #[error("status store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted status record could not be decoded.
    #[error("corrupt status record for {id}: {source}")]
    Corrupt {
        id: ScheduleId,
        #[source]
        source: serde_json::Error,
    },

    /// The store is unreachable for any other reason.
    #[error("status store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the timer driver and registry.
#[derive(Debug, Error)]
pub enum TimerError {
    /// Schedule construction failed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The status store failed during start.
    #[error("schedule monitor failed: {0}")]
    Monitor(#[from] MonitorError),

    /// The next occurrence could not be armed even after recomputing from
    /// the current clock.
    #[error("timer {id} could not be armed: occurrence {target} is not after {now}")]
    Arm {
        id: ScheduleId,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The driver has been disposed.
    #[error("timer {0} has been disposed")]
    Disposed(ScheduleId),

    /// The requested transition is not valid from the current state.
    #[error("cannot {operation} timer {id} while {state:?}")]
    InvalidState {
        id: ScheduleId,
        state: DriverState,
        operation: &'static str,
    },

    /// A timer with the same id is already registered.
    #[error("timer already registered: {0}")]
    Duplicate(ScheduleId),

    /// No timer with this id is registered.
    #[error("timer not found: {0}")]
    NotFound(String),
}
