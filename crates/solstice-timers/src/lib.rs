//! Timer trigger scheduling for Solstice.
//!
//! This crate provides:
//! - Schedule expressions (fixed intervals, cron, daily/weekly/monthly lists)
//! - Status monitors that remember the last and next occurrence per schedule
//! - Past-due detection that replays one missed occurrence after downtime
//! - A timer driver that waits in bounded segments and invokes a callback
//! - A registry owning every driver in the process

mod clock;
mod driver;
mod error;
mod invoke;
mod monitor;
mod past_due;
mod registry;
mod schedule;
mod status;

pub use clock::{Clock, SystemClock};
pub use driver::{DEFAULT_MAX_SEGMENT, DriverState, Segments, TimerDriver, TimerOptions};
pub use error::{MonitorError, ScheduleError, TimerError};
pub use invoke::{FaultSink, TimerFault, TimerHandler, TimerInfo};
pub use monitor::{FileScheduleMonitor, MemoryScheduleMonitor, ScheduleMonitor};
pub use past_due::{PastDue, check_past_due};
pub use registry::TimerRegistry;
pub use schedule::{
    ConstantSchedule, CronSchedule, DailySchedule, MonthDay, MonthlySchedule, Schedule,
    WeekOrdinal, WeeklySchedule, parse_time_of_day,
};
pub use status::{ScheduleId, ScheduleStatus};
