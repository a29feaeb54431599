//! Schedule expressions and next-occurrence computation.

mod calendar;
mod constant;
mod cron;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::ScheduleError;

pub use calendar::{
    DailySchedule, MonthDay, MonthlySchedule, WeekOrdinal, WeeklySchedule, parse_time_of_day,
};
pub use constant::ConstantSchedule;
pub use cron::CronSchedule;

/// Occurrences closer together than this make status tracking pointless.
const MONITOR_WINDOW_SECS: i64 = 60;

/// Weekdays and month lengths repeat every 28 years between 1901 and 2099.
const CALENDAR_CYCLE_DAYS: i64 = 28 * 366;

/// A recurring schedule.
///
/// Every variant is immutable once built, and `next_occurrence(after)` is a
/// pure function of `after` that always returns an instant strictly later
/// than it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fires every fixed interval.
    Constant(ConstantSchedule),
    /// Fires on matching cron fields.
    Cron(CronSchedule),
    /// Fires at listed times every day.
    Daily(DailySchedule),
    /// Fires at listed `(weekday, time)` pairs.
    Weekly(WeeklySchedule),
    /// Fires at listed `(day-of-month, time)` pairs.
    Monthly(MonthlySchedule),
}

impl Schedule {
    /// Parse a schedule string.
    ///
    /// A string with whitespace between fields is read as a cron expression;
    /// anything else must be a duration (`HH:MM:SS`, `D.HH:MM:SS` or
    /// `D:HH:MM:SS`).
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::invalid(expression, "empty schedule"));
        }
        if trimmed.contains(char::is_whitespace) {
            CronSchedule::parse(trimmed).map(Self::Cron)
        } else {
            ConstantSchedule::parse(trimmed).map(Self::Constant)
        }
    }

    /// The first occurrence strictly after `after`.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self {
            Self::Constant(s) => s.next_after(after),
            Self::Cron(s) => s.next_after(after),
            Self::Daily(s) => s.next_after(after),
            Self::Weekly(s) => s.next_after(after),
            Self::Monthly(s) => s.next_after(after),
        };
        // Validated schedules always recur; only the end of the representable
        // range can exhaust them.
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The next `count` occurrences after `after`, in order.
    ///
    /// Each call starts over from `after`.
    pub fn next_occurrences(
        &self,
        after: DateTime<Utc>,
        count: usize,
    ) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        std::iter::successors(Some(after), move |prev| {
            let next = self.next_occurrence(*prev);
            (next > *prev).then_some(next)
        })
        .skip(1)
        .take(count)
    }

    /// Evaluate calendar fields in `offset` instead of UTC. Constant
    /// schedules are unaffected.
    pub fn with_offset(self, offset: FixedOffset) -> Self {
        match self {
            Self::Constant(s) => Self::Constant(s),
            Self::Cron(s) => Self::Cron(s.with_offset(offset)),
            Self::Daily(s) => Self::Daily(s.with_offset(offset)),
            Self::Weekly(s) => Self::Weekly(s.with_offset(offset)),
            Self::Monthly(s) => Self::Monthly(s.with_offset(offset)),
        }
    }

    /// Whether status tracking should be skipped for this schedule.
    ///
    /// True when two consecutive occurrences can ever be less than a minute
    /// apart. The answer depends only on the schedule, so every start of the
    /// same timer makes the same choice.
    pub fn should_disable_monitor(&self) -> bool {
        let window = Duration::seconds(MONITOR_WINDOW_SECS);
        match self {
            Self::Constant(s) => s.interval() < window,
            Self::Cron(s) => s.fires_more_than_once_per_minute(),
            Self::Daily(_) => self.has_gap_under(Duration::days(1), window),
            Self::Weekly(_) => self.has_gap_under(Duration::days(7), window),
            Self::Monthly(_) => self.has_gap_under(Duration::days(CALENDAR_CYCLE_DAYS), window),
        }
    }

    /// Walk one full period from a fixed anchor, plus the wrap into the next
    /// period, looking for consecutive occurrences closer than `window`.
    fn has_gap_under(&self, period: Duration, window: Duration) -> bool {
        let anchor = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = anchor + period;
        let mut previous = self.next_occurrence(anchor);
        while previous <= end {
            let next = self.next_occurrence(previous);
            if next - previous < window {
                return true;
            }
            previous = next;
        }
        false
    }

    /// Render the next `count` occurrences after `now`, one per line.
    pub fn format_next_occurrences(&self, count: usize, now: DateTime<Utc>) -> String {
        let mut out = format!("The next {count} occurrences of the '{self}' schedule will be:\n");
        for occurrence in self.next_occurrences(now, count) {
            out.push_str(&occurrence.to_rfc3339());
            out.push('\n');
        }
        out
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(s) => s.fmt(f),
            Self::Cron(s) => s.fmt(f),
            Self::Daily(s) => s.fmt(f),
            Self::Weekly(s) => s.fmt(f),
            Self::Monthly(s) => s.fmt(f),
        }
    }
}

impl From<ConstantSchedule> for Schedule {
    fn from(s: ConstantSchedule) -> Self {
        Self::Constant(s)
    }
}

impl From<CronSchedule> for Schedule {
    fn from(s: CronSchedule) -> Self {
        Self::Cron(s)
    }
}

impl From<DailySchedule> for Schedule {
    fn from(s: DailySchedule) -> Self {
        Self::Daily(s)
    }
}

impl From<WeeklySchedule> for Schedule {
    fn from(s: WeeklySchedule) -> Self {
        Self::Weekly(s)
    }
}

impl From<MonthlySchedule> for Schedule {
    fn from(s: MonthlySchedule) -> Self {
        Self::Monthly(s)
    }
}

/// Number of days in `month` of `year`.
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

/// Wall-clock time at `offset` for a UTC instant.
pub(crate) fn to_local(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDateTime {
    instant.with_timezone(&offset).naive_local()
}

/// UTC instant for a wall-clock time at `offset`.
pub(crate) fn from_local(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(offset.local_minus_utc()))))
}
