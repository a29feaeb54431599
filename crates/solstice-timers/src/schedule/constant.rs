//! Fixed-interval schedules.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::ScheduleError;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;

/// A schedule that fires every `interval`, measured from the previous
/// occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantSchedule {
    interval: Duration,
}

impl ConstantSchedule {
    /// Create a schedule from a positive, whole-second interval.
    pub fn new(interval: Duration) -> Result<Self, ScheduleError> {
        if interval <= Duration::zero() {
            return Err(ScheduleError::invalid(
                format_interval(interval),
                "interval must be positive",
            ));
        }
        if interval.subsec_nanos() != 0 {
            return Err(ScheduleError::invalid(
                format_interval(interval),
                "interval must be a whole number of seconds",
            ));
        }
        Ok(Self { interval })
    }

    /// Parse a duration string: `HH:MM:SS`, `HH:MM`, `D.HH:MM:SS` or
    /// `D:HH:MM:SS`.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let interval = parse_interval(expression)?;
        Self::new(interval).map_err(|e| match e {
            ScheduleError::InvalidFormat { reason, .. } => {
                ScheduleError::invalid(expression, reason)
            }
        })
    }

    /// The interval between occurrences.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `None` past the end of the representable range.
    pub(crate) fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        after.checked_add_signed(self.interval)
    }
}

impl fmt::Display for ConstantSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constant: Interval='{}'", format_interval(self.interval))
    }
}

fn parse_interval(expression: &str) -> Result<Duration, ScheduleError> {
    let text = expression.trim();
    let fail = |reason: &str| ScheduleError::invalid(expression, reason);

    // `D.HH:MM:SS` carries its day count before a dot.
    let (days, clock) = match text.split_once('.') {
        Some((days, clock)) => (Some(days), clock),
        None => (None, text),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    let (days, hours, minutes, seconds) = match (days, parts.as_slice()) {
        (None, [h, m]) => (None, *h, *m, "0"),
        (None, [h, m, s]) => (None, *h, *m, *s),
        (None, [d, h, m, s]) => (Some(*d), *h, *m, *s),
        (Some(d), [h, m, s]) => (Some(d), *h, *m, *s),
        _ => return Err(fail("expected HH:MM:SS, D.HH:MM:SS or D:HH:MM:SS")),
    };

    let field = |value: &str, name: &str| -> Result<i64, ScheduleError> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail(&format!("{name} '{value}' is not a number")));
        }
        value
            .parse::<i64>()
            .map_err(|_| fail(&format!("{name} '{value}' is out of range")))
    };

    let days = days.map(|d| field(d, "days")).transpose()?.unwrap_or(0);
    let hours = field(hours, "hours")?;
    let minutes = field(minutes, "minutes")?;
    let seconds = field(seconds, "seconds")?;

    if hours > 23 {
        return Err(fail("hours must be between 0 and 23"));
    }
    if minutes > 59 {
        return Err(fail("minutes must be between 0 and 59"));
    }
    if seconds > 59 {
        return Err(fail("seconds must be between 0 and 59"));
    }

    days.checked_mul(SECS_PER_DAY)
        .and_then(|d| d.checked_add(hours * SECS_PER_HOUR + minutes * SECS_PER_MINUTE + seconds))
        .and_then(Duration::try_seconds)
        .ok_or_else(|| fail("interval is too large"))
}

/// Render an interval as `HH:MM:SS`, prefixed with `D.` when it spans days.
pub(crate) fn format_interval(interval: Duration) -> String {
    let total = interval.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    let days = total / SECS_PER_DAY;
    let hours = (total % SECS_PER_DAY) / SECS_PER_HOUR;
    let minutes = (total % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let seconds = total % SECS_PER_MINUTE;
    if days > 0 {
        format!("{sign}{days}.{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
    }
}
