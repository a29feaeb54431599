//! Daily, weekly and monthly schedules built from explicit
//! `(day, time-of-day)` entries.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    Timelike, Utc, Weekday,
};

use super::{days_in_month, from_local, to_local};
use crate::ScheduleError;

/// Days scanned before giving up on a monthly entry. A fifth weekday or a
/// 31st always recurs within a year.
const MONTHLY_HORIZON_DAYS: i64 = 400;

/// Parse a time of day as `HH:MM:SS` or `HH:MM`.
pub fn parse_time_of_day(text: &str) -> Result<NaiveTime, ScheduleError> {
    let trimmed = text.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| ScheduleError::invalid(text, "expected a time of day as HH:MM[:SS]"))
}

/// Which week of the month an [`MonthDay::Nth`] selector refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WeekOrdinal {
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Last,
}

impl WeekOrdinal {
    fn from_number(n: i32) -> Option<Self> {
        match n {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            3 => Some(Self::Third),
            4 => Some(Self::Fourth),
            5 => Some(Self::Fifth),
            -1 => Some(Self::Last),
            _ => None,
        }
    }

    fn number(self) -> i32 {
        match self {
            Self::First => 1,
            Self::Second => 2,
            Self::Third => 3,
            Self::Fourth => 4,
            Self::Fifth => 5,
            Self::Last => -1,
        }
    }
}

/// Day selector for monthly entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonthDay {
    /// A calendar day, 1 to 31. Months without that day are skipped.
    Day(u8),
    /// The last calendar day, recomputed for every month.
    Last,
    /// The nth (or last) given weekday of the month, e.g. the 2nd Tuesday.
    Nth {
        ordinal: WeekOrdinal,
        weekday: Weekday,
    },
}

impl MonthDay {
    /// A calendar day selector; `-1` selects the last day of the month.
    pub fn day(day: i32) -> Result<Self, ScheduleError> {
        match day {
            -1 => Ok(Self::Last),
            1..=31 => Ok(Self::Day(day as u8)),
            _ => Err(ScheduleError::invalid(
                day.to_string(),
                "day of month must be 1-31 or -1",
            )),
        }
    }

    /// Ordering used for entry lists: calendar days ascending, then the last
    /// day, then weekday selectors.
    fn sort_key(&self) -> (u8, u8, u8) {
        match *self {
            Self::Day(day) => (0, day, 0),
            Self::Last => (1, 0, 0),
            Self::Nth { ordinal, weekday } => {
                (2, ordinal as u8, weekday.num_days_from_sunday() as u8)
            }
        }
    }

    /// Whether this selector picks `date`.
    pub fn matches(&self, date: NaiveDate) -> bool {
        let last_day = days_in_month(date.year(), date.month());
        match *self {
            Self::Day(day) => date.day() == u32::from(day),
            Self::Last => date.day() == last_day,
            Self::Nth { ordinal, weekday } => {
                date.weekday() == weekday
                    && match ordinal {
                        WeekOrdinal::Last => date.day() + 7 > last_day,
                        other => (date.day() - 1) / 7 + 1 == other.number() as u32,
                    }
            }
        }
    }
}

impl FromStr for MonthDay {
    type Err = ScheduleError;

    /// Accepts `15`, `-1`, `last`, `tue#2`, `friday#last` and `fri#-1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.eq_ignore_ascii_case("last") {
            return Ok(Self::Last);
        }
        if let Some((weekday, ordinal)) = text.split_once('#') {
            let weekday = Weekday::from_str(weekday.trim())
                .map_err(|_| ScheduleError::invalid(s, "unknown weekday"))?;
            let ordinal = if ordinal.trim().eq_ignore_ascii_case("last") {
                WeekOrdinal::Last
            } else {
                ordinal
                    .trim()
                    .parse::<i32>()
                    .ok()
                    .and_then(WeekOrdinal::from_number)
                    .ok_or_else(|| ScheduleError::invalid(s, "week ordinal must be 1-5 or last"))?
            };
            return Ok(Self::Nth { ordinal, weekday });
        }
        let day = text
            .parse::<i32>()
            .map_err(|_| ScheduleError::invalid(s, "expected a day, -1, last or weekday#n"))?;
        Self::day(day).map_err(|_| ScheduleError::invalid(s, "day of month must be 1-31 or -1"))
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(day) => write!(f, "{day}"),
            Self::Last => write!(f, "-1"),
            Self::Nth {
                ordinal: WeekOrdinal::Last,
                weekday,
            } => write!(f, "{weekday}#last"),
            Self::Nth { ordinal, weekday } => write!(f, "{weekday}#{}", ordinal.number()),
        }
    }
}

fn second_precision(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// Shared search: scan days starting at the local date of `after` and return
/// the earliest candidate strictly after it.
fn scan<'a, F, I>(
    after: DateTime<Utc>,
    offset: FixedOffset,
    horizon_days: i64,
    times_on: F,
) -> Option<DateTime<Utc>>
where
    F: Fn(NaiveDate) -> I,
    I: Iterator<Item = &'a NaiveTime>,
{
    let local = to_local(after, offset);
    let mut date = local.date();
    for _ in 0..=horizon_days {
        let best = times_on(date)
            .map(|time| NaiveDateTime::new(date, *time))
            .filter(|candidate| *candidate > local)
            .min();
        if let Some(best) = best {
            return Some(from_local(best, offset));
        }
        date = date.succ_opt()?;
    }
    None
}

/// Fires at one or more times every day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    times: Vec<NaiveTime>,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(times: impl IntoIterator<Item = NaiveTime>) -> Result<Self, ScheduleError> {
        let mut times: Vec<NaiveTime> = times.into_iter().map(second_precision).collect();
        if times.is_empty() {
            return Err(ScheduleError::invalid("daily", "at least one time is required"));
        }
        times.sort();
        times.dedup();
        Ok(Self {
            times,
            offset: Utc.fix(),
        })
    }

    /// Build from `HH:MM[:SS]` strings.
    pub fn from_strs<S: AsRef<str>>(times: &[S]) -> Result<Self, ScheduleError> {
        let times = times
            .iter()
            .map(|t| parse_time_of_day(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(times)
    }

    pub fn times(&self) -> &[NaiveTime] {
        &self.times
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        scan(after, self.offset, 2, |_| self.times.iter())
    }
}

impl fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let times: Vec<String> = self.times.iter().map(|t| t.to_string()).collect();
        write!(f, "Daily: {} occurrences ({})", times.len(), times.join(", "))
    }
}

/// Fires at given times on given weekdays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklySchedule {
    entries: Vec<(Weekday, NaiveTime)>,
    offset: FixedOffset,
}

impl WeeklySchedule {
    pub fn new(
        entries: impl IntoIterator<Item = (Weekday, NaiveTime)>,
    ) -> Result<Self, ScheduleError> {
        let mut entries: Vec<(Weekday, NaiveTime)> = entries
            .into_iter()
            .map(|(day, time)| (day, second_precision(time)))
            .collect();
        if entries.is_empty() {
            return Err(ScheduleError::invalid("weekly", "at least one entry is required"));
        }
        entries.sort_by_key(|(day, time)| (day.num_days_from_sunday(), *time));
        entries.dedup();
        Ok(Self {
            entries,
            offset: Utc.fix(),
        })
    }

    /// Build from `(weekday, HH:MM[:SS])` string pairs, e.g. `("mon", "09:00")`.
    pub fn from_strs<S: AsRef<str>>(entries: &[(S, S)]) -> Result<Self, ScheduleError> {
        let entries = entries
            .iter()
            .map(|(day, time)| {
                let weekday = Weekday::from_str(day.as_ref().trim())
                    .map_err(|_| ScheduleError::invalid(day.as_ref(), "unknown weekday"))?;
                Ok((weekday, parse_time_of_day(time.as_ref())?))
            })
            .collect::<Result<Vec<_>, ScheduleError>>()?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[(Weekday, NaiveTime)] {
        &self.entries
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        scan(after, self.offset, 8, |date| {
            self.entries
                .iter()
                .filter(move |(day, _)| *day == date.weekday())
                .map(|(_, time)| time)
        })
    }
}

impl fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .entries
            .iter()
            .map(|(day, time)| format!("{day} {time}"))
            .collect();
        write!(f, "Weekly: {} occurrences ({})", entries.len(), entries.join(", "))
    }
}

/// Fires at given times on selected days of every month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlySchedule {
    entries: Vec<(MonthDay, NaiveTime)>,
    offset: FixedOffset,
}

impl MonthlySchedule {
    pub fn new(
        entries: impl IntoIterator<Item = (MonthDay, NaiveTime)>,
    ) -> Result<Self, ScheduleError> {
        let mut entries: Vec<(MonthDay, NaiveTime)> = entries
            .into_iter()
            .map(|(day, time)| (day, second_precision(time)))
            .collect();
        if entries.is_empty() {
            return Err(ScheduleError::invalid("monthly", "at least one entry is required"));
        }
        if let Some((day, _)) = entries
            .iter()
            .find(|(day, _)| matches!(day, MonthDay::Day(d) if !(1..=31).contains(d)))
        {
            return Err(ScheduleError::invalid(
                day.to_string(),
                "day of month must be 1-31 or -1",
            ));
        }
        entries.sort_by_key(|(day, time)| (day.sort_key(), *time));
        entries.dedup();
        Ok(Self {
            entries,
            offset: Utc.fix(),
        })
    }

    /// Build from `(day, HH:MM[:SS])` string pairs; see [`MonthDay`]'s
    /// `FromStr` for the day syntax.
    pub fn from_strs<S: AsRef<str>>(entries: &[(S, S)]) -> Result<Self, ScheduleError> {
        let entries = entries
            .iter()
            .map(|(day, time)| Ok((day.as_ref().parse()?, parse_time_of_day(time.as_ref())?)))
            .collect::<Result<Vec<_>, ScheduleError>>()?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[(MonthDay, NaiveTime)] {
        &self.entries
    }

    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        scan(after, self.offset, MONTHLY_HORIZON_DAYS, |date| {
            self.entries
                .iter()
                .filter(move |(day, _)| day.matches(date))
                .map(|(_, time)| time)
        })
    }
}

impl fmt::Display for MonthlySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .entries
            .iter()
            .map(|(day, time)| format!("{day} {time}"))
            .collect();
        write!(f, "Monthly: {} occurrences ({})", entries.len(), entries.join(", "))
    }
}
