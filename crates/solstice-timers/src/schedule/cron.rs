//! Cron expressions with an optional leading seconds field.
//!
//! Fields are `second minute hour day-of-month month day-of-week`; the
//! five-field form omits seconds and fires at second zero. Each field accepts
//! `*`, a value, a range `a-b`, a step `a/b`, `*/b` or `a-b/c`, or a comma
//! list of those. Month and weekday fields also accept three-letter names.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    Timelike, Utc,
};

use super::{days_in_month, from_local, to_local};
use crate::ScheduleError;

/// How far ahead to search before declaring an expression unsatisfiable.
/// One Gregorian cycle covers every calendar arrangement.
const SEARCH_YEARS: i32 = 400;

const MONTH_NAMES: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

const WEEKDAY_NAMES: &[(&str, u32)] = &[
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];

/// Static description of one cron field.
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [(&'static str, u32)],
    /// Whether `?` may stand in for `*`.
    allows_question: bool,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    allows_question: false,
};
const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    allows_question: false,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    allows_question: false,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    allows_question: true,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    allows_question: false,
};
// 7 is accepted as Sunday and folded onto 0 after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    allows_question: true,
};

/// Set of allowed values for one field, one bit per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BitSet(u64);

impl BitSet {
    fn range(min: u32, max: u32) -> Self {
        Self((min..=max).fold(0, |bits, v| bits | (1 << v)))
    }

    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    /// Smallest member that is `>= from`.
    fn next_from(self, from: u32) -> Option<u32> {
        if from >= 64 {
            return None;
        }
        let masked = self.0 & (u64::MAX << from);
        (masked != 0).then(|| masked.trailing_zeros())
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    seconds: BitSet,
    minutes: BitSet,
    hours: BitSet,
    days_of_month: BitSet,
    months: BitSet,
    days_of_week: BitSet,
    offset: FixedOffset,
}

impl CronSchedule {
    /// Whether more than one second of a matching minute is selected.
    pub(crate) fn fires_more_than_once_per_minute(&self) -> bool {
        self.seconds.0.count_ones() > 1
    }

    /// Parse a five- or six-field cron expression.
    ///
    /// Fails when any field is malformed or when the day and month fields can
    /// never match a real date (for example `0 0 0 30 2 *`).
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let fields: [&str; 6] = match fields.as_slice() {
            [m, h, dom, mon, dow] => ["0", m, h, dom, mon, dow],
            [s, m, h, dom, mon, dow] => [s, m, h, dom, mon, dow],
            _ => {
                return Err(ScheduleError::invalid(
                    expression,
                    format!("expected 5 or 6 fields, found {}", fields.len()),
                ));
            }
        };

        let parse = |text: &str, spec: &FieldSpec| {
            parse_field(text, spec).map_err(|reason| ScheduleError::invalid(expression, reason))
        };

        let mut days_of_week = parse(fields[5], &DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week = BitSet((days_of_week.0 & !(1 << 7)) | 1);
        }

        let schedule = Self {
            expression: fields.join(" "),
            seconds: parse(fields[0], &SECOND)?,
            minutes: parse(fields[1], &MINUTE)?,
            hours: parse(fields[2], &HOUR)?,
            days_of_month: parse(fields[3], &DAY_OF_MONTH)?,
            months: parse(fields[4], &MONTH)?,
            days_of_week,
            offset: Utc.fix(),
        };

        if !schedule.is_satisfiable() {
            return Err(ScheduleError::invalid(
                expression,
                "day-of-month and month never coincide",
            ));
        }
        Ok(schedule)
    }

    /// The normalized six-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Evaluate calendar fields at a fixed UTC offset instead of UTC.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub(crate) fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = to_local(after, self.offset);
        let start = local.with_nanosecond(0)? + Duration::seconds(1);
        self.search(start).map(|next| from_local(next, self.offset))
    }

    fn dom_restricted(&self) -> bool {
        self.days_of_month != BitSet::range(DAY_OF_MONTH.min, DAY_OF_MONTH.max)
    }

    fn dow_restricted(&self) -> bool {
        self.days_of_week != BitSet::range(0, 6)
    }

    /// Day-of-month and day-of-week are ORed when both are restricted, as
    /// conventional cron does.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted() && self.dow_restricted() {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn is_satisfiable(&self) -> bool {
        if self.dow_restricted() {
            return true;
        }
        // February may have 29 days; leap years come around within the search window.
        (1..=12).filter(|m| self.months.contains(*m)).any(|month| {
            let longest = if month == 2 {
                29
            } else {
                days_in_month(2001, month)
            };
            (1..=longest).any(|day| self.days_of_month.contains(day))
        })
    }

    /// Find the first local time `>= start` matching every field.
    fn search(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        let limit = start.year() + SEARCH_YEARS;
        let mut t = start;

        loop {
            if t.year() > limit {
                return None;
            }
            let date = t.date();

            if !self.months.contains(date.month()) {
                t = first_of_next_month(date)?.and_time(NaiveTime::MIN);
                continue;
            }

            if !self.day_matches(date) {
                t = date.succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }

            if !self.hours.contains(t.hour()) {
                t = match self.hours.next_from(t.hour()) {
                    Some(hour) => date.and_hms_opt(hour, 0, 0)?,
                    None => date.succ_opt()?.and_time(NaiveTime::MIN),
                };
                continue;
            }

            if !self.minutes.contains(t.minute()) {
                t = match self.minutes.next_from(t.minute()) {
                    Some(minute) => date.and_hms_opt(t.hour(), minute, 0)?,
                    None => next_hour(t)?,
                };
                continue;
            }

            if !self.seconds.contains(t.second()) {
                t = match self.seconds.next_from(t.second()) {
                    Some(second) => date.and_hms_opt(t.hour(), t.minute(), second)?,
                    None => next_minute(t)?,
                };
                continue;
            }

            return Some(t);
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cron: '{}'", self.expression)
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn next_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let truncated = t.date().and_hms_opt(t.hour(), 0, 0)?;
    truncated.checked_add_signed(Duration::hours(1))
}

fn next_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let truncated = t.date().and_hms_opt(t.hour(), t.minute(), 0)?;
    truncated.checked_add_signed(Duration::minutes(1))
}

fn parse_field(text: &str, spec: &FieldSpec) -> Result<BitSet, String> {
    if text.is_empty() {
        return Err(format!("{} field is empty", spec.name));
    }
    let mut bits = 0u64;
    for part in text.split(',') {
        bits |= parse_part(part, spec)?.0;
    }
    Ok(BitSet(bits))
}

fn parse_part(part: &str, spec: &FieldSpec) -> Result<BitSet, String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("{} step '{step}' is not a number", spec.name))?;
            if step == 0 {
                return Err(format!("{} step must be greater than zero", spec.name));
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (low, high) = if range == "*" || (range == "?" && spec.allows_question) {
        (spec.min, spec.max)
    } else if let Some((low, high)) = range.split_once('-') {
        let low = parse_value(low, spec)?;
        let high = parse_value(high, spec)?;
        if low > high {
            return Err(format!("{} range {low}-{high} is reversed", spec.name));
        }
        (low, high)
    } else {
        let value = parse_value(range, spec)?;
        // `a/b` runs from `a` to the end of the field.
        match step {
            Some(_) => (value, spec.max),
            None => (value, value),
        }
    };

    let step = step.unwrap_or(1);
    let bits = (low..=high)
        .step_by(step as usize)
        .fold(0u64, |bits, v| bits | (1 << v));
    Ok(BitSet(bits))
}

fn parse_value(text: &str, spec: &FieldSpec) -> Result<u32, String> {
    let value = match text.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(text))
            .map(|(_, value)| *value)
            .ok_or_else(|| format!("{} value '{text}' is not recognized", spec.name))?,
    };
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} value {value} is outside {}-{}",
            spec.name, spec.min, spec.max
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn next(expr: &str, after: &str) -> DateTime<Utc> {
        CronSchedule::parse(expr)
            .unwrap()
            .next_after(utc(after))
            .unwrap()
    }

    #[test]
    fn fifteen_second_step() {
        assert_eq!(
            next("*/15 * * * * *", "2015-05-01T09:45:00Z"),
            utc("2015-05-01T09:45:15Z")
        );
    }

    #[test_case("0 0 9 * * *", "2024-03-10T08:59:59Z", "2024-03-10T09:00:00Z" ; "later today")]
    #[test_case("0 0 9 * * *", "2024-03-10T09:00:00Z", "2024-03-11T09:00:00Z" ; "strictly after")]
    #[test_case("0 30 23 31 12 *", "2024-12-31T23:30:00Z", "2025-12-31T23:30:00Z" ; "year rollover")]
    #[test_case("0 0 0 31 * *", "2024-04-01T00:00:00Z", "2024-05-31T00:00:00Z" ; "skips thirty day month")]
    #[test_case("0 0 0 29 2 *", "2097-03-01T00:00:00Z", "2104-02-29T00:00:00Z" ; "skips non leap century")]
    #[test_case("0 0 12 * * MON-FRI", "2024-03-08T12:00:00Z", "2024-03-11T12:00:00Z" ; "weekday names skip weekend")]
    #[test_case("0 0 12 * * 7", "2024-03-08T12:00:00Z", "2024-03-10T12:00:00Z" ; "seven is sunday")]
    #[test_case("0 0 * * JAN,jul *", "2024-02-01T00:00:00Z", "2024-07-01T00:00:00Z" ; "month names")]
    #[test_case("5 4 * * *", "2024-01-01T04:05:00Z", "2024-01-02T04:05:00Z" ; "five field form")]
    #[test_case("0 0 0 15 * ?", "2024-01-16T00:00:00Z", "2024-02-15T00:00:00Z" ; "question mark")]
    #[test_case("0 10-50/20 8 * * *", "2024-01-01T08:30:00Z", "2024-01-01T08:50:00Z" ; "stepped range")]
    #[test_case("30/10 * * * * *", "2024-01-01T08:00:55Z", "2024-01-01T08:01:30Z" ; "offset step wraps minute")]
    fn next_occurrence_cases(expr: &str, after: &str, expected: &str) {
        assert_eq!(next(expr, after), utc(expected));
    }

    #[test]
    fn day_of_month_and_weekday_are_ored() {
        // The 13th or any Friday.
        let schedule = CronSchedule::parse("0 0 0 13 * FRI").unwrap();
        let mut t = utc("2024-09-01T00:00:00Z");
        let mut seen = Vec::new();
        for _ in 0..4 {
            t = schedule.next_after(t).unwrap();
            seen.push(t);
        }
        assert_eq!(
            seen,
            vec![
                utc("2024-09-06T00:00:00Z"),
                utc("2024-09-13T00:00:00Z"),
                utc("2024-09-20T00:00:00Z"),
                utc("2024-09-27T00:00:00Z"),
            ]
        );
        let october_13 = schedule.next_after(utc("2024-10-12T00:00:00Z")).unwrap();
        assert_eq!(october_13, utc("2024-10-13T00:00:00Z"));
    }

    #[test]
    fn subsecond_input_still_advances() {
        let schedule = CronSchedule::parse("* * * * * *").unwrap();
        let after = utc("2024-01-01T00:00:00.500Z");
        assert_eq!(schedule.next_after(after).unwrap(), utc("2024-01-01T00:00:01Z"));
    }

    #[test]
    fn evaluates_in_fixed_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let schedule = CronSchedule::parse("0 0 9 * * *").unwrap().with_offset(offset);
        // 09:00 at +02:00 is 07:00 UTC.
        assert_eq!(
            schedule.next_after(utc("2024-06-01T06:00:00Z")).unwrap(),
            utc("2024-06-01T07:00:00Z")
        );
    }

    #[test]
    fn normalizes_expression() {
        let schedule = CronSchedule::parse("  */5   *  * * * ").unwrap();
        assert_eq!(schedule.expression(), "0 */5 * * * *");
        assert_eq!(schedule.to_string(), "Cron: '0 */5 * * * *'");
    }

    #[test_case("* * * *" ; "too few fields")]
    #[test_case("* * * * * * *" ; "too many fields")]
    #[test_case("60 * * * * *" ; "second out of range")]
    #[test_case("* * 24 * * *" ; "hour out of range")]
    #[test_case("* * * 0 * *" ; "day zero")]
    #[test_case("* * * * 13 *" ; "month out of range")]
    #[test_case("* * * * * 8" ; "weekday out of range")]
    #[test_case("*/0 * * * * *" ; "zero step")]
    #[test_case("5-1 * * * * *" ; "reversed range")]
    #[test_case("a * * * * *" ; "garbage value")]
    #[test_case("1,,2 * * * * *" ; "empty list item")]
    #[test_case("? * * * * *" ; "question mark outside day fields")]
    #[test_case("* * * * FOO *" ; "unknown month name")]
    #[test_case("0 0 0 30 2 *" ; "february thirtieth")]
    #[test_case("0 0 0 31 4,6,9,11 *" ; "thirty first of short months")]
    fn rejects_malformed(expr: &str) {
        assert!(matches!(
            CronSchedule::parse(expr),
            Err(ScheduleError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn february_thirtieth_with_weekday_is_valid() {
        // Restricted weekday ORs in, so the expression still fires.
        assert!(CronSchedule::parse("0 0 0 30 2 MON").is_ok());
    }

    fn expressions() -> impl Strategy<Value = &'static str> {
        proptest::sample::select(vec![
            "* * * * * *",
            "*/15 * * * * *",
            "0 0 9 * * *",
            "0 30 8 1,15 * *",
            "0 0 0 29 2 *",
            "0 0 12 * * MON-FRI",
            "0 0 0 13 * FRI",
            "0 0 0 31 * *",
            "0 */7 2-5 * JAN-MAR SUN",
        ])
    }

    proptest! {
        #[test]
        fn next_is_strictly_after(expr in expressions(), secs in 0i64..4_000_000_000) {
            let schedule = CronSchedule::parse(expr).unwrap();
            let after = DateTime::from_timestamp(secs, 0).unwrap();
            let next = schedule.next_after(after).unwrap();
            prop_assert!(next > after);
        }

        #[test]
        fn next_is_deterministic(expr in expressions(), secs in 0i64..4_000_000_000) {
            let schedule = CronSchedule::parse(expr).unwrap();
            let after = DateTime::from_timestamp(secs, 0).unwrap();
            prop_assert_eq!(schedule.next_after(after), schedule.next_after(after));
        }

        #[test]
        fn nothing_matches_in_between(expr in expressions(), secs in 0i64..4_000_000_000) {
            // Stepping second by second from `after` to the result finds no
            // earlier match, for results within the next two hours.
            let schedule = CronSchedule::parse(expr).unwrap();
            let after = DateTime::from_timestamp(secs, 0).unwrap();
            let next = schedule.next_after(after).unwrap();
            if next - after <= Duration::hours(2) {
                let mut t = after + Duration::seconds(1);
                while t < next {
                    let local = t.naive_utc();
                    let matches = schedule.months.contains(local.month())
                        && schedule.day_matches(local.date())
                        && schedule.hours.contains(local.hour())
                        && schedule.minutes.contains(local.minute())
                        && schedule.seconds.contains(local.second());
                    prop_assert!(!matches, "{} matched at {}", expr, t);
                    t += Duration::seconds(1);
                }
            }
        }
    }
}
