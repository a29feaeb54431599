//! Persisted schedule status and schedule identifiers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a schedule, derived from the owning function's
/// qualified name.
///
/// Only `[A-Za-z0-9._-]` survive; every other character becomes `_`, so the
/// id is always usable as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(String);

impl ScheduleId {
    /// Build an id from a qualified function name such as
    /// `reports::nightly_rollup`.
    pub fn for_function(name: &str) -> Self {
        let sanitized: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
            Self(format!("_{sanitized}"))
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScheduleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScheduleId {
    fn from(name: &str) -> Self {
        Self::for_function(name)
    }
}

/// The last recorded firing state of a schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    /// The occurrence most recently fired (or the first check time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
    /// The occurrence expected next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<DateTime<Utc>>,
    /// When this record was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ScheduleStatus {
    pub fn new(last: DateTime<Utc>, next: DateTime<Utc>, last_updated: DateTime<Utc>) -> Self {
        Self {
            last: Some(last),
            next: Some(next),
            last_updated: Some(last_updated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("reports::nightly_rollup", "reports__nightly_rollup" ; "rust path")]
    #[test_case("Acme.Jobs.Cleanup.Run", "Acme.Jobs.Cleanup.Run" ; "dotted name")]
    #[test_case("weird name/with\\slashes", "weird_name_with_slashes" ; "separators")]
    #[test_case("  padded  ", "padded" ; "trimmed")]
    #[test_case("..", "_.." ; "dot dot")]
    #[test_case("", "_" ; "empty")]
    fn sanitizes_ids(input: &str, expected: &str) {
        assert_eq!(ScheduleId::for_function(input).as_str(), expected);
    }

    #[test]
    fn status_json_shape() {
        let at = DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let status = ScheduleStatus::new(at, at + chrono::Duration::days(1), at);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "last": "2024-01-01T09:00:00Z",
                "next": "2024-01-02T09:00:00Z",
                "last_updated": "2024-01-01T09:00:00Z",
            })
        );

        let empty: ScheduleStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ScheduleStatus::default());
        assert_eq!(serde_json::to_string(&empty).unwrap(), "{}");
    }
}
