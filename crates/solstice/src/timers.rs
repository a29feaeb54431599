//! Timer definition files.
//!
//! A definition file is a JSON object with a `timers` array:
//!
//! ```json
//! {
//!   "timers": [
//!     { "name": "backup", "schedule": "0 30 2 * * *", "command": "backup.sh" },
//!     { "name": "digest", "schedule": { "weekly": [["mon", "09:00"]] }, "command": "digest" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use solstice_timers::{
    DailySchedule, MonthlySchedule, Schedule, ScheduleError, ScheduleId, WeeklySchedule,
};

/// Errors raised while loading a definition file.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid timer file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("timer '{name}': {source}")]
    Schedule {
        name: String,
        #[source]
        source: ScheduleError,
    },

    /// Two names sanitize to the same schedule id.
    #[error("timers '{first}' and '{second}' share the schedule id '{id}'")]
    DuplicateId {
        first: String,
        second: String,
        id: ScheduleId,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerFile {
    pub timers: Vec<TimerDefinition>,
}

/// One timer: what to run and when.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerDefinition {
    pub name: String,
    pub schedule: ScheduleSpec,
    /// Shell command run through `sh -c`.
    pub command: String,
    #[serde(default)]
    pub run_on_startup: bool,
    #[serde(default = "default_use_monitor")]
    pub use_monitor: bool,
}

fn default_use_monitor() -> bool {
    true
}

/// A schedule string, or an explicit daily/weekly/monthly list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScheduleSpec {
    /// Cron expression or duration.
    Expression(String),
    /// Times of day.
    Daily { daily: Vec<String> },
    /// `[weekday, time]` pairs.
    Weekly { weekly: Vec<(String, String)> },
    /// `[day, time]` pairs; day is `1`-`31`, `-1`/`last`, or `tue#2`.
    Monthly { monthly: Vec<(String, String)> },
}

impl ScheduleSpec {
    pub fn build(&self) -> Result<Schedule, ScheduleError> {
        Ok(match self {
            Self::Expression(expression) => Schedule::parse(expression)?,
            Self::Daily { daily } => DailySchedule::from_strs(daily)?.into(),
            Self::Weekly { weekly } => WeeklySchedule::from_strs(weekly)?.into(),
            Self::Monthly { monthly } => MonthlySchedule::from_strs(monthly)?.into(),
        })
    }
}

impl TimerDefinition {
    pub fn schedule_id(&self) -> ScheduleId {
        ScheduleId::for_function(&self.name)
    }
}

/// Parse definitions from JSON text, validating every schedule.
pub fn parse(text: &str, path: &Path) -> Result<Vec<(TimerDefinition, Schedule)>, DefinitionError> {
    let file: TimerFile = serde_json::from_str(text).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut seen: HashMap<ScheduleId, String> = HashMap::new();
    let mut timers = Vec::with_capacity(file.timers.len());
    for definition in file.timers {
        let schedule = definition
            .schedule
            .build()
            .map_err(|source| DefinitionError::Schedule {
                name: definition.name.clone(),
                source,
            })?;

        let id = definition.schedule_id();
        if let Some(first) = seen.get(&id) {
            return Err(DefinitionError::DuplicateId {
                first: first.clone(),
                second: definition.name,
                id,
            });
        }
        seen.insert(id, definition.name.clone());
        timers.push((definition, schedule));
    }
    Ok(timers)
}

/// Read and parse a definition file.
pub async fn load(path: &Path) -> Result<Vec<(TimerDefinition, Schedule)>, DefinitionError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse(&text, path)
}
