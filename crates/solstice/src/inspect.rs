//! `solstice next` and `solstice status`.

use std::path::Path;

use chrono::{DateTime, Local, Offset, Utc};
use miette::{IntoDiagnostic, Result};

use solstice_timers::{FileScheduleMonitor, Schedule, ScheduleId, ScheduleMonitor};

/// Render the next `count` occurrences of `expression` after `after`.
///
/// With `local`, calendar fields are evaluated and printed in the host's
/// current UTC offset.
pub fn render_next(
    expression: &str,
    count: usize,
    after: DateTime<Utc>,
    local: bool,
) -> Result<Vec<String>> {
    let schedule = Schedule::parse(expression).map_err(|e| miette::miette!("{}", e))?;
    let offset = local.then(|| Local::now().offset().fix());
    let schedule = match offset {
        Some(offset) => schedule.with_offset(offset),
        None => schedule,
    };

    let mut lines = vec![schedule.to_string()];
    lines.extend(schedule.next_occurrences(after, count).map(|at| match offset {
        Some(offset) => at.with_timezone(&offset).to_rfc3339(),
        None => at.to_rfc3339(),
    }));
    Ok(lines)
}

pub fn next(expression: &str, count: usize, after: Option<DateTime<Utc>>, local: bool) -> Result<()> {
    for line in render_next(expression, count, after.unwrap_or_else(Utc::now), local)? {
        println!("{line}");
    }
    Ok(())
}

/// Print the recorded status of timer `name` as JSON.
pub async fn status(name: &str, status_dir: &Path) -> Result<()> {
    let monitor = FileScheduleMonitor::new(status_dir);
    let id = ScheduleId::for_function(name);
    match monitor
        .get_status(&id)
        .await
        .map_err(|e| miette::miette!("{}", e))?
    {
        Some(status) => {
            println!("{}", serde_json::to_string_pretty(&status).into_diagnostic()?);
            Ok(())
        }
        None => Err(miette::miette!(
            "no status recorded for '{}' in {}",
            id,
            monitor.status_path(&id).display()
        )),
    }
}
