//! `solstice run`: drive timers from a definition file until interrupted.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Offset};
use miette::Result;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use solstice_timers::{
    FileScheduleMonitor, ScheduleMonitor, TimerDriver, TimerFault, TimerHandler, TimerInfo,
    TimerOptions, TimerRegistry,
};

use crate::timers;

/// Settings for the run command.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub timers: PathBuf,
    pub status_dir: PathBuf,
    pub max_segment_days: u64,
    pub local: bool,
}

/// Runs a shell command for each occurrence.
///
/// The command sees the occurrence through environment variables:
/// `SOLSTICE_TIMER_NAME`, `SOLSTICE_SCHEDULE`, `SOLSTICE_PAST_DUE` (`1` or
/// `0`), and `SOLSTICE_LAST` / `SOLSTICE_NEXT` when a status is recorded.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    name: String,
    command: String,
}

impl CommandHandler {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    fn build(&self, info: &TimerInfo) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .env("SOLSTICE_TIMER_NAME", &self.name)
            .env("SOLSTICE_SCHEDULE", info.schedule.to_string())
            .env("SOLSTICE_PAST_DUE", if info.is_past_due { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(status) = &info.status {
            if let Some(last) = status.last {
                cmd.env("SOLSTICE_LAST", last.to_rfc3339());
            }
            if let Some(next) = status.next {
                cmd.env("SOLSTICE_NEXT", next.to_rfc3339());
            }
        }
        cmd
    }
}

#[async_trait]
impl TimerHandler for CommandHandler {
    async fn invoke(&self, info: TimerInfo) -> Result<(), String> {
        let output = self
            .build(&info)
            .output()
            .await
            .map_err(|e| format!("failed to spawn '{}': {e}", self.command))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(timer = %self.name, stdout = %stdout.trim_end(), "command output");
        }

        if output.status.success() {
            info!(timer = %self.name, past_due = info.is_past_due, "command finished");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            ))
        }
    }
}

/// Load timers, start them and wait for Ctrl-C.
pub async fn run(config: RunConfig) -> Result<()> {
    let definitions = timers::load(&config.timers)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    if definitions.is_empty() {
        return Err(miette::miette!(
            "no timers defined in {}",
            config.timers.display()
        ));
    }

    let monitor: Arc<dyn ScheduleMonitor> = Arc::new(
        FileScheduleMonitor::open(&config.status_dir)
            .await
            .map_err(|e| miette::miette!("failed to open status directory: {}", e))?,
    );
    info!(dir = %config.status_dir.display(), "recording timer status");

    let offset = config.local.then(|| Local::now().offset().fix());
    let max_segment = Duration::from_secs(config.max_segment_days.saturating_mul(24 * 60 * 60));

    let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
    let mut registry = TimerRegistry::new();
    for (definition, schedule) in definitions {
        let schedule = match offset {
            Some(offset) => schedule.with_offset(offset),
            None => schedule,
        };
        let options = TimerOptions {
            max_segment,
            run_on_startup: definition.run_on_startup,
            use_monitor: definition.use_monitor,
        };
        let driver = TimerDriver::new(
            definition.schedule_id(),
            schedule,
            CommandHandler::new(&definition.name, &definition.command),
            options,
        )
        .with_monitor(Arc::clone(&monitor))
        .with_fault_sink(fault_tx.clone());
        registry
            .register(driver)
            .map_err(|e| miette::miette!("{}", e))?;
    }
    drop(fault_tx);

    let faults = tokio::spawn(async move {
        while let Some(fault) = fault_rx.recv().await {
            match fault {
                TimerFault::Callback {
                    schedule_id,
                    occurrence,
                    message,
                } => warn!(timer = %schedule_id, %occurrence, error = %message, "timer command failed"),
                TimerFault::Monitor { schedule_id, error } => {
                    warn!(timer = %schedule_id, error = %error, "timer status not recorded")
                }
                TimerFault::Terminated { schedule_id, error } => {
                    error!(timer = %schedule_id, error = %error, "timer stopped")
                }
            }
        }
    });

    if let Err(e) = registry.start_all().await {
        registry.dispose_all().await;
        return Err(miette::miette!("{}", e));
    }
    info!(count = registry.len(), "timers running");

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");

    registry.dispose_all().await;
    faults.await.ok();
    info!("all timers stopped");
    Ok(())
}
