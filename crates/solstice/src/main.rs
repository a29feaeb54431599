//! Solstice: run commands on cron, interval and calendar schedules
//!
//! Main binary with subcommands:
//! - `next`: Print upcoming occurrences of a schedule expression
//! - `run`: Run timers from a definition file until interrupted
//! - `status`: Print the recorded status of a timer

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod inspect;
mod run;
mod timers;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

/// `<data dir>/solstice/status`, falling back to the working directory.
fn default_status_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("solstice")
        .join("status")
}

#[derive(Parser)]
#[command(name = "solstice")]
#[command(about = "Run commands on cron, interval and calendar schedules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the next occurrences of a schedule expression
    Next {
        /// Cron expression (5 or 6 fields) or interval (HH:MM:SS, D.HH:MM:SS)
        expression: String,

        /// Number of occurrences to print
        #[arg(long, short = 'n', default_value = "5")]
        count: usize,

        /// Start searching after this RFC 3339 instant instead of now
        #[arg(long)]
        after: Option<DateTime<Utc>>,

        /// Evaluate calendar fields in the local UTC offset
        #[arg(long)]
        local: bool,
    },

    /// Run timers from a JSON definition file until Ctrl-C
    Run {
        /// Timer definition file
        #[arg(long, env = "SOLSTICE_TIMERS")]
        timers: PathBuf,

        /// Directory for per-timer status files
        #[arg(long, env = "SOLSTICE_STATUS_DIR")]
        status_dir: Option<PathBuf>,

        /// Longest single wait in days; longer delays are split
        #[arg(long, env = "SOLSTICE_MAX_SEGMENT_DAYS", default_value = "24")]
        max_segment_days: u64,

        /// Evaluate calendar fields in the local UTC offset.
        /// Accepts "1", "true", "yes", or "on".
        #[arg(long, env = "SOLSTICE_LOCAL", value_parser = parse_bool_env, default_value = "false")]
        local: bool,
    },

    /// Print the recorded status of a timer
    Status {
        /// Timer name as given in the definition file
        name: String,

        /// Directory for per-timer status files
        #[arg(long, env = "SOLSTICE_STATUS_DIR")]
        status_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "solstice=info,solstice_timers=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Next {
            expression,
            count,
            after,
            local,
        } => inspect::next(&expression, count, after, local),

        Commands::Run {
            timers,
            status_dir,
            max_segment_days,
            local,
        } => {
            run::run(run::RunConfig {
                timers,
                status_dir: status_dir.unwrap_or_else(default_status_dir),
                max_segment_days,
                local,
            })
            .await
        }

        Commands::Status { name, status_dir } => {
            inspect::status(&name, &status_dir.unwrap_or_else(default_status_dir)).await
        }
    }
}
