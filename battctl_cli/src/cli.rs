//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Failures the CLI classifies itself before handing off to the core.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("telemetry source: {0}")]
    Source(String),
}

#[derive(Parser, Debug)]
#[command(name = "battctl", version, about = "Battery control core driver")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/battctl.toml")]
    pub config: PathBuf,

    /// Print outputs and errors as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Options shared by every command that drives the control loop.
#[derive(clap::Args, Debug, Clone)]
pub struct LoopArgs {
    /// Stop after this many poll cycles
    #[arg(long, value_name = "N")]
    pub max_polls: Option<u64>,

    /// Poll inside the control loop instead of on a sampler thread
    #[arg(long, action = ArgAction::SetTrue)]
    pub direct: bool,

    /// Print a run summary to stderr on completion
    #[arg(long, action = ArgAction::SetTrue)]
    pub stats: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the core from a simulated LiFePO4 pack
    Run {
        #[command(flatten)]
        looping: LoopArgs,
        /// Initial pack state of charge in percent
        #[arg(long, value_name = "PCT", default_value_t = 50.0)]
        soc: f64,
        /// Constant pack current in amps (positive charges)
        #[arg(long, value_name = "AMPS", default_value_t = 0.0, allow_hyphen_values = true)]
        current: f64,
        /// Alternate charge/discharge with this period instead of a constant current
        #[arg(long, value_name = "SECS")]
        cycle_period_s: Option<u64>,
        /// Discharge current used by --cycle-period-s
        #[arg(long, value_name = "AMPS", default_value_t = 10.0)]
        discharge: f64,
        /// Spread cell voltages across this many volts
        #[arg(long, value_name = "VOLTS", default_value_t = 0.0)]
        imbalance: f64,
        /// Fail polls START..END (0-based, end exclusive); repeatable
        #[arg(long, value_name = "START..END", value_parser = parse_range)]
        dropout: Vec<Range<u64>>,
        /// Queue a SoC reset before the first cycle
        #[arg(long, value_name = "PCT")]
        reset_soc: Option<f64>,
        /// Clear allow_charge regardless of limits
        #[arg(long, action = ArgAction::SetTrue)]
        force_charge_off: bool,
        /// Clear allow_discharge regardless of limits
        #[arg(long, action = ArgAction::SetTrue)]
        force_discharge_off: bool,
    },
    /// Replay recorded telemetry from a CSV log
    Replay {
        /// CSV with cell1..cellN, current and optional temp/soc/fet columns
        #[arg(value_name = "CSV")]
        csv: PathBuf,
        #[command(flatten)]
        looping: LoopArgs,
    },
    /// Validate the config and print the derived pack targets
    CheckConfig,
}

fn parse_range(s: &str) -> Result<Range<u64>, String> {
    let (a, b) = s
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {s:?}"))?;
    let start = a.trim().parse::<u64>().map_err(|e| format!("start: {e}"))?;
    let end = b.trim().parse::<u64>().map_err(|e| format!("end: {e}"))?;
    if end <= start {
        return Err(format!("empty range {s:?}"));
    }
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropout_ranges_parse() {
        assert_eq!(parse_range("3..5"), Ok(3..5));
        assert!(parse_range("5..5").is_err());
        assert!(parse_range("x..2").is_err());
        assert!(parse_range("7").is_err());
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
