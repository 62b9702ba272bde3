mod cli;
mod error_fmt;
mod run;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use battctl_config::{Config, Logging};
use battctl_core::Command;
use battctl_sim::{CsvReplaySource, CurrentProfile, SimulatedBms};
use battctl_traits::{Clock, MonotonicClock};
use clap::Parser;
use eyre::WrapErr;
use serde_json::json;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::cli::{Cli, CliError, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        tracing::error!(error = %e, "battctl failed");
        std::process::exit(exit_code_for_error(&e));
    }
}

fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::Config(format!("read {}: {e}", path.display())))?;
    battctl_config::load_toml(&text)
        .map_err(|e| CliError::Config(format!("{}: {e}", path.display())).into())
}

fn init_tracing(json: bool, level: &str, logging: &Logging) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| CliError::Config(format!("log level {level:?}: {e}")))?;

    // Console logs go to stderr; stdout carries one line per cycle.
    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).with_target(false).boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| CliError::Config(format!("logging.file {path:?} has no file name")))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                "never" => tracing_appender::rolling::never(dir, name),
                other => {
                    return Err(CliError::Config(format!(
                        "logging.rotation must be never, daily or hourly, got {other:?}"
                    ))
                    .into());
                }
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")
}

fn install_ctrlc() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }
    shutdown
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_tracing(cli.json, &level, &cfg.logging)?;

    cfg.validate().map_err(|e| CliError::Config(format!("{e}")))?;
    for w in cfg.warnings() {
        tracing::warn!(warning = %w, "config");
    }
    let core_cfg = run::core_config(&cfg, &cli.config)?;
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());

    match cli.cmd {
        Commands::CheckConfig => {
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "ok": true,
                        "cell_count": core_cfg.cell_count,
                        "bulk_voltage": core_cfg.bulk_voltage(),
                        "float_voltage": core_cfg.float_voltage(),
                        "min_battery_voltage": core_cfg.min_battery_voltage(),
                        "poll_interval_s": core_cfg.poll_interval.as_secs_f64(),
                    })
                );
            } else {
                println!(
                    "config OK: {} cells, bulk {:.3} V, float {:.3} V, min {:.3} V",
                    core_cfg.cell_count,
                    core_cfg.bulk_voltage(),
                    core_cfg.float_voltage(),
                    core_cfg.min_battery_voltage()
                );
            }
            Ok(())
        }
        Commands::Run {
            looping,
            soc,
            current,
            cycle_period_s,
            discharge,
            imbalance,
            dropout,
            reset_soc,
            force_charge_off,
            force_discharge_off,
        } => {
            let profile = cycle_period_s.map_or(CurrentProfile::Constant(current), |secs| {
                CurrentProfile::Cycle {
                    charge: current,
                    discharge,
                    period: Duration::from_secs(secs),
                }
            });
            let capacity = cfg.battery.capacity_ah.unwrap_or(100.0);
            let source = SimulatedBms::new(cfg.battery.cell_count, capacity)
                .with_clock(clock.clone())
                .with_soc(soc)
                .with_profile(profile)
                .with_imbalance(imbalance)
                .with_dropouts(dropout);

            let mut commands = Vec::new();
            if let Some(pct) = reset_soc {
                commands.push(Command::ResetSoc(pct));
            }
            if force_charge_off {
                commands.push(Command::ForceChargeOff(true));
            }
            if force_discharge_off {
                commands.push(Command::ForceDischargeOff(true));
            }

            let shutdown = install_ctrlc();
            let mode = run::sampling_mode(&cfg, looping.direct);
            tracing::info!(cells = cfg.battery.cell_count, soc, current, "simulated pack");
            run::drive(
                source,
                core_cfg,
                mode,
                looping.max_polls,
                looping.stats,
                commands,
                clock,
                cli.json,
                &shutdown,
            )?;
            Ok(())
        }
        Commands::Replay { csv, looping } => {
            let source = CsvReplaySource::open(&csv)?.with_clock(clock.clone());
            let rows = u64::try_from(source.len()).unwrap_or(u64::MAX);
            let max_polls = Some(looping.max_polls.map_or(rows, |n| n.min(rows)));
            let shutdown = install_ctrlc();
            let mode = run::sampling_mode(&cfg, looping.direct);
            tracing::info!(path = %csv.display(), rows, "replay");
            run::drive(
                source,
                core_cfg,
                mode,
                max_polls,
                looping.stats,
                Vec::new(),
                clock,
                cli.json,
                &shutdown,
            )?;
            Ok(())
        }
    }
}
