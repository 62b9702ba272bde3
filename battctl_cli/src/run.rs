//! Config mapping, source assembly and output rendering for the control loop.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use battctl_config::{Config, RunMode};
use battctl_core::runner::{RunOptions, RunSummary, SamplingMode, run};
use battctl_core::{AlarmLevel, Command, CommandQueue, CoreConfig, History, Outputs};
use battctl_traits::{Clock, TelemetrySource};
use eyre::WrapErr;
use serde_json::json;

use crate::cli::CliError;

/// Map the TOML config onto the core's runtime config.
///
/// A `soc.current_correction_csv` path is resolved against the config file's
/// directory and replaces any inline table.
pub fn core_config(cfg: &Config, config_path: &Path) -> eyre::Result<CoreConfig> {
    let mut core = CoreConfig::try_from(cfg)?;
    if let Some(csv) = cfg.soc.current_correction_csv.as_deref() {
        let path = config_path
            .parent()
            .map_or_else(|| Path::new(csv).to_path_buf(), |dir| dir.join(csv));
        let table = battctl_config::load_current_correction_csv(&path)
            .map_err(|e| CliError::Config(format!("{e}")))?;
        core.soc.correction = Some((&table).into());
        tracing::debug!(path = %path.display(), "current correction loaded");
    }
    Ok(core)
}

pub fn sampling_mode(cfg: &Config, direct: bool) -> SamplingMode {
    if direct {
        return SamplingMode::Direct;
    }
    match cfg.runner.mode {
        RunMode::Sampler => SamplingMode::Sampled,
        RunMode::Direct => SamplingMode::Direct,
    }
}

/// One output line per cycle on stdout.
pub fn render(out: &Outputs, json_mode: bool) -> String {
    if json_mode {
        return to_json(out).to_string();
    }
    let mut line = format!(
        "cvl={:.3} ccl={:.3} dcl={:.3} soc={:.1} mode={} action={}",
        out.cvl,
        out.ccl,
        out.dcl,
        out.soc,
        out.charge_mode,
        out.action.as_str()
    );
    let causes: Vec<&str> = out
        .charge_causes
        .iter()
        .chain(&out.discharge_causes)
        .map(|c| c.as_str())
        .collect();
    if !causes.is_empty() {
        line.push_str(" causes=");
        line.push_str(&causes.join(","));
    }
    if let Some(ttg) = out.time_to_go {
        line.push_str(&format!(" ttg={ttg}s"));
    }
    let raised: Vec<String> = out
        .alarms
        .each()
        .into_iter()
        .filter(|(_, level)| *level > AlarmLevel::Ok)
        .map(|(name, level)| format!("{name}:{}", level.as_str()))
        .collect();
    if !raised.is_empty() {
        line.push_str(" alarms=");
        line.push_str(&raised.join(","));
    }
    line
}

pub fn to_json(out: &Outputs) -> serde_json::Value {
    let names = |set: &std::collections::BTreeSet<battctl_core::LimitCause>| {
        set.iter().map(|c| c.as_str()).collect::<Vec<_>>()
    };
    let time_to_soc: serde_json::Map<String, serde_json::Value> = out
        .time_to_soc
        .iter()
        .map(|(pct, secs)| (pct.to_string(), json!(secs)))
        .collect();
    let alarms: serde_json::Map<String, serde_json::Value> = out
        .alarms
        .each()
        .into_iter()
        .map(|(name, level)| (name.to_string(), json!(level.as_str())))
        .collect();
    let detail = &out.charge_detail;
    let charge_detail = json!({
        "label": detail.label(out.charge_mode),
        "limited": detail.limited,
        "cell_overvoltage": detail.cell_overvoltage,
        "ovp_hold_s": detail.ovp_hold_s,
        "float_transition": detail.float_transition,
        "returned_to_bulk": detail.returned_to_bulk,
        "soc_reset": detail.soc_reset,
    });
    json!({
        "cvl": out.cvl,
        "ccl": out.ccl,
        "dcl": out.dcl,
        "soc": out.soc,
        "charge_mode": out.charge_mode.as_str(),
        "charge_detail": charge_detail,
        "charge_causes": names(&out.charge_causes),
        "discharge_causes": names(&out.discharge_causes),
        "time_to_soc": time_to_soc,
        "time_to_go": out.time_to_go,
        "action": out.action.as_str(),
        "blocked": out.blocked,
        "allow_charge": out.allow_charge,
        "allow_discharge": out.allow_discharge,
        "allow_balancing": out.allow_balancing,
        "allow_heating": out.allow_heating,
        "stale_soc": out.stale_soc,
        "soc_reset_overdue": out.soc_reset_overdue,
        "alarms": alarms,
        "alarm_level": out.alarms.worst().as_str(),
        "history": history_json(&out.history),
    })
}

fn history_json(h: &History) -> serde_json::Value {
    json!({
        "deepest_discharge": h.deepest_discharge,
        "last_discharge": h.last_discharge,
        "average_discharge": h.average_discharge,
        "total_ah_drawn": h.total_ah_drawn,
        "charge_cycles": h.charge_cycles,
        "full_discharges": h.full_discharges,
        "minimum_voltage": h.minimum_voltage,
        "maximum_voltage": h.maximum_voltage,
        "minimum_cell_voltage": h.minimum_cell_voltage,
        "maximum_cell_voltage": h.maximum_cell_voltage,
        "minimum_temperature": h.minimum_temperature,
        "maximum_temperature": h.maximum_temperature,
        "low_voltage_alarms": h.low_voltage_alarms,
        "high_voltage_alarms": h.high_voltage_alarms,
        "charged_energy_kwh": h.charged_energy_kwh,
        "discharged_energy_kwh": h.discharged_energy_kwh,
    })
}

/// Drive the core from `source` and print every cycle.
#[allow(clippy::too_many_arguments)]
pub fn drive<S>(
    source: S,
    core_cfg: CoreConfig,
    mode: SamplingMode,
    max_polls: Option<u64>,
    stats: bool,
    commands: Vec<Command>,
    clock: Arc<dyn Clock + Send + Sync>,
    json_mode: bool,
    shutdown: &AtomicBool,
) -> eyre::Result<RunSummary>
where
    S: TelemetrySource + Send + 'static,
{
    let queue = CommandQueue::new();
    let sender = queue.sender();
    for cmd in commands {
        sender.send(cmd)?;
    }
    let started = std::time::Instant::now();
    let summary = run(
        source,
        core_cfg,
        clock,
        Some(queue),
        RunOptions { mode, max_polls },
        shutdown,
        |out| println!("{}", render(out, json_mode)),
    )
    .wrap_err("control loop")?;

    if json_mode {
        println!(
            "{}",
            json!({
                "summary": {
                    "cycles": summary.cycles,
                    "held_cycles": summary.held_cycles,
                    "blocked_cycles": summary.blocked_cycles,
                }
            })
        );
    }
    if stats {
        eprintln!("\n--- battctl stats ---");
        eprintln!("Cycles: {}", summary.cycles);
        eprintln!("Held (stale telemetry): {}", summary.held_cycles);
        eprintln!("Blocked: {}", summary.blocked_cycles);
        eprintln!("Runtime: {:.3}s", started.elapsed().as_secs_f64());
        eprintln!("---------------------\n");
    }
    Ok(summary)
}
