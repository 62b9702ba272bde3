//! Conversions from the `battctl_config` TOML schema to runtime config.
//!
//! Curve construction can fail, so the top-level conversion is `TryFrom`.

use std::time::Duration;

use crate::config::{
    AlarmCfg, CellCfg, CoreConfig, CurrentCfg, CurrentCorrection, CvlCfg, CvlMode,
    DirectionCurves, DisconnectCfg, DisconnectMode, SocCfg, SocResetCfg, SocSource, Threshold,
    TimeToSocCfg,
};
use crate::curve::{ControlCurve, CurveMode, StepEdge};
use crate::error::CoreError;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

// ── Enums ────────────────────────────────────────────────────────────────────

impl From<battctl_config::CurveMode> for CurveMode {
    fn from(m: battctl_config::CurveMode) -> Self {
        match m {
            battctl_config::CurveMode::Linear => Self::Linear,
            battctl_config::CurveMode::Step => Self::Step,
        }
    }
}

impl From<battctl_config::CvlController> for CvlMode {
    fn from(m: battctl_config::CvlController) -> Self {
        match m {
            battctl_config::CvlController::None => Self::None,
            battctl_config::CvlController::PenaltySum => Self::PenaltySum,
            battctl_config::CvlController::IController => Self::IController,
            battctl_config::CvlController::ClippedSum => Self::ClippedSum,
        }
    }
}

impl From<battctl_config::SocSource> for SocSource {
    fn from(s: battctl_config::SocSource) -> Self {
        match s {
            battctl_config::SocSource::Bms => Self::Bms,
            battctl_config::SocSource::Integrate => Self::Integrate,
        }
    }
}

impl From<battctl_config::DisconnectMode> for DisconnectMode {
    fn from(m: battctl_config::DisconnectMode) -> Self {
        match m {
            battctl_config::DisconnectMode::Lenient => Self::Lenient,
            battctl_config::DisconnectMode::Strict => Self::Strict,
        }
    }
}

// ── Curves ───────────────────────────────────────────────────────────────────

/// Step edges per dimension. A fraction applies once the value has crossed
/// its break-point towards the unsafe side; cold temperatures and high SoC
/// are conservative on the charge side.
struct Edges {
    cell_voltage: StepEdge,
    temperature: StepEdge,
    mosfet_temperature: StepEdge,
    soc: StepEdge,
}

const CHARGE_EDGES: Edges = Edges {
    cell_voltage: StepEdge::Lower,
    temperature: StepEdge::Lower,
    mosfet_temperature: StepEdge::Lower,
    soc: StepEdge::Upper,
};

const DISCHARGE_EDGES: Edges = Edges {
    cell_voltage: StepEdge::Upper,
    temperature: StepEdge::Upper,
    mosfet_temperature: StepEdge::Lower,
    soc: StepEdge::Upper,
};

fn curve(
    c: Option<&battctl_config::CurveToml>,
    edge: StepEdge,
    name: &str,
) -> Result<Option<ControlCurve>, CoreError> {
    match c {
        Some(c) if c.enabled => ControlCurve::new(&c.x, &c.fraction, edge)
            .map(Some)
            .map_err(|e| CoreError::Config(format!("{name}: {e}"))),
        _ => Ok(None),
    }
}

fn direction(
    d: &battctl_config::DirectionCurves,
    edges: &Edges,
    dir: &str,
) -> Result<DirectionCurves, CoreError> {
    Ok(DirectionCurves {
        cell_voltage: curve(
            d.cell_voltage.as_ref(),
            edges.cell_voltage,
            &format!("current.{dir}.cell_voltage"),
        )?,
        temperature: curve(
            d.temperature.as_ref(),
            edges.temperature,
            &format!("current.{dir}.temperature"),
        )?,
        mosfet_temperature: curve(
            d.mosfet_temperature.as_ref(),
            edges.mosfet_temperature,
            &format!("current.{dir}.mosfet_temperature"),
        )?,
        soc: curve(d.soc.as_ref(), edges.soc, &format!("current.{dir}.soc"))?,
    })
}

// ── Sections ─────────────────────────────────────────────────────────────────

impl From<&battctl_config::CellCfg> for CellCfg {
    fn from(c: &battctl_config::CellCfg) -> Self {
        Self {
            min_voltage: c.min_voltage,
            max_voltage: c.max_voltage,
            float_voltage: c.float_voltage,
        }
    }
}

impl TryFrom<&battctl_config::CurrentCfg> for CurrentCfg {
    type Error = CoreError;

    fn try_from(c: &battctl_config::CurrentCfg) -> Result<Self, Self::Error> {
        Ok(Self {
            max_charge: c.max_charge,
            max_discharge: c.max_discharge,
            mode: c.mode.into(),
            charge_recovery_percent: c.charge_recovery_percent,
            discharge_recovery_percent: c.discharge_recovery_percent,
            recalculate_every: Duration::from_secs(c.recalculate_every_s),
            change_percent: c.change_percent,
            charge: direction(&c.charge, &CHARGE_EDGES, "charge")?,
            discharge: direction(&c.discharge, &DISCHARGE_EDGES, "discharge")?,
        })
    }
}

impl From<&battctl_config::CvlCfg> for CvlCfg {
    fn from(c: &battctl_config::CvlCfg) -> Self {
        Self {
            enabled: c.enabled,
            mode: c.controller.into(),
            recalculate_every: Duration::from_secs(c.recalculate_every_s),
            change_percent: c.change_percent,
            float_wait: Duration::from_secs(c.switch_to_float_wait_s),
            float_cell_diff: c.switch_to_float_cell_diff,
            float_deviation: c.switch_to_float_deviation,
            bulk_soc_threshold: c.switch_to_bulk_soc_threshold,
            bulk_cell_diff: c.switch_to_bulk_cell_diff,
            i_gain: c.i_controller_factor,
            clipped_max_reduction: c.clipped_max_reduction,
            clipped_margin: c.clipped_margin,
            ovp_recovery_hold: Duration::from_secs(c.ovp_recovery_hold_s),
            ovp_recovery_step: c.ovp_recovery_step,
            float_transition_step: c.float_transition_step,
            voltage_drop: c.voltage_drop,
            force_ccl_zero_on_overvoltage: c.force_ccl_zero_on_overvoltage,
            overvoltage_margin: c.overvoltage_margin,
        }
    }
}

impl From<&battctl_config::CurrentCorrection> for CurrentCorrection {
    fn from(c: &battctl_config::CurrentCorrection) -> Self {
        Self {
            reported: c.reported.clone(),
            measured: c.measured.clone(),
        }
    }
}

impl From<&battctl_config::DisconnectCfg> for DisconnectCfg {
    fn from(c: &battctl_config::DisconnectCfg) -> Self {
        Self {
            mode: c.mode.into(),
            timeout: Duration::from_secs(c.timeout_min * 60),
            grace: Duration::from_secs(c.grace_s),
            safe_band_min: c.safe_band_min,
            safe_band_max: c.safe_band_max,
        }
    }
}

impl From<&battctl_config::TimeToSocCfg> for TimeToSocCfg {
    fn from(c: &battctl_config::TimeToSocCfg) -> Self {
        Self {
            points: c.points.clone(),
            recalculate_every: Duration::from_secs(
                c.recalculate_every_s
                    .max(battctl_config::MIN_TIME_TO_SOC_RECALC_S),
            ),
            report_passed: c.report_passed,
            average_window: c.average_window.max(1),
            low_soc: c.low_soc,
        }
    }
}

// ── Alarms ───────────────────────────────────────────────────────────────────

impl From<battctl_config::ThresholdToml> for Threshold {
    fn from(t: battctl_config::ThresholdToml) -> Self {
        Self::new(t.warning, t.alarm)
    }
}

impl From<&battctl_config::AlarmsCfg> for AlarmCfg {
    fn from(c: &battctl_config::AlarmsCfg) -> Self {
        Self {
            enabled: c.enabled,
            high_cell_voltage: c.high_cell_voltage.into(),
            low_cell_voltage: c.low_cell_voltage.into(),
            cell_imbalance: c.cell_imbalance.into(),
            low_soc: c.low_soc.into(),
            high_temperature: c.high_temperature.into(),
            low_temperature: c.low_temperature.into(),
            high_charge_temperature: c.high_charge_temperature.into(),
            low_charge_temperature: c.low_charge_temperature.into(),
            high_internal_temperature: c.high_internal_temperature.into(),
        }
    }
}

// ── CoreConfig ───────────────────────────────────────────────────────────────

impl TryFrom<&battctl_config::Config> for CoreConfig {
    type Error = CoreError;

    fn try_from(c: &battctl_config::Config) -> Result<Self, Self::Error> {
        if !(c.battery.poll_interval_s.is_finite() && c.battery.poll_interval_s > 0.0) {
            return Err(CoreError::Config(
                "battery.poll_interval_s must be > 0".into(),
            ));
        }
        let soc = SocCfg {
            source: c.soc.source.into(),
            capacity_ah: c.battery.capacity_ah,
            initial: c.soc.initial,
            zero_reset_after: Duration::from_secs(c.soc.zero_reset_after_s),
            correction: c.soc.current_correction.as_ref().map(Into::into),
            reset: c.soc.reset_cell_voltage.map(|v| SocResetCfg {
                cell_voltage: v,
                after: Duration::from_secs(u64::from(c.soc.reset_after_days) * SECS_PER_DAY),
                raise_cvl: c.soc.reset_raise_cvl,
            }),
        };
        Ok(Self {
            cell_count: c.battery.cell_count,
            poll_interval: crate::util::duration_from_secs_f64(c.battery.poll_interval_s),
            cell: (&c.cell).into(),
            current: CurrentCfg::try_from(&c.current)?,
            cvl: (&c.cvl).into(),
            soc,
            disconnect: (&c.disconnect).into(),
            time_to_soc: (&c.time_to_soc).into(),
            alarms: (&c.alarms).into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_converts_with_typed_durations() {
        let cfg = battctl_config::load_toml(
            "[battery]\ncell_count = 16\ncapacity_ah = 100.0\npoll_interval_s = 0.5\n",
        )
        .unwrap();
        let core = CoreConfig::try_from(&cfg).unwrap();
        assert_eq!(core.poll_interval, Duration::from_millis(500));
        assert_eq!(core.disconnect.timeout, Duration::from_secs(1200));
        assert_eq!(core.cvl.float_wait, Duration::from_secs(900));
        assert!(core.current.charge.cell_voltage.is_some());
        // Discharge cell-voltage steps take the upper break-point.
        let dis = core.current.discharge.cell_voltage.as_ref().unwrap();
        assert_eq!(dis.fraction(2.95, CurveMode::Step), 1.0);
        let chg = core.current.charge.cell_voltage.as_ref().unwrap();
        assert_eq!(chg.fraction(3.40, CurveMode::Step), 1.0);
        assert!((core.bulk_voltage() - 55.2).abs() < 1e-9);
        assert!(core.alarms.enabled);
        assert_eq!(core.alarms.low_soc, Threshold::new(20.0, 10.0));
    }

    #[test]
    fn disabled_curve_is_dropped() {
        let cfg = battctl_config::load_toml(
            r"
[battery]
cell_count = 4
[current.charge]
temperature = { enabled = false, x = [0.0, 10.0], fraction = [0.0, 1.0] }
",
        )
        .unwrap();
        let core = CoreConfig::try_from(&cfg).unwrap();
        assert!(core.current.charge.temperature.is_none());
    }

    #[test]
    fn reset_days_become_duration() {
        let cfg = battctl_config::load_toml(
            "[battery]\ncell_count = 4\n[soc]\nreset_cell_voltage = 3.65\nreset_after_days = 2\n",
        )
        .unwrap();
        let core = CoreConfig::try_from(&cfg).unwrap();
        let reset = core.soc.reset.unwrap();
        assert_eq!(reset.after, Duration::from_secs(2 * 86_400));
    }
}
