//! Runtime configuration for the control core.
//!
//! These are the immutable structs handed to `BatteryCore` at build time. They
//! are separate from the TOML schema in `battctl_config`; see `conversions`.

use std::time::Duration;

use crate::curve::{ControlCurve, CurveMode};

/// Per-cell voltage thresholds in volts.
#[derive(Debug, Clone)]
pub struct CellCfg {
    pub min_voltage: f64,
    /// Bulk target per cell.
    pub max_voltage: f64,
    /// Float target per cell.
    pub float_voltage: f64,
}

impl Default for CellCfg {
    fn default() -> Self {
        Self {
            min_voltage: 2.900,
            max_voltage: 3.450,
            float_voltage: 3.375,
        }
    }
}

/// Curves constraining one current direction. `None` means the dimension
/// does not constrain.
#[derive(Debug, Clone, Default)]
pub struct DirectionCurves {
    pub cell_voltage: Option<ControlCurve>,
    pub temperature: Option<ControlCurve>,
    pub mosfet_temperature: Option<ControlCurve>,
    pub soc: Option<ControlCurve>,
}

/// Current limiting configuration.
#[derive(Debug, Clone)]
pub struct CurrentCfg {
    pub max_charge: f64,
    pub max_discharge: f64,
    pub mode: CurveMode,
    /// A zeroed CCL is released only above this percent of `max_charge`.
    pub charge_recovery_percent: f64,
    pub discharge_recovery_percent: f64,
    pub recalculate_every: Duration,
    pub change_percent: f64,
    pub charge: DirectionCurves,
    pub discharge: DirectionCurves,
}

impl Default for CurrentCfg {
    fn default() -> Self {
        Self {
            max_charge: 50.0,
            max_discharge: 60.0,
            mode: CurveMode::Step,
            charge_recovery_percent: 1.0,
            discharge_recovery_percent: 1.0,
            recalculate_every: Duration::from_secs(60),
            change_percent: 10.0,
            charge: DirectionCurves::default(),
            discharge: DirectionCurves::default(),
        }
    }
}

/// Secondary limiter applied to the bulk target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CvlMode {
    None,
    #[default]
    PenaltySum,
    IController,
    ClippedSum,
}

/// Charge voltage limit configuration.
#[derive(Debug, Clone)]
pub struct CvlCfg {
    pub enabled: bool,
    pub mode: CvlMode,
    pub recalculate_every: Duration,
    pub change_percent: f64,
    pub float_wait: Duration,
    pub float_cell_diff: f64,
    pub float_deviation: f64,
    /// 0 disables the SoC switch-back.
    pub bulk_soc_threshold: f64,
    /// Values >= `battctl_config::BULK_DIFF_DISABLED_AT` disable the spread switch-back.
    pub bulk_cell_diff: f64,
    pub i_gain: f64,
    pub clipped_max_reduction: f64,
    pub clipped_margin: f64,
    pub ovp_recovery_hold: Duration,
    pub ovp_recovery_step: f64,
    pub float_transition_step: f64,
    pub voltage_drop: f64,
    pub force_ccl_zero_on_overvoltage: bool,
    pub overvoltage_margin: f64,
}

impl CvlCfg {
    pub fn bulk_diff_enabled(&self) -> bool {
        self.bulk_cell_diff < battctl_config::BULK_DIFF_DISABLED_AT
    }
}

impl Default for CvlCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: CvlMode::PenaltySum,
            recalculate_every: Duration::from_secs(60),
            change_percent: 10.0,
            float_wait: Duration::from_secs(900),
            float_cell_diff: 0.010,
            float_deviation: 0.003,
            bulk_soc_threshold: 80.0,
            bulk_cell_diff: 0.080,
            i_gain: 0.2,
            clipped_max_reduction: 1.0,
            clipped_margin: 0.010,
            ovp_recovery_hold: Duration::from_secs(60),
            ovp_recovery_step: 0.001,
            float_transition_step: 0.0,
            voltage_drop: 0.0,
            force_ccl_zero_on_overvoltage: false,
            overvoltage_margin: 0.050,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocSource {
    #[default]
    Bms,
    Integrate,
}

/// Periodic full-charge check.
#[derive(Debug, Clone)]
pub struct SocResetCfg {
    pub cell_voltage: f64,
    pub after: Duration,
    pub raise_cvl: bool,
}

/// Maps BMS-reported current onto measured current.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentCorrection {
    pub reported: Vec<f64>,
    pub measured: Vec<f64>,
}

impl CurrentCorrection {
    pub fn apply(&self, current: f64) -> f64 {
        crate::curve::interpolate(current, &self.reported, &self.measured)
    }
}

#[derive(Debug, Clone)]
pub struct SocCfg {
    pub source: SocSource,
    /// Required for integration and time-to-SoC.
    pub capacity_ah: Option<f64>,
    pub initial: f64,
    pub zero_reset_after: Duration,
    pub correction: Option<CurrentCorrection>,
    pub reset: Option<SocResetCfg>,
}

impl Default for SocCfg {
    fn default() -> Self {
        Self {
            source: SocSource::Bms,
            capacity_ah: None,
            initial: 100.0,
            zero_reset_after: Duration::from_secs(300),
            correction: None,
            reset: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone)]
pub struct DisconnectCfg {
    pub mode: DisconnectMode,
    /// Lenient hold when the last known cells were inside the safe band.
    pub timeout: Duration,
    /// Lenient hold otherwise.
    pub grace: Duration,
    pub safe_band_min: f64,
    pub safe_band_max: f64,
}

impl Default for DisconnectCfg {
    fn default() -> Self {
        Self {
            mode: DisconnectMode::Lenient,
            timeout: Duration::from_secs(20 * 60),
            grace: Duration::from_secs(60),
            safe_band_min: 3.26,
            safe_band_max: 3.45,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeToSocCfg {
    pub points: Vec<u8>,
    pub recalculate_every: Duration,
    pub report_passed: bool,
    pub average_window: usize,
    pub low_soc: f64,
}

impl Default for TimeToSocCfg {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            recalculate_every: Duration::from_secs(60),
            report_passed: false,
            average_window: 300,
            low_soc: 10.0,
        }
    }
}

/// Warning and alarm levels for one measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub warning: f64,
    pub alarm: f64,
}

impl Threshold {
    pub const fn new(warning: f64, alarm: f64) -> Self {
        Self { warning, alarm }
    }
}

/// Protection alarm thresholds. Pack voltage alarms use the cell thresholds
/// multiplied by the cell count.
#[derive(Debug, Clone)]
pub struct AlarmCfg {
    pub enabled: bool,
    pub high_cell_voltage: Threshold,
    pub low_cell_voltage: Threshold,
    /// Spread between highest and lowest cell, in volts.
    pub cell_imbalance: Threshold,
    pub low_soc: Threshold,
    pub high_temperature: Threshold,
    pub low_temperature: Threshold,
    /// Only checked while charging.
    pub high_charge_temperature: Threshold,
    /// Only checked while charging.
    pub low_charge_temperature: Threshold,
    pub high_internal_temperature: Threshold,
}

impl Default for AlarmCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            high_cell_voltage: Threshold::new(3.55, 3.65),
            low_cell_voltage: Threshold::new(2.90, 2.80),
            cell_imbalance: Threshold::new(0.10, 0.20),
            low_soc: Threshold::new(20.0, 10.0),
            high_temperature: Threshold::new(50.0, 60.0),
            low_temperature: Threshold::new(-5.0, -10.0),
            high_charge_temperature: Threshold::new(45.0, 55.0),
            low_charge_temperature: Threshold::new(3.0, 0.0),
            high_internal_temperature: Threshold::new(70.0, 80.0),
        }
    }
}

/// Everything the core needs, built once at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub cell_count: usize,
    pub poll_interval: Duration,
    pub cell: CellCfg,
    pub current: CurrentCfg,
    pub cvl: CvlCfg,
    pub soc: SocCfg,
    pub disconnect: DisconnectCfg,
    pub time_to_soc: TimeToSocCfg,
    pub alarms: AlarmCfg,
}

impl CoreConfig {
    /// Defaults for a pack of `cell_count` cells.
    pub fn for_cells(cell_count: usize) -> Self {
        Self {
            cell_count,
            poll_interval: Duration::from_secs(1),
            cell: CellCfg::default(),
            current: CurrentCfg::default(),
            cvl: CvlCfg::default(),
            soc: SocCfg::default(),
            disconnect: DisconnectCfg::default(),
            time_to_soc: TimeToSocCfg::default(),
            alarms: AlarmCfg::default(),
        }
    }

    /// Nominal bulk target for the pack.
    pub fn bulk_voltage(&self) -> f64 {
        pack_voltage(self.cell_count, self.cell.max_voltage)
    }

    pub fn float_voltage(&self) -> f64 {
        pack_voltage(self.cell_count, self.cell.float_voltage)
    }

    pub fn min_battery_voltage(&self) -> f64 {
        pack_voltage(self.cell_count, self.cell.min_voltage)
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn pack_voltage(cell_count: usize, per_cell: f64) -> f64 {
    cell_count as f64 * per_cell
}
