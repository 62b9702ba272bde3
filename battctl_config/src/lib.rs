#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and current-correction parsing for the battery controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated once at
//!   startup. An inconsistent file is rejected before any limit is computed.
//! - Control curves accept either parallel lists (`x`, `fraction`) or a list of
//!   `[x, fraction]` points.
//! - Current-correction CSV loader enforces headers and monotonic input.
use serde::Deserialize;
use serde::de::Deserializer;

/// Switch-to-bulk cell difference at or above which the trigger is disabled.
pub const BULK_DIFF_DISABLED_AT: f64 = 10.0;

/// Lower bound for the time-to-SoC recalculation cadence.
pub const MIN_TIME_TO_SOC_RECALC_S: u64 = 5;

/// Current-correction CSV schema.
///
/// Expected headers:
/// reported,measured
///
/// Example:
/// reported,measured
/// -100.0,-98.5
/// 0.0,0.0
/// 100.0,101.2
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CorrectionRow {
    pub reported: f64,
    pub measured: f64,
}

#[derive(Debug, Deserialize)]
pub struct BatteryCfg {
    /// Number of series cells; fixed for the lifetime of the instance.
    pub cell_count: usize,
    /// Nominal capacity, required when `soc.source = "integrate"`.
    #[serde(default)]
    pub capacity_ah: Option<f64>,
    /// Expected telemetry poll interval in seconds (decimals allowed).
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: f64,
}

const fn default_poll_interval_s() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CellCfg {
    pub min_voltage: f64,
    pub max_voltage: f64,
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CurveMode {
    Linear,
    #[default]
    Step,
}

/// One control curve: break-points mapping a measured value to a current fraction.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CurveToml {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub x: Vec<f64>,
    pub fraction: Vec<f64>,
}

const fn default_true() -> bool {
    true
}

impl CurveToml {
    pub fn new(x: &[f64], fraction: &[f64]) -> Self {
        Self {
            enabled: true,
            x: x.to_vec(),
            fraction: fraction.to_vec(),
        }
    }

    fn validate(&self, name: &str) -> eyre::Result<()> {
        if self.x.len() != self.fraction.len() {
            eyre::bail!(
                "{name}: x and fraction must have the same length ({} vs {})",
                self.x.len(),
                self.fraction.len()
            );
        }
        if self.x.len() < 2 {
            eyre::bail!("{name}: at least two break-points are required");
        }
        if self.x.iter().any(|v| !v.is_finite()) {
            eyre::bail!("{name}: x values must be finite");
        }
        if self
            .fraction
            .iter()
            .any(|f| !f.is_finite() || !(0.0..=1.0).contains(f))
        {
            eyre::bail!("{name}: fraction values must be in [0.0, 1.0]");
        }
        let mut dir = 0i8;
        for (i, w) in self.x.windows(2).enumerate() {
            let d = w[1] - w[0];
            if d == 0.0 {
                eyre::bail!("{name}: duplicate x value at index {} and {}", i, i + 1);
            }
            let step_dir = if d > 0.0 { 1 } else { -1 };
            if dir == 0 {
                dir = step_dir;
            } else if dir != step_dir {
                eyre::bail!("{name}: x values must be strictly increasing or strictly decreasing");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurveInput {
    Points {
        #[serde(default = "default_true")]
        enabled: bool,
        points: Vec<(f64, f64)>,
    },
    Lists(CurveToml),
}

/// Accepts either `{ x = [...], fraction = [...] }` or
/// `{ points = [[x, fraction], ...] }`.
fn de_curve<'de, D>(deserializer: D) -> Result<Option<CurveToml>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<CurveInput> = Option::deserialize(deserializer)?;
    Ok(opt.map(|c| match c {
        CurveInput::Lists(c) => c,
        CurveInput::Points { enabled, points } => CurveToml {
            enabled,
            x: points.iter().map(|p| p.0).collect(),
            fraction: points.iter().map(|p| p.1).collect(),
        },
    }))
}

/// Curves limiting one current direction. A `None` or disabled curve does not
/// constrain the result.
#[derive(Debug, Deserialize, Clone)]
pub struct DirectionCurves {
    #[serde(default, deserialize_with = "de_curve")]
    pub cell_voltage: Option<CurveToml>,
    #[serde(default, deserialize_with = "de_curve")]
    pub temperature: Option<CurveToml>,
    #[serde(default, deserialize_with = "de_curve")]
    pub mosfet_temperature: Option<CurveToml>,
    #[serde(default, deserialize_with = "de_curve")]
    pub soc: Option<CurveToml>,
}

impl DirectionCurves {
    pub fn charge_defaults() -> Self {
        Self {
            cell_voltage: Some(CurveToml::new(
                &[3.55, 3.50, 3.45, 3.30],
                &[0.0, 0.05, 0.5, 1.0],
            )),
            temperature: Some(CurveToml::new(
                &[0.0, 2.0, 5.0, 10.0, 15.0, 20.0, 35.0, 40.0, 55.0],
                &[0.0, 0.1, 0.2, 0.4, 0.8, 1.0, 1.0, 0.4, 0.0],
            )),
            mosfet_temperature: Some(CurveToml::new(&[90.0, 95.0, 100.0], &[1.0, 0.5, 0.0])),
            soc: Some(CurveToml::new(&[100.0, 98.0, 95.0, 91.0], &[0.1, 0.2, 0.5, 1.0])),
        }
    }

    pub fn discharge_defaults() -> Self {
        Self {
            cell_voltage: Some(CurveToml::new(
                &[2.70, 2.80, 2.90, 3.10],
                &[0.0, 0.1, 0.5, 1.0],
            )),
            temperature: Some(CurveToml::new(
                &[-20.0, 0.0, 5.0, 10.0, 15.0, 45.0, 55.0],
                &[0.0, 0.2, 0.3, 0.4, 1.0, 1.0, 0.0],
            )),
            mosfet_temperature: Some(CurveToml::new(&[90.0, 95.0, 100.0], &[1.0, 0.5, 0.0])),
            soc: Some(CurveToml::new(&[10.0, 20.0, 30.0], &[0.1, 0.3, 1.0])),
        }
    }

    fn each(&self) -> [(&'static str, Option<&CurveToml>); 4] {
        [
            ("cell_voltage", self.cell_voltage.as_ref()),
            ("temperature", self.temperature.as_ref()),
            ("mosfet_temperature", self.mosfet_temperature.as_ref()),
            ("soc", self.soc.as_ref()),
        ]
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CurrentCfg {
    pub max_charge: f64,
    pub max_discharge: f64,
    pub mode: CurveMode,
    /// Percent of `max_charge` a zeroed CCL must exceed before it is released.
    pub charge_recovery_percent: f64,
    pub discharge_recovery_percent: f64,
    pub recalculate_every_s: u64,
    /// Relative change (percent of the committed value) that forces an early commit.
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
            recalculate_every_s: 60,
            change_percent: 10.0,
            charge: DirectionCurves::charge_defaults(),
            discharge: DirectionCurves::discharge_defaults(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CvlController {
    None,
    #[default]
    PenaltySum,
    IController,
    ClippedSum,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CvlCfg {
    /// When false the target stays at the bulk voltage and FLOAT is never entered.
    pub enabled: bool,
    pub controller: CvlController,
    pub recalculate_every_s: u64,
    pub change_percent: f64,
    /// Seconds the float conditions must hold; 0 switches immediately.
    pub switch_to_float_wait_s: u64,
    pub switch_to_float_cell_diff: f64,
    pub switch_to_float_deviation: f64,
    /// FLOAT returns to BULK below this SoC; 0 disables.
    pub switch_to_bulk_soc_threshold: f64,
    /// FLOAT returns to BULK at or above this spread; >= 10 disables.
    pub switch_to_bulk_cell_diff: f64,
    /// Integral gain in V/(V*s).
    pub i_controller_factor: f64,
    pub clipped_max_reduction: f64,
    pub clipped_margin: f64,
    pub ovp_recovery_hold_s: u64,
    /// Volts per second.
    pub ovp_recovery_step: f64,
    /// Volts per second; 0 jumps straight to the float target.
    pub float_transition_step: f64,
    pub voltage_drop: f64,
    pub force_ccl_zero_on_overvoltage: bool,
    pub overvoltage_margin: f64,
}

impl Default for CvlCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            controller: CvlController::PenaltySum,
            recalculate_every_s: 60,
            change_percent: 10.0,
            switch_to_float_wait_s: 900,
            switch_to_float_cell_diff: 0.010,
            switch_to_float_deviation: 0.003,
            switch_to_bulk_soc_threshold: 80.0,
            switch_to_bulk_cell_diff: 0.080,
            i_controller_factor: 0.2,
            clipped_max_reduction: 1.0,
            clipped_margin: 0.010,
            ovp_recovery_hold_s: 60,
            ovp_recovery_step: 0.001,
            float_transition_step: 0.0,
            voltage_drop: 0.0,
            force_ccl_zero_on_overvoltage: false,
            overvoltage_margin: 0.050,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SocSource {
    #[default]
    Bms,
    Integrate,
}

/// Piecewise-linear map from BMS-reported current to measured current.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CurrentCorrection {
    pub reported: Vec<f64>,
    pub measured: Vec<f64>,
}

impl CurrentCorrection {
    pub fn from_rows(rows: &[CorrectionRow]) -> eyre::Result<Self> {
        let c = Self {
            reported: rows.iter().map(|r| r.reported).collect(),
            measured: rows.iter().map(|r| r.measured).collect(),
        };
        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.reported.len() != self.measured.len() {
            eyre::bail!("soc.current_correction: reported and measured must have the same length");
        }
        if self.reported.len() < 2 {
            eyre::bail!(
                "soc.current_correction requires at least two rows, got {}",
                self.reported.len()
            );
        }
        if self
            .reported
            .iter()
            .chain(&self.measured)
            .any(|v| !v.is_finite())
        {
            eyre::bail!("soc.current_correction values must be finite");
        }
        if !self.reported.windows(2).all(|w| w[1] > w[0]) {
            eyre::bail!("soc.current_correction reported values must be strictly increasing");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SocCfg {
    pub source: SocSource,
    /// Starting SoC in integration mode when the BMS reports none.
    pub initial: f64,
    /// Seconds at or below the minimum cell voltage while discharging before SoC is zeroed.
    pub zero_reset_after_s: u64,
    pub current_correction: Option<CurrentCorrection>,
    /// Path to a `reported,measured` CSV; loaded by the caller via `load_current_correction_csv`.
    pub current_correction_csv: Option<String>,
    /// Cell voltage that counts as a full-reset event. Must be above `cell.max_voltage`.
    pub reset_cell_voltage: Option<f64>,
    pub reset_after_days: u32,
    /// Raise the bulk target to the reset voltage while a reset is overdue.
    pub reset_raise_cvl: bool,
}

impl Default for SocCfg {
    fn default() -> Self {
        Self {
            source: SocSource::Bms,
            initial: 100.0,
            zero_reset_after_s: 300,
            current_correction: None,
            current_correction_csv: None,
            reset_cell_voltage: None,
            reset_after_days: 30,
            reset_raise_cvl: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisconnectCfg {
    pub mode: DisconnectMode,
    pub timeout_min: u64,
    pub grace_s: u64,
    /// Last known cells must all be above this to hold for the full timeout.
    pub safe_band_min: f64,
    /// Last known cells must all be below this to hold for the full timeout.
    pub safe_band_max: f64,
}

impl Default for DisconnectCfg {
    fn default() -> Self {
        Self {
            mode: DisconnectMode::Lenient,
            timeout_min: 20,
            grace_s: 60,
            safe_band_min: 3.26,
            safe_band_max: 3.45,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimeToSocCfg {
    /// Target SoC percentages; empty disables the predictor.
    pub points: Vec<u8>,
    pub recalculate_every_s: u64,
    /// Report passed targets as negative seconds since they were crossed.
    pub report_passed: bool,
    /// Samples in the moving-average current window.
    pub average_window: usize,
    /// Discharge target for time-to-go.
    pub low_soc: f64,
}

impl Default for TimeToSocCfg {
    fn default() -> Self {
        Self {
            points: vec![100, 50, 20],
            recalculate_every_s: 60,
            report_passed: false,
            average_window: 300,
            low_soc: 10.0,
        }
    }
}

/// Warning and alarm level for one protection check.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ThresholdToml {
    pub warning: f64,
    pub alarm: f64,
}

const fn threshold(warning: f64, alarm: f64) -> ThresholdToml {
    ThresholdToml { warning, alarm }
}

/// Protection alarms raised from telemetry. "high_*" checks need
/// `warning <= alarm`, "low_*" checks `warning >= alarm`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlarmsCfg {
    pub enabled: bool,
    pub high_cell_voltage: ThresholdToml,
    pub low_cell_voltage: ThresholdToml,
    pub cell_imbalance: ThresholdToml,
    pub low_soc: ThresholdToml,
    pub high_temperature: ThresholdToml,
    pub low_temperature: ThresholdToml,
    pub high_charge_temperature: ThresholdToml,
    pub low_charge_temperature: ThresholdToml,
    pub high_internal_temperature: ThresholdToml,
}

impl Default for AlarmsCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            high_cell_voltage: threshold(3.55, 3.65),
            low_cell_voltage: threshold(2.90, 2.80),
            cell_imbalance: threshold(0.10, 0.20),
            low_soc: threshold(20.0, 10.0),
            high_temperature: threshold(50.0, 60.0),
            low_temperature: threshold(-5.0, -10.0),
            high_charge_temperature: threshold(45.0, 55.0),
            low_charge_temperature: threshold(3.0, 0.0),
            high_internal_temperature: threshold(70.0, 80.0),
        }
    }
}

impl AlarmsCfg {
    fn rising(&self) -> [(&'static str, ThresholdToml); 5] {
        [
            ("high_cell_voltage", self.high_cell_voltage),
            ("cell_imbalance", self.cell_imbalance),
            ("high_temperature", self.high_temperature),
            ("high_charge_temperature", self.high_charge_temperature),
            ("high_internal_temperature", self.high_internal_temperature),
        ]
    }

    fn falling(&self) -> [(&'static str, ThresholdToml); 4] {
        [
            ("low_cell_voltage", self.low_cell_voltage),
            ("low_soc", self.low_soc),
            ("low_temperature", self.low_temperature),
            ("low_charge_temperature", self.low_charge_temperature),
        ]
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Sampler,
    Direct,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RunnerCfg {
    /// "sampler" reads telemetry on a dedicated thread, "direct" in the control thread.
    pub mode: RunMode,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub battery: BatteryCfg,
    #[serde(default)]
    pub cell: CellCfg,
    #[serde(default)]
    pub current: CurrentCfg,
    #[serde(default)]
    pub cvl: CvlCfg,
    #[serde(default)]
    pub soc: SocCfg,
    #[serde(default)]
    pub disconnect: DisconnectCfg,
    #[serde(default)]
    pub time_to_soc: TimeToSocCfg,
    #[serde(default)]
    pub alarms: AlarmsCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub runner: RunnerCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_current_correction_csv(path: &std::path::Path) -> eyre::Result<CurrentCorrection> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open current correction CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["reported", "measured"];
    let actual: Vec<String> = headers.iter().map(ToString::to_string).collect();
    if actual != expected {
        eyre::bail!(
            "current correction CSV must have headers 'reported,measured', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CorrectionRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }

    CurrentCorrection::from_rows(&rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Battery
        if self.battery.cell_count == 0 {
            eyre::bail!("battery.cell_count must be >= 1");
        }
        if !(self.battery.poll_interval_s.is_finite() && self.battery.poll_interval_s > 0.0) {
            eyre::bail!("battery.poll_interval_s must be > 0");
        }
        if let Some(cap) = self.battery.capacity_ah
            && !(cap.is_finite() && cap > 0.0)
        {
            eyre::bail!("battery.capacity_ah must be > 0");
        }

        // Cell
        let cell = &self.cell;
        if !(cell.min_voltage > 0.0 && cell.min_voltage < cell.max_voltage) {
            eyre::bail!("cell.min_voltage must be > 0 and below cell.max_voltage");
        }
        if !(cell.min_voltage..=cell.max_voltage).contains(&cell.float_voltage) {
            eyre::bail!("cell.float_voltage must be between cell.min_voltage and cell.max_voltage");
        }

        // Current
        let cur = &self.current;
        if !(cur.max_charge.is_finite() && cur.max_charge >= 0.0) {
            eyre::bail!("current.max_charge must be >= 0");
        }
        if !(cur.max_discharge.is_finite() && cur.max_discharge >= 0.0) {
            eyre::bail!("current.max_discharge must be >= 0");
        }
        for (name, pct) in [
            ("charge_recovery_percent", cur.charge_recovery_percent),
            ("discharge_recovery_percent", cur.discharge_recovery_percent),
            ("change_percent", cur.change_percent),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                eyre::bail!("current.{name} must be in [0, 100]");
            }
        }
        if cur.recalculate_every_s == 0 {
            eyre::bail!("current.recalculate_every_s must be >= 1");
        }
        for (dir, curves) in [("charge", &cur.charge), ("discharge", &cur.discharge)] {
            for (name, curve) in curves.each() {
                if let Some(c) = curve {
                    c.validate(&format!("current.{dir}.{name}"))?;
                }
            }
        }

        // CVL
        let cvl = &self.cvl;
        if cvl.recalculate_every_s == 0 {
            eyre::bail!("cvl.recalculate_every_s must be >= 1");
        }
        if !(0.0..=100.0).contains(&cvl.change_percent) {
            eyre::bail!("cvl.change_percent must be in [0, 100]");
        }
        if cvl.switch_to_float_cell_diff < 0.0 || cvl.switch_to_float_deviation < 0.0 {
            eyre::bail!("cvl.switch_to_float_cell_diff and deviation must be >= 0");
        }
        if !(0.0..=100.0).contains(&cvl.switch_to_bulk_soc_threshold) {
            eyre::bail!("cvl.switch_to_bulk_soc_threshold must be in [0, 100]");
        }
        if cvl.switch_to_bulk_cell_diff <= 0.0 {
            eyre::bail!("cvl.switch_to_bulk_cell_diff must be > 0");
        }
        if cvl.i_controller_factor <= 0.0 {
            eyre::bail!("cvl.i_controller_factor must be > 0");
        }
        if cvl.clipped_max_reduction < 0.0 || cvl.clipped_margin < 0.0 {
            eyre::bail!("cvl.clipped_max_reduction and clipped_margin must be >= 0");
        }
        if cvl.ovp_recovery_step <= 0.0 {
            eyre::bail!("cvl.ovp_recovery_step must be > 0");
        }
        if cvl.float_transition_step < 0.0 {
            eyre::bail!("cvl.float_transition_step must be >= 0");
        }
        if !cvl.voltage_drop.is_finite() || cvl.voltage_drop < 0.0 {
            eyre::bail!("cvl.voltage_drop must be >= 0");
        }
        if cvl.overvoltage_margin < 0.0 {
            eyre::bail!("cvl.overvoltage_margin must be >= 0");
        }

        // SoC
        let soc = &self.soc;
        if soc.source == SocSource::Integrate && self.battery.capacity_ah.is_none() {
            eyre::bail!("battery.capacity_ah is required when soc.source = \"integrate\"");
        }
        if !(0.0..=100.0).contains(&soc.initial) {
            eyre::bail!("soc.initial must be in [0, 100]");
        }
        if soc.zero_reset_after_s == 0 {
            eyre::bail!("soc.zero_reset_after_s must be >= 1");
        }
        if let Some(corr) = &soc.current_correction {
            corr.validate()?;
        }
        if let Some(reset) = soc.reset_cell_voltage {
            if reset <= cell.max_voltage {
                eyre::bail!("soc.reset_cell_voltage must be above cell.max_voltage");
            }
            if soc.reset_after_days == 0 {
                eyre::bail!("soc.reset_after_days must be >= 1");
            }
        }

        // Disconnect
        let dc = &self.disconnect;
        if dc.timeout_min == 0 {
            eyre::bail!("disconnect.timeout_min must be >= 1");
        }
        if dc.safe_band_min >= dc.safe_band_max {
            eyre::bail!("disconnect.safe_band_min must be below disconnect.safe_band_max");
        }

        // Time-to-SoC
        let tts = &self.time_to_soc;
        if tts.points.iter().any(|p| *p > 100) {
            eyre::bail!("time_to_soc.points must be in [0, 100]");
        }
        if tts.recalculate_every_s < MIN_TIME_TO_SOC_RECALC_S {
            eyre::bail!("time_to_soc.recalculate_every_s must be >= {MIN_TIME_TO_SOC_RECALC_S}");
        }
        if tts.average_window == 0 {
            eyre::bail!("time_to_soc.average_window must be >= 1");
        }
        if !(0.0..=100.0).contains(&tts.low_soc) {
            eyre::bail!("time_to_soc.low_soc must be in [0, 100]");
        }

        // Alarms
        let alarms = &self.alarms;
        for (name, t) in alarms.rising().into_iter().chain(alarms.falling()) {
            if !(t.warning.is_finite() && t.alarm.is_finite()) {
                eyre::bail!("alarms.{name} levels must be finite");
            }
        }
        for (name, t) in alarms.rising() {
            if t.warning > t.alarm {
                eyre::bail!("alarms.{name}.warning must be <= alarms.{name}.alarm");
            }
        }
        for (name, t) in alarms.falling() {
            if t.warning < t.alarm {
                eyre::bail!("alarms.{name}.warning must be >= alarms.{name}.alarm");
            }
        }

        Ok(())
    }

    /// Non-fatal observations about the configuration, for logging at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (dir, curves) in [
            ("charge", &self.current.charge),
            ("discharge", &self.current.discharge),
        ] {
            for (name, curve) in curves.each() {
                if let Some(c) = curve
                    && c.enabled
                    && !c.fraction.iter().any(|f| (*f - 1.0).abs() < f64::EPSILON)
                {
                    out.push(format!(
                        "current.{dir}.{name} never reaches fraction 1.0; full current is never allowed"
                    ));
                }
            }
        }
        if self.cvl.enabled
            && self.cvl.switch_to_bulk_soc_threshold <= 0.0
            && self.cvl.switch_to_bulk_cell_diff >= BULK_DIFF_DISABLED_AT
        {
            out.push(
                "cvl switch back to bulk is disabled; FLOAT is kept until restart".to_string(),
            );
        }
        if self.soc.source == SocSource::Integrate && !self.cvl.enabled {
            out.push(
                "soc.source = integrate without cvl: SoC is never re-anchored at 100%".to_string(),
            );
        }
        if self.current.max_charge == 0.0 {
            out.push("current.max_charge is 0; charging is never allowed".to_string());
        }
        out
    }
}
