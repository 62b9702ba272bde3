//! Telemetry snapshot: the uniform data contract between protocol adapters
//! and the control core.

use std::time::Instant;

/// Maximum number of pack temperature channels a snapshot carries.
pub const MAX_TEMPERATURE_CHANNELS: usize = 4;

/// One poll worth of BMS telemetry.
///
/// Sign convention: `current` is positive when charging (into the battery).
/// Absent sensors are `None`, never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Per-cell voltages in volts, cell 1 first.
    pub cell_voltages: Vec<f64>,
    /// Pack current in amperes.
    pub current: f64,
    pub temperatures: [Option<f64>; MAX_TEMPERATURE_CHANNELS],
    pub mosfet_temperature: Option<f64>,
    /// State of charge reported by the BMS, in percent.
    pub soc: Option<f64>,
    pub charge_fet: Option<bool>,
    pub discharge_fet: Option<bool>,
    /// Charge current ceiling advertised by the BMS itself.
    pub bms_max_charge_current: Option<f64>,
    /// Discharge current ceiling advertised by the BMS itself.
    pub bms_max_discharge_current: Option<f64>,
    /// Monotonic time at which the snapshot was taken.
    pub at: Instant,
}

impl Snapshot {
    pub fn new(cell_voltages: Vec<f64>, current: f64, at: Instant) -> Self {
        Self {
            cell_voltages,
            current,
            temperatures: [None; MAX_TEMPERATURE_CHANNELS],
            mosfet_temperature: None,
            soc: None,
            charge_fet: None,
            discharge_fet: None,
            bms_max_charge_current: None,
            bms_max_discharge_current: None,
            at,
        }
    }

    /// Set temperature channel `idx` (0-based). Out-of-range indices are ignored.
    #[must_use]
    pub fn with_temperature(mut self, idx: usize, celsius: f64) -> Self {
        if let Some(slot) = self.temperatures.get_mut(idx) {
            *slot = Some(celsius);
        }
        self
    }

    #[must_use]
    pub fn with_mosfet_temperature(mut self, celsius: f64) -> Self {
        self.mosfet_temperature = Some(celsius);
        self
    }

    #[must_use]
    pub fn with_soc(mut self, soc: f64) -> Self {
        self.soc = Some(soc);
        self
    }

    #[must_use]
    pub fn with_fets(mut self, charge: bool, discharge: bool) -> Self {
        self.charge_fet = Some(charge);
        self.discharge_fet = Some(discharge);
        self
    }

    #[must_use]
    pub fn with_bms_limits(mut self, charge: f64, discharge: f64) -> Self {
        self.bms_max_charge_current = Some(charge);
        self.bms_max_discharge_current = Some(discharge);
        self
    }

    pub fn cell_count(&self) -> usize {
        self.cell_voltages.len()
    }

    /// Lowest cell voltage, or `None` for an empty cell list.
    pub fn min_cell_voltage(&self) -> Option<f64> {
        self.cell_voltages.iter().copied().reduce(f64::min)
    }

    /// Highest cell voltage, or `None` for an empty cell list.
    pub fn max_cell_voltage(&self) -> Option<f64> {
        self.cell_voltages.iter().copied().reduce(f64::max)
    }

    /// Pack voltage as the sum of cell voltages.
    pub fn voltage_sum(&self) -> f64 {
        self.cell_voltages.iter().sum()
    }

    /// Difference between the highest and lowest cell (0 for an empty list).
    pub fn cell_spread(&self) -> f64 {
        match (self.max_cell_voltage(), self.min_cell_voltage()) {
            (Some(hi), Some(lo)) => hi - lo,
            _ => 0.0,
        }
    }

    /// Present temperature readings, absent channels skipped.
    pub fn present_temperatures(&self) -> impl Iterator<Item = f64> + '_ {
        self.temperatures.iter().filter_map(|t| *t)
    }
}
