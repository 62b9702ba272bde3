//! Lifetime statistics accumulated from accepted snapshots.
//!
//! Discharge figures are in amp-hours and negative, energies in kWh. Values
//! that cannot be known yet (no capacity configured, no discharge seen) stay
//! `None`.

use battctl_traits::Snapshot;

use crate::alarms::Alarms;

/// SoC a fully discharged pack must climb above before the next full
/// discharge is counted.
const FULL_DISCHARGE_RELEASE_SOC: f64 = 15.0;

const SECS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct History {
    /// Lowest capacity-consumed value seen.
    pub deepest_discharge: Option<f64>,
    /// Ah drawn in the current or most recent discharge.
    pub last_discharge: Option<f64>,
    /// Mean Ah drawn per completed discharge.
    pub average_discharge: Option<f64>,
    pub total_ah_drawn: f64,
    /// `total_ah_drawn` in units of the nominal capacity.
    pub charge_cycles: Option<f64>,
    pub full_discharges: u32,
    pub minimum_voltage: Option<f64>,
    pub maximum_voltage: Option<f64>,
    pub minimum_cell_voltage: Option<f64>,
    pub maximum_cell_voltage: Option<f64>,
    pub minimum_temperature: Option<f64>,
    pub maximum_temperature: Option<f64>,
    pub low_voltage_alarms: u32,
    pub high_voltage_alarms: u32,
    pub charged_energy_kwh: f64,
    pub discharged_energy_kwh: f64,
}

fn lower(slot: &mut Option<f64>, v: f64) {
    if slot.is_none_or(|cur| v < cur) {
        *slot = Some(v);
    }
}

fn higher(slot: &mut Option<f64>, v: f64) {
    if slot.is_none_or(|cur| v > cur) {
        *slot = Some(v);
    }
}

#[derive(Debug, Clone)]
pub struct HistoryTracker {
    capacity_ah: Option<f64>,
    history: History,
    discharging: bool,
    completed_discharges: u32,
    completed_ah: f64,
    full_discharge_active: bool,
    previous_alarms: Alarms,
}

impl HistoryTracker {
    pub fn new(capacity_ah: Option<f64>) -> Self {
        Self {
            capacity_ah,
            history: History::default(),
            discharging: false,
            completed_discharges: 0,
            completed_ah: 0.0,
            full_discharge_active: false,
            previous_alarms: Alarms::default(),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Fold one accepted snapshot in. `dt_secs` is the time since the
    /// previous accepted snapshot; `soc` is the estimate after this cycle.
    pub fn update(&mut self, snap: &Snapshot, soc: f64, dt_secs: f64, alarms: &Alarms) {
        let h = &mut self.history;
        let dt = if dt_secs.is_finite() { dt_secs.max(0.0) } else { 0.0 };
        let ah = snap.current * dt / SECS_PER_HOUR;
        let voltage = snap.voltage_sum();

        if snap.current < 0.0 {
            if !self.discharging {
                self.discharging = true;
                h.last_discharge = Some(0.0);
            }
            h.total_ah_drawn += ah;
            h.last_discharge = Some(h.last_discharge.unwrap_or(0.0) + ah);
            h.discharged_energy_kwh += -ah * voltage / 1000.0;
        } else if snap.current > 0.0 {
            h.charged_energy_kwh += ah * voltage / 1000.0;
            if self.discharging {
                self.discharging = false;
                self.completed_discharges += 1;
                self.completed_ah += h.last_discharge.unwrap_or(0.0);
            }
        }
        if self.completed_discharges > 0 {
            h.average_discharge = Some(self.completed_ah / f64::from(self.completed_discharges));
        }

        if let Some(cap) = self.capacity_ah {
            lower(&mut h.deepest_discharge, cap * soc / 100.0 - cap);
            h.charge_cycles = Some(-h.total_ah_drawn / cap);
        }

        if soc <= 0.0 && !self.full_discharge_active {
            h.full_discharges += 1;
            self.full_discharge_active = true;
            tracing::info!(count = h.full_discharges, "full discharge recorded");
        } else if self.full_discharge_active && soc > FULL_DISCHARGE_RELEASE_SOC {
            self.full_discharge_active = false;
        }

        if !snap.cell_voltages.is_empty() {
            lower(&mut h.minimum_voltage, voltage);
            higher(&mut h.maximum_voltage, voltage);
        }
        if let Some(v) = snap.min_cell_voltage() {
            lower(&mut h.minimum_cell_voltage, v);
        }
        if let Some(v) = snap.max_cell_voltage() {
            higher(&mut h.maximum_cell_voltage, v);
        }
        for t in snap.present_temperatures() {
            lower(&mut h.minimum_temperature, t);
            higher(&mut h.maximum_temperature, t);
        }

        if alarms.any_low_voltage() && !self.previous_alarms.any_low_voltage() {
            h.low_voltage_alarms += 1;
        }
        if alarms.any_high_voltage() && !self.previous_alarms.any_high_voltage() {
            h.high_voltage_alarms += 1;
        }
        self.previous_alarms = *alarms;
    }

    pub fn clear(&mut self) {
        tracing::info!("history cleared");
        *self = Self::new(self.capacity_ah);
    }
}
