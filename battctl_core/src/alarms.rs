//! Protection alarms derived from each accepted snapshot.
//!
//! Alarms are informational: they never change CVL, CCL or DCL. Every check
//! reports `Ok`, `Warning` or `Alarm`; a level change is logged once.

use battctl_traits::Snapshot;

use crate::config::{AlarmCfg, Threshold, pack_voltage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AlarmLevel {
    #[default]
    Ok,
    Warning,
    Alarm,
}

impl AlarmLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Alarm => "alarm",
        }
    }

    fn above(value: f64, t: Threshold) -> Self {
        if value >= t.alarm {
            Self::Alarm
        } else if value >= t.warning {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    fn below(value: f64, t: Threshold) -> Self {
        if value <= t.alarm {
            Self::Alarm
        } else if value <= t.warning {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

/// Level of every protection check for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Alarms {
    pub high_voltage: AlarmLevel,
    pub low_voltage: AlarmLevel,
    pub high_cell_voltage: AlarmLevel,
    pub low_cell_voltage: AlarmLevel,
    pub low_soc: AlarmLevel,
    pub cell_imbalance: AlarmLevel,
    pub high_charge_temperature: AlarmLevel,
    pub low_charge_temperature: AlarmLevel,
    pub high_temperature: AlarmLevel,
    pub low_temperature: AlarmLevel,
    pub high_internal_temperature: AlarmLevel,
}

impl Alarms {
    /// Every check with its name, in a fixed order.
    pub fn each(&self) -> [(&'static str, AlarmLevel); 11] {
        [
            ("high_voltage", self.high_voltage),
            ("low_voltage", self.low_voltage),
            ("high_cell_voltage", self.high_cell_voltage),
            ("low_cell_voltage", self.low_cell_voltage),
            ("low_soc", self.low_soc),
            ("cell_imbalance", self.cell_imbalance),
            ("high_charge_temperature", self.high_charge_temperature),
            ("low_charge_temperature", self.low_charge_temperature),
            ("high_temperature", self.high_temperature),
            ("low_temperature", self.low_temperature),
            ("high_internal_temperature", self.high_internal_temperature),
        ]
    }

    pub fn worst(&self) -> AlarmLevel {
        self.each()
            .into_iter()
            .map(|(_, level)| level)
            .max()
            .unwrap_or_default()
    }

    /// Pack or cell low-voltage check is raised.
    pub fn any_low_voltage(&self) -> bool {
        self.low_voltage > AlarmLevel::Ok || self.low_cell_voltage > AlarmLevel::Ok
    }

    pub fn any_high_voltage(&self) -> bool {
        self.high_voltage > AlarmLevel::Ok || self.high_cell_voltage > AlarmLevel::Ok
    }
}

#[derive(Debug, Clone)]
pub struct AlarmMonitor {
    cfg: AlarmCfg,
    cell_count: usize,
    current: Alarms,
}

impl AlarmMonitor {
    pub fn new(cfg: AlarmCfg, cell_count: usize) -> Self {
        Self {
            cfg,
            cell_count,
            current: Alarms::default(),
        }
    }

    pub fn current(&self) -> Alarms {
        self.current
    }

    pub fn evaluate(&mut self, snap: &Snapshot, soc: f64) -> Alarms {
        if !self.cfg.enabled {
            return self.current;
        }
        let c = &self.cfg;
        let mut next = Alarms::default();

        if let (Some(lo), Some(hi)) = (snap.min_cell_voltage(), snap.max_cell_voltage()) {
            next.high_cell_voltage = AlarmLevel::above(hi, c.high_cell_voltage);
            next.low_cell_voltage = AlarmLevel::below(lo, c.low_cell_voltage);
            next.cell_imbalance = AlarmLevel::above(hi - lo, c.cell_imbalance);

            let pack = snap.voltage_sum();
            next.high_voltage = AlarmLevel::above(pack, self.scaled(c.high_cell_voltage));
            next.low_voltage = AlarmLevel::below(pack, self.scaled(c.low_cell_voltage));
        }
        next.low_soc = AlarmLevel::below(soc, c.low_soc);

        let temps: Vec<f64> = snap.present_temperatures().collect();
        let hottest = temps.iter().copied().reduce(f64::max);
        let coldest = temps.iter().copied().reduce(f64::min);
        if let (Some(hot), Some(cold)) = (hottest, coldest) {
            next.high_temperature = AlarmLevel::above(hot, c.high_temperature);
            next.low_temperature = AlarmLevel::below(cold, c.low_temperature);
            if snap.current > 0.0 {
                next.high_charge_temperature = AlarmLevel::above(hot, c.high_charge_temperature);
                next.low_charge_temperature = AlarmLevel::below(cold, c.low_charge_temperature);
            }
        }
        if let Some(t) = snap.mosfet_temperature {
            next.high_internal_temperature = AlarmLevel::above(t, c.high_internal_temperature);
        }

        for ((name, was), (_, now)) in self.current.each().into_iter().zip(next.each()) {
            if now > was {
                tracing::warn!(alarm = name, level = now.as_str(), "protection alarm raised");
            } else if now < was {
                tracing::info!(alarm = name, level = now.as_str(), "protection alarm eased");
            }
        }
        self.current = next;
        next
    }

    fn scaled(&self, t: Threshold) -> Threshold {
        Threshold::new(
            pack_voltage(self.cell_count, t.warning),
            pack_voltage(self.cell_count, t.alarm),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn monitor() -> AlarmMonitor {
        AlarmMonitor::new(AlarmCfg::default(), 4)
    }

    #[test]
    fn healthy_pack_reports_ok() {
        let snap = Snapshot::new(vec![3.30; 4], 5.0, Instant::now()).with_temperature(0, 25.0);
        let a = monitor().evaluate(&snap, 60.0);
        assert_eq!(a, Alarms::default());
        assert_eq!(a.worst(), AlarmLevel::Ok);
    }

    #[test]
    fn cell_levels_escalate() {
        let mut m = monitor();
        let warn = Snapshot::new(vec![3.45, 3.45, 3.45, 3.56], 5.0, Instant::now());
        let a = m.evaluate(&warn, 60.0);
        assert_eq!(a.high_cell_voltage, AlarmLevel::Warning);
        assert_eq!(a.cell_imbalance, AlarmLevel::Warning);
        assert_eq!(a.high_voltage, AlarmLevel::Ok);

        let alarm = Snapshot::new(vec![3.45, 3.45, 3.45, 3.70], 5.0, Instant::now());
        let a = m.evaluate(&alarm, 60.0);
        assert_eq!(a.high_cell_voltage, AlarmLevel::Alarm);
        assert_eq!(a.cell_imbalance, AlarmLevel::Alarm);
        assert!(a.any_high_voltage());
        assert_eq!(a.worst(), AlarmLevel::Alarm);
    }

    #[test]
    fn pack_voltage_uses_scaled_cell_levels() {
        let snap = Snapshot::new(vec![2.85; 4], -5.0, Instant::now());
        let a = monitor().evaluate(&snap, 50.0);
        assert_eq!(a.low_cell_voltage, AlarmLevel::Warning);
        assert_eq!(a.low_voltage, AlarmLevel::Warning);
        assert!(a.any_low_voltage());
    }

    #[test]
    fn low_soc_levels() {
        let snap = Snapshot::new(vec![3.30; 4], 0.0, Instant::now());
        let mut m = monitor();
        assert_eq!(m.evaluate(&snap, 15.0).low_soc, AlarmLevel::Warning);
        assert_eq!(m.evaluate(&snap, 10.0).low_soc, AlarmLevel::Alarm);
        assert_eq!(m.evaluate(&snap, 50.0).low_soc, AlarmLevel::Ok);
    }

    #[test]
    fn charge_temperature_only_while_charging() {
        let cold = |current| {
            Snapshot::new(vec![3.30; 4], current, Instant::now()).with_temperature(1, 1.0)
        };
        let mut m = monitor();
        let a = m.evaluate(&cold(-10.0), 50.0);
        assert_eq!(a.low_charge_temperature, AlarmLevel::Ok);
        assert_eq!(a.low_temperature, AlarmLevel::Ok);
        let a = m.evaluate(&cold(10.0), 50.0);
        assert_eq!(a.low_charge_temperature, AlarmLevel::Warning);
    }

    #[test]
    fn missing_temperatures_stay_ok() {
        let snap = Snapshot::new(vec![3.30; 4], 10.0, Instant::now()).with_mosfet_temperature(85.0);
        let a = monitor().evaluate(&snap, 50.0);
        assert_eq!(a.high_temperature, AlarmLevel::Ok);
        assert_eq!(a.high_internal_temperature, AlarmLevel::Alarm);
    }

    #[test]
    fn disabled_monitor_never_raises() {
        let cfg = AlarmCfg {
            enabled: false,
            ..AlarmCfg::default()
        };
        let snap = Snapshot::new(vec![2.0; 4], 0.0, Instant::now());
        assert_eq!(AlarmMonitor::new(cfg, 4).evaluate(&snap, 0.0).worst(), AlarmLevel::Ok);
    }
}
