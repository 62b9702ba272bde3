//! State-of-charge estimation.
//!
//! Two sources are supported: the BMS-reported value, or coulomb counting
//! against the configured capacity. Coulomb counting is re-anchored by two
//! hard resets (0% after a sustained low-cell discharge, 100% on entering
//! float). A separate tracker reports when a full-charge reset is overdue.

use std::time::Instant;

use battctl_traits::Snapshot;

use crate::config::{SocCfg, SocSource};
use crate::state::BatteryState;

const SECS_PER_HOUR: f64 = 3600.0;

/// Result of one estimator update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SocUpdate {
    pub soc: f64,
    /// BMS mode only: the snapshot carried no SoC and the previous value was kept.
    pub stale: bool,
    /// The low-voltage reset fired during this update.
    pub zeroed: bool,
}

#[derive(Debug, Clone)]
pub struct SocEstimator {
    cfg: SocCfg,
    min_cell_voltage: f64,
    seeded: bool,
    low_since: Option<Instant>,
    stale_reported: bool,
    tracking_since: Option<Instant>,
    overdue_reported: bool,
}

impl SocEstimator {
    pub fn new(cfg: SocCfg, min_cell_voltage: f64) -> Self {
        Self {
            cfg,
            min_cell_voltage,
            seeded: false,
            low_since: None,
            stale_reported: false,
            tracking_since: None,
            overdue_reported: false,
        }
    }

    pub fn source(&self) -> SocSource {
        self.cfg.source
    }

    /// Advance the estimate by one snapshot. `dt_secs` is the time since the
    /// previous accepted snapshot; zero, negative or non-finite values add
    /// no charge.
    pub fn update(&mut self, state: &mut BatteryState, snap: &Snapshot, dt_secs: f64) -> SocUpdate {
        match self.cfg.source {
            SocSource::Bms => self.copy_reported(state, snap),
            SocSource::Integrate => self.integrate(state, snap, dt_secs),
        }
    }

    fn copy_reported(&mut self, state: &mut BatteryState, snap: &Snapshot) -> SocUpdate {
        match snap.soc.filter(|v| v.is_finite()) {
            Some(reported) => {
                state.soc = reported.clamp(0.0, 100.0);
                self.stale_reported = false;
                SocUpdate {
                    soc: state.soc,
                    ..SocUpdate::default()
                }
            }
            None => {
                if !self.stale_reported {
                    tracing::warn!(soc = state.soc, "BMS reported no SoC; keeping previous value");
                    self.stale_reported = true;
                }
                SocUpdate {
                    soc: state.soc,
                    stale: true,
                    zeroed: false,
                }
            }
        }
    }

    fn integrate(&mut self, state: &mut BatteryState, snap: &Snapshot, dt_secs: f64) -> SocUpdate {
        if !self.seeded {
            if let Some(reported) = snap.soc.filter(|v| v.is_finite()) {
                state.soc = reported.clamp(0.0, 100.0);
            }
            self.seeded = true;
            tracing::debug!(soc = state.soc, "coulomb counter seeded");
        }

        if let Some(capacity) = self.cfg.capacity_ah.filter(|c| *c > 0.0)
            && dt_secs.is_finite()
            && dt_secs > 0.0
        {
            let delta = snap.current * (dt_secs / SECS_PER_HOUR) / capacity * 100.0;
            if delta.is_finite() {
                state.soc = (state.soc + delta).clamp(0.0, 100.0);
            }
        }

        let mut zeroed = false;
        let low = snap
            .min_cell_voltage()
            .is_some_and(|v| v <= self.min_cell_voltage);
        if low && snap.current < 0.0 {
            let since = *self.low_since.get_or_insert(snap.at);
            if snap.at.saturating_duration_since(since) >= self.cfg.zero_reset_after
                && state.soc > 0.0
            {
                tracing::info!(
                    previous = state.soc,
                    min_cell_voltage = self.min_cell_voltage,
                    "sustained low cell voltage while discharging; SoC reset to 0%"
                );
                state.soc = 0.0;
                zeroed = true;
            }
        } else {
            self.low_since = None;
        }

        SocUpdate {
            soc: state.soc,
            stale: false,
            zeroed,
        }
    }

    /// Called on the BULK to FLOAT transition. Returns true when SoC was set to 100.
    pub fn on_float_entered(&mut self, state: &mut BatteryState) -> bool {
        if self.cfg.source != SocSource::Integrate {
            return false;
        }
        tracing::info!(previous = state.soc, "float reached; SoC set to 100%");
        state.soc = 100.0;
        self.low_since = None;
        true
    }

    /// Manual reset request.
    pub fn reset_to(&mut self, state: &mut BatteryState, value: f64) {
        if !value.is_finite() {
            tracing::warn!(value, "ignoring non-finite SoC reset request");
            return;
        }
        state.soc = value.clamp(0.0, 100.0);
        self.seeded = true;
        self.low_since = None;
        tracing::info!(soc = state.soc, "SoC reset on request");
    }

    /// Record full-charge events and report whether one is overdue.
    pub fn track_full_charge(&mut self, state: &mut BatteryState, snap: &Snapshot) -> bool {
        let Some(reset) = &self.cfg.reset else {
            return false;
        };
        let started = *self.tracking_since.get_or_insert(snap.at);
        if snap
            .max_cell_voltage()
            .is_some_and(|v| v >= reset.cell_voltage)
        {
            if self.overdue_reported {
                tracing::info!(cell_voltage = reset.cell_voltage, "SoC reset voltage reached");
            }
            state.soc_reset_timer_start = Some(snap.at);
            self.overdue_reported = false;
        }
        let anchor = state.soc_reset_timer_start.unwrap_or(started);
        let overdue = snap.at.saturating_duration_since(anchor) >= reset.after;
        if overdue && !self.overdue_reported {
            tracing::warn!(
                days = reset.after.as_secs() / 86_400,
                "SoC reset voltage not reached in time; SoC may have drifted"
            );
            self.overdue_reported = true;
        }
        overdue
    }

    /// Per-cell bulk voltage to use while a full-charge reset is overdue.
    pub fn bulk_cell_override(&self, overdue: bool) -> Option<f64> {
        self.cfg
            .reset
            .as_ref()
            .filter(|r| overdue && r.raise_cvl)
            .map(|r| r.cell_voltage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SocResetCfg;
    use std::time::Duration;

    fn integrating(capacity: f64) -> SocEstimator {
        SocEstimator::new(
            SocCfg {
                source: SocSource::Integrate,
                capacity_ah: Some(capacity),
                initial: 50.0,
                ..SocCfg::default()
            },
            2.9,
        )
    }

    fn snap(at: Instant, current: f64, cell: f64) -> Snapshot {
        Snapshot::new(vec![cell; 4], current, at)
    }

    #[test]
    fn integrates_constant_current() {
        let t0 = Instant::now();
        let mut est = integrating(100.0);
        let mut st = BatteryState::new(t0, 50.0);
        est.update(&mut st, &snap(t0, 0.0, 3.3), 0.0);
        // 10 A for 1 h into 100 Ah is 10 %.
        let u = est.update(&mut st, &snap(t0 + Duration::from_secs(3600), 10.0, 3.3), 3600.0);
        assert!((u.soc - 60.0).abs() < 1e-9);
    }

    #[test]
    fn negative_dt_adds_nothing() {
        let t0 = Instant::now();
        let mut est = integrating(100.0);
        let mut st = BatteryState::new(t0, 50.0);
        let u = est.update(&mut st, &snap(t0, 50.0, 3.3), -10.0);
        assert!((u.soc - 50.0).abs() < 1e-12);
        let u = est.update(&mut st, &snap(t0, 50.0, 3.3), f64::NAN);
        assert!((u.soc - 50.0).abs() < 1e-12);
    }

    #[test]
    fn seeds_from_reported_soc() {
        let t0 = Instant::now();
        let mut est = integrating(100.0);
        let mut st = BatteryState::new(t0, 50.0);
        let u = est.update(&mut st, &snap(t0, 0.0, 3.3).with_soc(73.0), 0.0);
        assert!((u.soc - 73.0).abs() < 1e-12);
        // Later reports do not override the counter.
        let u = est.update(&mut st, &snap(t0, 0.0, 3.3).with_soc(10.0), 0.0);
        assert!((u.soc - 73.0).abs() < 1e-12);
    }

    #[test]
    fn bms_mode_clamps_and_flags_missing_value() {
        let t0 = Instant::now();
        let mut est = SocEstimator::new(SocCfg::default(), 2.9);
        let mut st = BatteryState::new(t0, 40.0);
        let u = est.update(&mut st, &snap(t0, 0.0, 3.3).with_soc(104.0), 1.0);
        assert!((u.soc - 100.0).abs() < 1e-12);
        let u = est.update(&mut st, &snap(t0, 0.0, 3.3), 1.0);
        assert!(u.stale);
        assert!((u.soc - 100.0).abs() < 1e-12);
    }

    #[test]
    fn float_reset_only_in_integration_mode() {
        let t0 = Instant::now();
        let mut st = BatteryState::new(t0, 40.0);
        assert!(!SocEstimator::new(SocCfg::default(), 2.9).on_float_entered(&mut st));
        assert!((st.soc - 40.0).abs() < 1e-12);
        assert!(integrating(100.0).on_float_entered(&mut st));
        assert!((st.soc - 100.0).abs() < 1e-12);
    }

    #[test]
    fn overdue_reset_raises_bulk_cell_voltage() {
        let t0 = Instant::now();
        let mut est = SocEstimator::new(
            SocCfg {
                reset: Some(SocResetCfg {
                    cell_voltage: 3.65,
                    after: Duration::from_secs(86_400),
                    raise_cvl: true,
                }),
                ..SocCfg::default()
            },
            2.9,
        );
        let mut st = BatteryState::new(t0, 50.0);
        assert!(!est.track_full_charge(&mut st, &snap(t0, 0.0, 3.3)));
        let day = t0 + Duration::from_secs(86_400);
        let overdue = est.track_full_charge(&mut st, &snap(day, 0.0, 3.3));
        assert!(overdue);
        assert_eq!(est.bulk_cell_override(overdue), Some(3.65));
        let later = day + Duration::from_secs(10);
        assert!(!est.track_full_charge(&mut st, &snap(later, 5.0, 3.65)));
        assert_eq!(st.soc_reset_timer_start, Some(later));
    }
}
