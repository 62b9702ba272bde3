//! Charge voltage limit: bulk/float state machine and the bulk limiters.

use std::time::{Duration, Instant};

use battctl_traits::Snapshot;

use crate::cadence::Cadence;
use crate::config::{CellCfg, CvlCfg, CvlMode, pack_voltage};
use crate::state::{BatteryState, ChargeMode};
use crate::util::secs_between;

/// Tolerance for comparing summed cell voltages against pack targets.
const VOLTAGE_EPS: f64 = 1e-6;

/// Pack voltage dip below the bulk target that abandons a running float wait.
const FLOAT_WAIT_DROP_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct CvlOutput {
    /// Published limit, voltage-drop compensation included.
    pub cvl: f64,
    /// Target before compensation.
    pub target: f64,
    pub mode: ChargeMode,
    pub entered_float: bool,
    pub returned_to_bulk: bool,
    /// Target is below nominal because a limiter or its recovery ramp holds it down.
    pub limiting: bool,
    /// Bulk mode with a cell above the allowed maximum.
    pub overvoltage: bool,
    /// Float target still walking down from the bulk voltage.
    pub float_transition: bool,
    /// CCL must be forced to zero this cycle.
    pub force_ccl_zero: bool,
}

#[derive(Debug, Clone, Copy)]
struct OvpHold {
    at: Instant,
    value: f64,
}

#[derive(Debug, Clone, Copy)]
struct FloatRamp {
    from: f64,
    started: Instant,
}

#[derive(Debug, Clone)]
pub struct CvlController {
    cfg: CvlCfg,
    cell: CellCfg,
    cell_count: usize,
    penalty_cadence: Cadence,
    penalty_target: Option<f64>,
    bulk_target: Option<f64>,
    ovp: Option<OvpHold>,
    ramp: Option<FloatRamp>,
    target: Option<f64>,
    last_at: Option<Instant>,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl CvlController {
    pub fn new(cfg: CvlCfg, cell: CellCfg, cell_count: usize) -> Self {
        let penalty_cadence = Cadence::new(cfg.recalculate_every, cfg.change_percent);
        Self {
            cfg,
            cell,
            cell_count,
            penalty_cadence,
            penalty_target: None,
            bulk_target: None,
            ovp: None,
            ramp: None,
            target: None,
            last_at: None,
        }
    }

    pub fn float_voltage(&self) -> f64 {
        pack_voltage(self.cell_count, self.cell.float_voltage)
    }

    /// Last committed target (before compensation), if any cycle ran.
    pub fn last_target(&self) -> Option<f64> {
        self.target
    }

    /// Published form of a target.
    pub fn publish(&self, target: f64) -> f64 {
        round3(target + self.cfg.voltage_drop)
    }

    /// Run one cycle. `bulk_cell_override` replaces the per-cell bulk voltage
    /// while a SoC reset charge is pending.
    pub fn step(
        &mut self,
        state: &mut BatteryState,
        snap: &Snapshot,
        bulk_cell_override: Option<f64>,
        now: Instant,
    ) -> CvlOutput {
        let dt = self.last_at.map_or(0.0, |t| secs_between(t, now));
        self.last_at = Some(now);

        let bulk_cell = bulk_cell_override.unwrap_or(self.cell.max_voltage);
        let nominal = pack_voltage(self.cell_count, bulk_cell);
        let float_target = self.float_voltage();
        let max_cell = snap.max_cell_voltage().unwrap_or(0.0);

        let mut entered_float = false;
        let mut returned_to_bulk = false;
        if self.cfg.enabled {
            match state.charge_mode {
                ChargeMode::Bulk => {
                    self.update_float_timer(state, snap, nominal, now);
                    if let Some(since) = state.last_voltage_diff_ok_since
                        && now.saturating_duration_since(since) >= self.cfg.float_wait
                    {
                        self.enter_float(state, nominal, now);
                        entered_float = true;
                    }
                }
                ChargeMode::Float => {
                    if self.should_return_to_bulk(state, snap, bulk_cell_override.is_some()) {
                        self.enter_bulk(state, now);
                        returned_to_bulk = true;
                    }
                }
            }
        } else if state.charge_mode == ChargeMode::Float {
            self.enter_bulk(state, now);
        }

        let target = match state.charge_mode {
            ChargeMode::Float => self.float_step(float_target, now),
            ChargeMode::Bulk if !self.cfg.enabled => nominal,
            ChargeMode::Bulk => self.bulk_step(state, snap, bulk_cell, nominal, float_target, dt, now),
        };
        self.target = Some(target);

        let in_bulk = state.charge_mode == ChargeMode::Bulk;
        let overvoltage = in_bulk && max_cell > bulk_cell + VOLTAGE_EPS;
        let force_ccl_zero = self.cfg.force_ccl_zero_on_overvoltage
            && in_bulk
            && max_cell > bulk_cell + self.cfg.overvoltage_margin;
        if force_ccl_zero {
            tracing::debug!(
                max_cell,
                limit = bulk_cell + self.cfg.overvoltage_margin,
                "cell overvoltage beyond margin; forcing CCL to zero"
            );
        }

        tracing::trace!(
            mode = %state.charge_mode,
            target,
            nominal,
            integral = state.i_controller_integral,
            "cvl cycle"
        );

        CvlOutput {
            cvl: self.publish(target),
            target,
            mode: state.charge_mode,
            entered_float,
            returned_to_bulk,
            limiting: in_bulk && target < nominal - VOLTAGE_EPS,
            overvoltage,
            float_transition: !in_bulk && self.ramp.is_some(),
            force_ccl_zero,
        }
    }

    fn update_float_timer(
        &self,
        state: &mut BatteryState,
        snap: &Snapshot,
        nominal: f64,
        now: Instant,
    ) {
        let spread = snap.cell_spread();
        let voltage_sum = snap.voltage_sum();
        if state.last_voltage_diff_ok_since.is_some() {
            if spread > self.cfg.float_cell_diff + self.cfg.float_deviation + VOLTAGE_EPS {
                tracing::debug!(spread, "cell spread breached float deviation; wait restarts");
                state.last_voltage_diff_ok_since = None;
            } else if voltage_sum < nominal - FLOAT_WAIT_DROP_TOLERANCE {
                state.last_voltage_diff_ok_since = None;
            }
        }
        if state.last_voltage_diff_ok_since.is_none()
            && voltage_sum + VOLTAGE_EPS >= nominal
            && spread <= self.cfg.float_cell_diff + VOLTAGE_EPS
        {
            tracing::debug!(voltage_sum, spread, "bulk target reached with balanced cells; float wait started");
            state.last_voltage_diff_ok_since = Some(now);
        }
    }

    fn should_return_to_bulk(
        &self,
        state: &BatteryState,
        snap: &Snapshot,
        reset_pending: bool,
    ) -> bool {
        let spread = snap.cell_spread();
        let soc_low =
            self.cfg.bulk_soc_threshold > 0.0 && state.soc < self.cfg.bulk_soc_threshold;
        let spread_high = self.cfg.bulk_diff_enabled() && spread >= self.cfg.bulk_cell_diff;
        if soc_low || spread_high || reset_pending {
            tracing::info!(
                soc = state.soc,
                spread,
                reset_pending,
                "switching from float back to bulk"
            );
            return true;
        }
        false
    }

    fn enter_float(&mut self, state: &mut BatteryState, nominal: f64, now: Instant) {
        let from = self.target.unwrap_or(nominal);
        tracing::info!(
            after_s = state
                .last_voltage_diff_ok_since
                .map_or(0, |s| now.saturating_duration_since(s).as_secs()),
            "switching from bulk to float"
        );
        state.charge_mode = ChargeMode::Float;
        state.mode_since = now;
        state.last_voltage_diff_ok_since = None;
        state.i_controller_integral = 0.0;
        self.ovp = None;
        self.bulk_target = None;
        self.penalty_target = None;
        self.ramp = (self.cfg.float_transition_step > 0.0).then_some(FloatRamp { from, started: now });
    }

    fn enter_bulk(&mut self, state: &mut BatteryState, now: Instant) {
        state.charge_mode = ChargeMode::Bulk;
        state.mode_since = now;
        state.last_voltage_diff_ok_since = None;
        self.ramp = None;
    }

    fn float_step(&mut self, float_target: f64, now: Instant) -> f64 {
        let Some(ramp) = self.ramp else {
            return float_target;
        };
        let walked = self.cfg.float_transition_step
            * now.saturating_duration_since(ramp.started).as_secs_f64();
        let v = ramp.from - walked;
        if v <= float_target {
            self.ramp = None;
            float_target
        } else {
            v
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bulk_step(
        &mut self,
        state: &mut BatteryState,
        snap: &Snapshot,
        bulk_cell: f64,
        nominal: f64,
        float_target: f64,
        dt: f64,
        now: Instant,
    ) -> f64 {
        let candidate = match self.cfg.mode {
            CvlMode::None => nominal,
            CvlMode::PenaltySum => self.penalty_sum(snap, bulk_cell, nominal, now),
            CvlMode::ClippedSum => self.clipped_sum(snap, bulk_cell, nominal),
            CvlMode::IController => {
                let max_cell = snap.max_cell_voltage().unwrap_or(0.0);
                let error = max_cell - (bulk_cell + self.cfg.float_cell_diff);
                let span = (nominal - float_target).max(0.0);
                state.i_controller_integral = (state.i_controller_integral
                    + error * self.cfg.i_gain * dt)
                    .clamp(0.0, span);
                // The integrator already slews; no recovery ramp on top.
                let t = nominal - state.i_controller_integral;
                self.bulk_target = Some(t);
                return t;
            }
        };
        self.recover(candidate, nominal, now)
    }

    fn penalty_sum(&mut self, snap: &Snapshot, bulk_cell: f64, nominal: f64, now: Instant) -> f64 {
        let penalty: f64 = snap
            .cell_voltages
            .iter()
            .map(|v| (v - bulk_cell).max(0.0))
            .sum();
        let floor = pack_voltage(self.cell_count, self.cell.min_voltage).min(nominal);
        let raw = (nominal - penalty).clamp(floor, nominal);
        let commit = self
            .penalty_target
            .is_none_or(|prev| self.penalty_cadence.should_commit(now, prev, raw));
        if commit {
            if self.penalty_target != Some(raw) {
                tracing::debug!(penalty, target = raw, "penalty-sum target recalculated");
            }
            self.penalty_target = Some(raw);
            self.penalty_cadence.mark(now);
        }
        self.penalty_target.unwrap_or(raw)
    }

    fn clipped_sum(&self, snap: &Snapshot, bulk_cell: f64, nominal: f64) -> f64 {
        let any_high = snap.cell_voltages.iter().any(|v| *v > bulk_cell);
        if !any_high {
            return nominal;
        }
        let clipped: f64 = snap.cell_voltages.iter().map(|v| v.min(bulk_cell)).sum();
        let floor = nominal - self.cfg.clipped_max_reduction;
        (clipped + self.cfg.clipped_margin).clamp(floor.min(nominal), nominal)
    }

    /// Lower immediately, rise slowly: after a limiter lowered the target it
    /// is held for `ovp_recovery_hold`, then raised at `ovp_recovery_step` V/s.
    fn recover(&mut self, candidate: f64, nominal: f64, now: Instant) -> f64 {
        let prev = self.bulk_target;
        let next = match (prev, self.ovp) {
            (None, _) => {
                if candidate < nominal - VOLTAGE_EPS {
                    self.ovp = Some(OvpHold { at: now, value: candidate });
                }
                candidate
            }
            (Some(p), _) if candidate <= p => {
                self.ovp = (candidate < nominal - VOLTAGE_EPS)
                    .then_some(OvpHold { at: now, value: candidate });
                candidate
            }
            (Some(p), Some(hold)) => {
                let since = now.saturating_duration_since(hold.at);
                if since < self.cfg.ovp_recovery_hold {
                    p
                } else {
                    let ramp_secs = since
                        .saturating_sub(self.cfg.ovp_recovery_hold)
                        .as_secs_f64();
                    let allowed = (hold.value + self.cfg.ovp_recovery_step * ramp_secs).min(candidate);
                    if allowed >= nominal - VOLTAGE_EPS {
                        tracing::debug!("cell overvoltage recovery complete");
                        self.ovp = None;
                        nominal
                    } else {
                        allowed.max(p)
                    }
                }
            }
            (Some(_), None) => candidate,
        };
        self.bulk_target = Some(next);
        next
    }

    /// Hold time remaining before the overvoltage recovery ramp starts.
    pub fn ovp_hold_remaining(&self, now: Instant) -> Option<Duration> {
        self.ovp.map(|h| {
            self.cfg
                .ovp_recovery_hold
                .saturating_sub(now.saturating_duration_since(h.at))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctl(mode: CvlMode) -> CvlController {
        CvlController::new(
            CvlCfg {
                mode,
                float_wait: Duration::from_secs(10),
                ..CvlCfg::default()
            },
            CellCfg::default(),
            4,
        )
    }

    fn at(t0: Instant, s: u64) -> Instant {
        t0 + Duration::from_secs(s)
    }

    #[test]
    fn penalty_sum_lowers_by_total_overshoot() {
        let t0 = Instant::now();
        let mut c = ctl(CvlMode::PenaltySum);
        let mut st = BatteryState::new(t0, 50.0);
        let snap = Snapshot::new(vec![3.50, 3.47, 3.40, 3.40], 10.0, t0);
        let out = c.step(&mut st, &snap, None, t0);
        // nominal 13.8, overshoot 0.05 + 0.02
        assert!((out.target - 13.73).abs() < 1e-9, "{}", out.target);
        assert!(out.limiting);
        assert!(out.overvoltage);
        assert_eq!(c.ovp_hold_remaining(at(t0, 20)), Some(Duration::from_secs(40)));
    }

    #[test]
    fn penalty_sum_recovers_after_hold_then_ramps() {
        let t0 = Instant::now();
        let mut c = ctl(CvlMode::PenaltySum);
        let mut st = BatteryState::new(t0, 50.0);
        let high = Snapshot::new(vec![3.55, 3.40, 3.40, 3.40], 10.0, t0);
        assert!((c.step(&mut st, &high, None, t0).target - 13.7).abs() < 1e-9);

        // Cells back in range, but the penalty target only moves on the next
        // recalculation; until then the hold keeps being refreshed.
        let ok = |s| Snapshot::new(vec![3.40; 4], 10.0, at(t0, s));
        assert!((c.step(&mut st, &ok(30), None, at(t0, 30)).target - 13.7).abs() < 1e-9);
        let out = c.step(&mut st, &ok(61), None, at(t0, 61));
        assert!((out.target - 13.7).abs() < 1e-9, "held: {}", out.target);
        let out = c.step(&mut st, &ok(100), None, at(t0, 100));
        assert!((out.target - 13.71).abs() < 1e-9, "ramping: {}", out.target);
        let out = c.step(&mut st, &ok(300), None, at(t0, 300));
        assert!((out.target - 13.8).abs() < 1e-9, "recovered: {}", out.target);
        assert!(!out.limiting);
    }

    #[test]
    fn i_controller_stays_between_float_and_bulk() {
        let t0 = Instant::now();
        let mut c = ctl(CvlMode::IController);
        let mut st = BatteryState::new(t0, 50.0);
        let hot = |s| Snapshot::new(vec![3.60, 3.40, 3.40, 3.40], 10.0, at(t0, s));
        let mut last = f64::MAX;
        for s in 0..600 {
            let out = c.step(&mut st, &hot(s), None, at(t0, s));
            assert!(out.target <= 13.8 + 1e-9);
            assert!(out.target >= 13.5 - 1e-9);
            assert!(out.target <= last + 1e-9);
            last = out.target;
        }
        assert!((last - 13.5).abs() < 1e-9, "wound down to float: {last}");
        assert!((st.i_controller_integral - 0.3).abs() < 1e-9);
    }

    #[test]
    fn clipped_sum_caps_reduction() {
        let t0 = Instant::now();
        let mut c = CvlController::new(
            CvlCfg {
                mode: CvlMode::ClippedSum,
                clipped_max_reduction: 0.2,
                ..CvlCfg::default()
            },
            CellCfg::default(),
            4,
        );
        let mut st = BatteryState::new(t0, 50.0);
        // Clipped sum 3.45 + 3.0 * 3 + 0.01 is far below the cap.
        let snap = Snapshot::new(vec![3.70, 3.00, 3.00, 3.00], 10.0, t0);
        assert!((c.step(&mut st, &snap, None, t0).target - 13.6).abs() < 1e-9);
    }

    #[test]
    fn clipped_sum_without_overshoot_is_nominal() {
        let t0 = Instant::now();
        let mut c = ctl(CvlMode::ClippedSum);
        let mut st = BatteryState::new(t0, 50.0);
        let snap = Snapshot::new(vec![3.30; 4], 10.0, t0);
        assert!((c.step(&mut st, &snap, None, t0).target - 13.8).abs() < 1e-9);
    }

    #[test]
    fn float_transition_ramp_walks_down() {
        let t0 = Instant::now();
        let mut c = CvlController::new(
            CvlCfg {
                mode: CvlMode::None,
                float_wait: Duration::ZERO,
                float_transition_step: 0.01,
                ..CvlCfg::default()
            },
            CellCfg::default(),
            4,
        );
        let mut st = BatteryState::new(t0, 95.0);
        let full = |s| Snapshot::new(vec![3.45; 4], 1.0, at(t0, s));
        let out = c.step(&mut st, &full(0), None, t0);
        assert!(out.entered_float);
        assert!((out.target - 13.8).abs() < 1e-9);
        let out = c.step(&mut st, &full(10), None, at(t0, 10));
        assert!((out.target - 13.7).abs() < 1e-9);
        assert!(out.float_transition);
        let out = c.step(&mut st, &full(100), None, at(t0, 100));
        assert!((out.target - 13.5).abs() < 1e-9);
        assert!(!out.float_transition);
    }

    #[test]
    fn disabled_cvl_stays_at_bulk() {
        let t0 = Instant::now();
        let mut c = CvlController::new(
            CvlCfg {
                enabled: false,
                float_wait: Duration::ZERO,
                voltage_drop: 0.1,
                ..CvlCfg::default()
            },
            CellCfg::default(),
            4,
        );
        let mut st = BatteryState::new(t0, 100.0);
        let out = c.step(&mut st, &Snapshot::new(vec![3.45; 4], 0.0, t0), None, t0);
        assert_eq!(out.mode, ChargeMode::Bulk);
        assert!((out.cvl - 13.9).abs() < 1e-9);
    }

    #[test]
    fn force_ccl_zero_needs_flag_and_margin() {
        let t0 = Instant::now();
        let mut c = CvlController::new(
            CvlCfg {
                force_ccl_zero_on_overvoltage: true,
                overvoltage_margin: 0.05,
                ..CvlCfg::default()
            },
            CellCfg::default(),
            4,
        );
        let mut st = BatteryState::new(t0, 50.0);
        let out = c.step(&mut st, &Snapshot::new(vec![3.48, 3.4, 3.4, 3.4], 5.0, t0), None, t0);
        assert!(out.overvoltage);
        assert!(!out.force_ccl_zero);
        let t1 = at(t0, 1);
        let out = c.step(&mut st, &Snapshot::new(vec![3.51, 3.4, 3.4, 3.4], 5.0, t1), None, t1);
        assert!(out.force_ccl_zero);
    }
}
