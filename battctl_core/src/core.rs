//! The per-battery control loop (`BatteryCore`).
//!
//! One call to `step` is one poll cycle: drain operator commands, poll the
//! telemetry source, run SoC estimation, current limiting and the CVL state
//! machine, then let the disconnect policy decide what is published.

use std::sync::Arc;
use std::time::Instant;

use battctl_traits::{Clock, Snapshot, TelemetrySource};

use crate::alarms::AlarmMonitor;
use crate::commands::{Command, CommandQueue, CommandSender, Overrides};
use crate::config::CoreConfig;
use crate::cvl::{CvlController, CvlOutput};
use crate::disconnect::{Action, DisconnectPolicy};
use crate::error::CoreError;
use crate::history::HistoryTracker;
use crate::limits::{CurrentLimiter, LimitCause, Limits};
use crate::soc::SocEstimator;
use crate::state::BatteryState;
use crate::status::{ChargeDetail, Outputs};
use crate::time_to_soc::TimeToSocPredictor;
use crate::util::secs_between;

/// Largest pack current accepted as plausible, in amps.
pub const MAX_PLAUSIBLE_CURRENT: f64 = 1000.0;

pub struct BatteryCore<S: TelemetrySource> {
    pub(crate) source: S,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) cfg: CoreConfig,
    pub(crate) state: BatteryState,
    pub(crate) soc: SocEstimator,
    pub(crate) limiter: CurrentLimiter,
    pub(crate) cvl: CvlController,
    pub(crate) disconnect: DisconnectPolicy,
    pub(crate) predictor: TimeToSocPredictor,
    pub(crate) alarms: AlarmMonitor,
    pub(crate) history: HistoryTracker,
    pub(crate) commands: CommandQueue,
    pub(crate) overrides: Overrides,
    pub(crate) last: Option<Outputs>,
    pub(crate) cycles: u64,
}

impl<S: TelemetrySource> std::fmt::Debug for BatteryCore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatteryCore")
            .field("cell_count", &self.cfg.cell_count)
            .field("soc", &self.state.soc)
            .field("charge_mode", &self.state.charge_mode)
            .field("blocked", &self.disconnect.is_blocked())
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}

impl<S: TelemetrySource> BatteryCore<S> {
    pub(crate) fn new(
        source: S,
        cfg: CoreConfig,
        clock: Arc<dyn Clock + Send + Sync>,
        commands: CommandQueue,
    ) -> Self {
        let now = clock.now();
        let state = BatteryState::new(now, cfg.soc.initial);
        let soc = SocEstimator::new(cfg.soc.clone(), cfg.cell.min_voltage);
        let limiter = CurrentLimiter::new(cfg.current.clone());
        let cvl = CvlController::new(cfg.cvl.clone(), cfg.cell.clone(), cfg.cell_count);
        let disconnect = DisconnectPolicy::new(cfg.disconnect.clone(), cfg.poll_interval);
        let predictor = TimeToSocPredictor::new(cfg.time_to_soc.clone(), cfg.soc.capacity_ah);
        let alarms = AlarmMonitor::new(cfg.alarms.clone(), cfg.cell_count);
        let history = HistoryTracker::new(cfg.soc.capacity_ah);
        Self {
            source,
            clock,
            cfg,
            state,
            soc,
            limiter,
            cvl,
            disconnect,
            predictor,
            alarms,
            history,
            commands,
            overrides: Overrides::default(),
            last: None,
            cycles: 0,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn state(&self) -> &BatteryState {
        &self.state
    }

    /// Outputs of the most recent cycle.
    pub fn outputs(&self) -> Option<&Outputs> {
        self.last.as_ref()
    }

    /// Handle for submitting commands from other threads.
    pub fn commands(&self) -> CommandSender {
        self.commands.sender()
    }

    pub fn overrides(&self) -> Overrides {
        self.overrides
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    /// One poll cycle that reads the source internally. A poll error counts
    /// as a missed poll.
    pub fn step(&mut self) -> Outputs {
        match self.source.poll(self.cfg.poll_interval) {
            Ok(snap) => self.step_from_snapshot(snap),
            Err(e) => {
                tracing::warn!(error = %e, "telemetry poll failed");
                self.step_missed()
            }
        }
    }

    /// One poll cycle with a snapshot obtained elsewhere (sampler thread,
    /// replay). Invalid snapshots are treated as missed polls.
    pub fn step_from_snapshot(&mut self, snap: Snapshot) -> Outputs {
        let now = self.clock.now();
        self.cycles += 1;
        self.apply_commands();

        if let Err(e) = self.validate(&snap) {
            tracing::warn!(error = %e, "snapshot rejected");
            return self.missed(now);
        }
        let snap = self.correct(snap);
        let dt = self
            .state
            .last_good_at
            .map_or(0.0, |prev| secs_between(prev, snap.at));
        self.disconnect.on_fresh(&mut self.state, &snap);

        let soc = self.soc.update(&mut self.state, &snap, dt);
        let overdue = self.soc.track_full_charge(&mut self.state, &snap);
        let bulk_override = self.soc.bulk_cell_override(overdue);

        let mut raw = self.limiter.evaluate(&snap, self.state.soc);
        let cvl = self.cvl.step(&mut self.state, &snap, bulk_override, now);
        if cvl.force_ccl_zero {
            raw.charge.force_zero(LimitCause::CellOvervoltage);
        }
        let limits = self.limiter.commit(&mut self.state, raw, now);
        if cvl.entered_float {
            self.soc.on_float_entered(&mut self.state);
        }
        self.predictor.observe(snap.current, self.state.soc, now);
        let alarms = self.alarms.evaluate(&snap, self.state.soc);
        self.history.update(&snap, self.state.soc, dt, &alarms);

        let action = self.disconnect.evaluate(&self.state, now);
        tracing::trace!(
            cvl = cvl.cvl,
            ccl = limits.ccl,
            dcl = limits.dcl,
            soc = self.state.soc,
            mode = %self.state.charge_mode,
            action = action.as_str(),
            "cycle"
        );
        let detail = ChargeDetail {
            limited: cvl.limiting,
            cell_overvoltage: cvl.overvoltage,
            ovp_hold_s: self.cvl.ovp_hold_remaining(now).map(|d| d.as_secs()),
            float_transition: cvl.float_transition,
            returned_to_bulk: cvl.returned_to_bulk,
            soc_reset: bulk_override.is_some(),
        };
        let computed = self.assemble(&cvl, detail, limits, action, soc.stale, overdue);
        self.publish(computed, now)
    }

    /// One poll cycle in which no telemetry arrived.
    pub fn step_missed(&mut self) -> Outputs {
        let now = self.clock.now();
        self.cycles += 1;
        self.apply_commands();
        self.missed(now)
    }

    fn missed(&mut self, now: Instant) -> Outputs {
        let action = self.disconnect.on_missed_poll(&self.state, now);
        match (action, self.last.clone()) {
            (Action::Block, _) | (_, None) => self.finish(self.blocked_outputs()),
            (_, Some(mut last)) => {
                last.action = Action::HoldLastKnown;
                last.soc = self.state.soc;
                self.apply_overrides(&mut last);
                self.finish(last)
            }
        }
    }

    fn publish(&mut self, computed: Outputs, now: Instant) -> Outputs {
        match computed.action {
            Action::PassThrough => self.finish(computed),
            Action::HoldLastKnown => match self.last.clone() {
                Some(mut last) => {
                    last.action = Action::HoldLastKnown;
                    self.apply_overrides(&mut last);
                    self.finish(last)
                }
                None => self.missed(now),
            },
            Action::Block => self.finish(self.blocked_outputs()),
        }
    }

    fn finish(&mut self, mut out: Outputs) -> Outputs {
        out.sanitize(self.cvl.publish(self.cvl.float_voltage()));
        self.last = Some(out.clone());
        out
    }

    fn assemble(
        &self,
        cvl: &CvlOutput,
        charge_detail: ChargeDetail,
        limits: Limits,
        action: Action,
        stale_soc: bool,
        soc_reset_overdue: bool,
    ) -> Outputs {
        let mut out = Outputs {
            cvl: cvl.cvl,
            ccl: limits.ccl,
            dcl: limits.dcl,
            soc: self.state.soc,
            charge_mode: cvl.mode,
            charge_detail,
            charge_causes: limits.charge_causes,
            discharge_causes: limits.discharge_causes,
            time_to_soc: self.predictor.predictions().clone(),
            time_to_go: self.predictor.time_to_go(),
            action,
            blocked: false,
            allow_charge: true,
            allow_discharge: true,
            allow_balancing: true,
            allow_heating: true,
            stale_soc,
            soc_reset_overdue,
            alarms: self.alarms.current(),
            history: self.history.history().clone(),
        };
        self.apply_overrides(&mut out);
        out
    }

    /// Block: zero current, CVL at the last committed target or float.
    fn blocked_outputs(&self) -> Outputs {
        let target = self
            .cvl
            .last_target()
            .unwrap_or_else(|| self.cvl.float_voltage());
        let mut out = Outputs::blocked(self.cvl.publish(target), self.state.soc);
        out.charge_mode = self.state.charge_mode;
        out.alarms = self.alarms.current();
        out.history = self.history.history().clone();
        if let Some(last) = &self.last {
            out.stale_soc = last.stale_soc;
            out.soc_reset_overdue = last.soc_reset_overdue;
        }
        self.apply_overrides(&mut out);
        out
    }

    /// Force-off toggles only ever clear `allow_*` flags.
    fn apply_overrides(&self, out: &mut Outputs) {
        let blocked = out.action == Action::Block;
        out.blocked = blocked;
        out.allow_charge = !blocked && out.ccl > 0.0 && !self.overrides.charge_off;
        out.allow_discharge = !blocked && out.dcl > 0.0 && !self.overrides.discharge_off;
        out.allow_balancing = !self.overrides.balancing_off;
        out.allow_heating = !self.overrides.heating_off;
    }

    fn apply_commands(&mut self) {
        for cmd in self.commands.drain() {
            tracing::debug!(?cmd, "command received");
            match cmd {
                Command::ResetSoc(v) => self.soc.reset_to(&mut self.state, v),
                Command::ClearHistory => self.history.clear(),
                _ => {
                    self.overrides.apply(cmd);
                }
            }
        }
    }

    fn correct(&self, mut snap: Snapshot) -> Snapshot {
        if let Some(corr) = &self.cfg.soc.correction {
            snap.current = corr.apply(snap.current);
        }
        snap
    }

    /// Reject snapshots the control path must not see.
    pub fn validate(&self, snap: &Snapshot) -> Result<(), CoreError> {
        if snap.cell_count() != self.cfg.cell_count {
            return Err(CoreError::InvalidSnapshot(format!(
                "expected {} cells, got {}",
                self.cfg.cell_count,
                snap.cell_count()
            )));
        }
        if let Some(v) = snap.cell_voltages.iter().find(|v| !v.is_finite()) {
            return Err(CoreError::InvalidSnapshot(format!(
                "non-finite cell voltage {v}"
            )));
        }
        if !snap.current.is_finite() || snap.current.abs() > MAX_PLAUSIBLE_CURRENT {
            return Err(CoreError::InvalidSnapshot(format!(
                "implausible current {}",
                snap.current
            )));
        }
        let bad_temp = snap
            .temperatures
            .iter()
            .flatten()
            .chain(snap.mosfet_temperature.iter())
            .find(|t| !t.is_finite());
        if let Some(t) = bad_temp {
            return Err(CoreError::InvalidSnapshot(format!(
                "non-finite temperature {t}"
            )));
        }
        // Out-of-range SoC is clamped by the estimator.
        if let Some(soc) = snap.soc.filter(|v| !v.is_finite()) {
            return Err(CoreError::InvalidSnapshot(format!("non-finite SoC {soc}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisconnectMode;
    use crate::mocks::ScriptedSource;
    use battctl_traits::clock::test_clock::TestClock;
    use std::time::Duration;

    fn core_with(cfg: CoreConfig, clock: &TestClock) -> BatteryCore<ScriptedSource> {
        BatteryCore::new(
            ScriptedSource::new(cfg.cell_count),
            cfg,
            Arc::new(clock.clone()),
            CommandQueue::new(),
        )
    }

    #[test]
    fn rejects_wrong_cell_count_and_bad_values() {
        let clock = TestClock::new();
        let core = core_with(CoreConfig::for_cells(4), &clock);
        let now = clock.now();
        assert!(core.validate(&Snapshot::new(vec![3.3; 3], 0.0, now)).is_err());
        assert!(core
            .validate(&Snapshot::new(vec![3.3, f64::NAN, 3.3, 3.3], 0.0, now))
            .is_err());
        assert!(core.validate(&Snapshot::new(vec![3.3; 4], 1500.0, now)).is_err());
        assert!(core
            .validate(&Snapshot::new(vec![3.3; 4], 0.0, now).with_soc(f64::NAN))
            .is_err());
        assert!(core
            .validate(&Snapshot::new(vec![3.3; 4], 0.0, now).with_soc(101.0))
            .is_ok());
        assert!(core
            .validate(&Snapshot::new(vec![3.3; 4], 0.0, now).with_temperature(1, f64::INFINITY))
            .is_err());
        assert!(core.validate(&Snapshot::new(vec![3.3; 4], -999.0, now)).is_ok());
    }

    #[test]
    fn invalid_snapshot_counts_as_missed_poll() {
        let clock = TestClock::new();
        let mut cfg = CoreConfig::for_cells(4);
        cfg.disconnect.mode = DisconnectMode::Strict;
        let mut core = core_with(cfg, &clock);
        let out = core.step_from_snapshot(Snapshot::new(vec![3.3; 4], 5.0, clock.now()));
        assert_eq!(out.action, Action::PassThrough);
        clock.advance(Duration::from_secs(1));
        let out = core.step_from_snapshot(Snapshot::new(vec![3.3; 4], f64::NAN, clock.now()));
        assert_eq!(out.action, Action::Block);
        assert_eq!(out.ccl, 0.0);
        assert_eq!(out.dcl, 0.0);
    }

    #[test]
    fn force_off_clears_allow_flag_but_keeps_limit() {
        let clock = TestClock::new();
        let mut core = core_with(CoreConfig::for_cells(4), &clock);
        core.commands().send(Command::ForceChargeOff(true)).unwrap();
        let out = core.step_from_snapshot(Snapshot::new(vec![3.3; 4], 5.0, clock.now()));
        assert!(!out.allow_charge);
        assert!(out.allow_discharge);
        assert!((out.ccl - 50.0).abs() < 1e-9);
    }

    #[test]
    fn reset_soc_command_applies_before_the_cycle() {
        let clock = TestClock::new();
        let mut cfg = CoreConfig::for_cells(4);
        cfg.soc.source = crate::config::SocSource::Integrate;
        cfg.soc.capacity_ah = Some(100.0);
        let mut core = core_with(cfg, &clock);
        core.commands().send(Command::ResetSoc(42.0)).unwrap();
        let out = core.step_from_snapshot(Snapshot::new(vec![3.3; 4], 0.0, clock.now()));
        assert!((out.soc - 42.0).abs() < 1e-9);
    }
}
