//! Charge and discharge current limiting (CCL/DCL).
//!
//! Evaluation runs every enabled curve against every cell and every present
//! temperature channel and keeps the worst case. Commit applies recovery
//! hysteresis and the recalculation cadence.

use std::collections::BTreeSet;
use std::time::Instant;

use battctl_traits::Snapshot;

use crate::cadence::Cadence;
use crate::config::{CurrentCfg, DirectionCurves};
use crate::curve::{ControlCurve, CurveMode};
use crate::state::BatteryState;

/// Why a current limit is below its configured maximum.
///
/// Declaration order is the reporting order when several causes produce the
/// same minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LimitCause {
    CellVoltage,
    Temperature,
    MosfetTemperature,
    Soc,
    BmsSettings,
    BmsFet,
    CellOvervoltage,
    /// Held at zero by recovery hysteresis.
    Recovery,
    /// Zeroed by the disconnect policy.
    Blocked,
}

impl LimitCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CellVoltage => "cell_voltage",
            Self::Temperature => "temperature",
            Self::MosfetTemperature => "mosfet_temperature",
            Self::Soc => "soc",
            Self::BmsSettings => "bms_settings",
            Self::BmsFet => "bms_fet",
            Self::CellOvervoltage => "cell_overvoltage",
            Self::Recovery => "recovery",
            Self::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Charge,
    Discharge,
}

/// A limit and the causes holding it below the configured maximum.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Limit {
    pub current: f64,
    pub causes: BTreeSet<LimitCause>,
}

impl Limit {
    /// Drive the limit to zero for `cause`, replacing any softer causes.
    pub fn force_zero(&mut self, cause: LimitCause) {
        if self.current > 0.0 {
            self.causes.clear();
        }
        self.current = 0.0;
        self.causes.insert(cause);
    }
}

/// Uncommitted worst-case limits for both directions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawLimits {
    pub charge: Limit,
    pub discharge: Limit,
}

/// Committed limits after hysteresis and cadence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Limits {
    pub ccl: f64,
    pub dcl: f64,
    pub charge_causes: BTreeSet<LimitCause>,
    pub discharge_causes: BTreeSet<LimitCause>,
}

#[derive(Debug, Clone)]
struct Committed {
    cadence: Cadence,
    value: Option<Limit>,
}

#[derive(Debug, Clone)]
pub struct CurrentLimiter {
    cfg: CurrentCfg,
    charge: Committed,
    discharge: Committed,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Candidate current from one curve over a set of readings. Returns `None`
/// when the curve is disabled or no reading is present.
fn worst_of(
    curve: Option<&ControlCurve>,
    readings: impl Iterator<Item = f64>,
    mode: CurveMode,
) -> Option<f64> {
    let curve = curve?;
    readings.map(|v| curve.fraction(v, mode)).reduce(f64::min)
}

impl CurrentLimiter {
    pub fn new(cfg: CurrentCfg) -> Self {
        let cadence = Cadence::new(cfg.recalculate_every, cfg.change_percent);
        Self {
            charge: Committed {
                cadence: cadence.clone(),
                value: None,
            },
            discharge: Committed {
                cadence,
                value: None,
            },
            cfg,
        }
    }

    pub fn cfg(&self) -> &CurrentCfg {
        &self.cfg
    }

    /// Worst-case limits for this snapshot, before hysteresis and cadence.
    pub fn evaluate(&self, snap: &Snapshot, soc: f64) -> RawLimits {
        RawLimits {
            charge: self.evaluate_direction(Direction::Charge, snap, soc),
            discharge: self.evaluate_direction(Direction::Discharge, snap, soc),
        }
    }

    fn evaluate_direction(&self, dir: Direction, snap: &Snapshot, soc: f64) -> Limit {
        let (max, curves, bms_cap, fet): (f64, &DirectionCurves, Option<f64>, Option<bool>) =
            match dir {
                Direction::Charge => (
                    self.cfg.max_charge,
                    &self.cfg.charge,
                    snap.bms_max_charge_current,
                    snap.charge_fet,
                ),
                Direction::Discharge => (
                    self.cfg.max_discharge,
                    &self.cfg.discharge,
                    snap.bms_max_discharge_current,
                    snap.discharge_fet,
                ),
            };
        let max = max.max(0.0);
        let mode = self.cfg.mode;

        let mut candidates: Vec<(f64, LimitCause)> = Vec::with_capacity(6);
        let fractions = [
            (
                worst_of(
                    curves.cell_voltage.as_ref(),
                    snap.cell_voltages.iter().copied(),
                    mode,
                ),
                LimitCause::CellVoltage,
            ),
            (
                worst_of(curves.temperature.as_ref(), snap.present_temperatures(), mode),
                LimitCause::Temperature,
            ),
            (
                worst_of(
                    curves.mosfet_temperature.as_ref(),
                    snap.mosfet_temperature.into_iter(),
                    mode,
                ),
                LimitCause::MosfetTemperature,
            ),
            (
                worst_of(curves.soc.as_ref(), std::iter::once(soc), mode),
                LimitCause::Soc,
            ),
        ];
        for (fraction, cause) in fractions {
            if let Some(f) = fraction {
                candidates.push((round3(f * max), cause));
            }
        }
        if let Some(cap) = bms_cap.filter(|c| c.is_finite() && *c < max) {
            candidates.push((round3(cap.max(0.0)), LimitCause::BmsSettings));
        }
        if fet == Some(false) {
            candidates.push((0.0, LimitCause::BmsFet));
        }

        let current = candidates
            .iter()
            .map(|(c, _)| *c)
            .fold(max, f64::min)
            .clamp(0.0, max);
        let causes = if current < max {
            candidates
                .iter()
                .filter(|(c, _)| *c <= current)
                .map(|(_, cause)| *cause)
                .collect()
        } else {
            BTreeSet::new()
        };
        Limit { current, causes }
    }

    /// Apply recovery hysteresis and cadence, updating the zero timestamps in
    /// `state`, and return the committed limits.
    pub fn commit(&mut self, state: &mut BatteryState, raw: RawLimits, now: Instant) -> Limits {
        let charge_threshold = self.cfg.max_charge * self.cfg.charge_recovery_percent / 100.0;
        let discharge_threshold =
            self.cfg.max_discharge * self.cfg.discharge_recovery_percent / 100.0;
        let charge = commit_direction(
            &mut self.charge,
            &mut state.ccl_zero_since,
            raw.charge,
            charge_threshold,
            now,
        );
        let discharge = commit_direction(
            &mut self.discharge,
            &mut state.dcl_zero_since,
            raw.discharge,
            discharge_threshold,
            now,
        );
        Limits {
            ccl: charge.current,
            dcl: discharge.current,
            charge_causes: charge.causes,
            discharge_causes: discharge.causes,
        }
    }

    /// Evaluate and commit in one call.
    pub fn compute(&mut self, state: &mut BatteryState, snap: &Snapshot, now: Instant) -> Limits {
        let raw = self.evaluate(snap, state.soc);
        self.commit(state, raw, now)
    }
}

fn commit_direction(
    slot: &mut Committed,
    zero_since: &mut Option<Instant>,
    mut candidate: Limit,
    recovery_threshold: f64,
    now: Instant,
) -> Limit {
    let held_at_zero = zero_since.is_some();
    if held_at_zero && candidate.current > 0.0 && candidate.current <= recovery_threshold {
        tracing::trace!(
            would_be = candidate.current,
            threshold = recovery_threshold,
            "limit held at zero until recovery threshold is exceeded"
        );
        candidate.current = 0.0;
        candidate.causes.insert(LimitCause::Recovery);
    }

    let accept = match &slot.value {
        None => true,
        Some(prev) => {
            candidate.current < prev.current
                || slot
                    .cadence
                    .should_commit(now, prev.current, candidate.current)
        }
    };
    if accept {
        if slot
            .value
            .as_ref()
            .is_none_or(|p| (p.current - candidate.current).abs() > f64::EPSILON)
        {
            slot.cadence.mark(now);
        }
        slot.value = Some(candidate);
    }

    let committed = slot.value.clone().unwrap_or_default();
    if committed.current == 0.0 {
        if zero_since.is_none() {
            tracing::debug!(causes = ?committed.causes, "current limit driven to zero");
        }
        zero_since.get_or_insert(now);
    } else {
        *zero_since = None;
    }
    committed
}
