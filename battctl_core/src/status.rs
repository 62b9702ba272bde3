//! Values published after every poll cycle.

use std::collections::{BTreeMap, BTreeSet};

use crate::alarms::Alarms;
use crate::disconnect::Action;
use crate::history::History;
use crate::limits::LimitCause;
use crate::state::ChargeMode;

/// What shapes the charge voltage beyond the plain bulk/float mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChargeDetail {
    /// A bulk limiter or its recovery holds the target below nominal.
    pub limited: bool,
    pub cell_overvoltage: bool,
    /// Seconds left before the overvoltage recovery ramp starts.
    pub ovp_hold_s: Option<u64>,
    pub float_transition: bool,
    /// Float was left for bulk this cycle.
    pub returned_to_bulk: bool,
    /// The bulk target is raised for an overdue full-charge reset.
    pub soc_reset: bool,
}

impl ChargeDetail {
    /// Human-readable mode, e.g. "Bulk (Cell OVP) & SoC Reset".
    pub fn label(&self, mode: ChargeMode) -> String {
        let mut s = match mode {
            ChargeMode::Float if self.float_transition => "Float Transition".to_string(),
            ChargeMode::Float => "Float".to_string(),
            ChargeMode::Bulk if self.cell_overvoltage => "Bulk (Cell OVP)".to_string(),
            ChargeMode::Bulk if self.limited => "Bulk (Limited)".to_string(),
            ChargeMode::Bulk => "Bulk".to_string(),
        };
        if self.soc_reset {
            s.push_str(" & SoC Reset");
        }
        s
    }
}

/// Public result of a single control cycle.
///
/// Built in full before it is handed out, so a consumer never sees a mix of
/// two cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs {
    /// Charge voltage limit in volts.
    pub cvl: f64,
    /// Charge current limit in amps.
    pub ccl: f64,
    /// Discharge current limit in amps.
    pub dcl: f64,
    pub soc: f64,
    pub charge_mode: ChargeMode,
    pub charge_detail: ChargeDetail,
    pub charge_causes: BTreeSet<LimitCause>,
    pub discharge_causes: BTreeSet<LimitCause>,
    /// Seconds to each configured SoC target.
    pub time_to_soc: BTreeMap<u8, i64>,
    pub time_to_go: Option<i64>,
    pub action: Action,
    pub blocked: bool,
    pub allow_charge: bool,
    pub allow_discharge: bool,
    pub allow_balancing: bool,
    pub allow_heating: bool,
    pub stale_soc: bool,
    pub soc_reset_overdue: bool,
    pub alarms: Alarms,
    pub history: History,
}

impl Outputs {
    /// Outputs before any telemetry arrived: everything blocked.
    pub fn blocked(cvl: f64, soc: f64) -> Self {
        let blocked = BTreeSet::from([LimitCause::Blocked]);
        Self {
            cvl,
            ccl: 0.0,
            dcl: 0.0,
            soc,
            charge_mode: ChargeMode::Bulk,
            charge_detail: ChargeDetail::default(),
            charge_causes: blocked.clone(),
            discharge_causes: blocked,
            time_to_soc: BTreeMap::new(),
            time_to_go: None,
            action: Action::Block,
            blocked: true,
            allow_charge: false,
            allow_discharge: false,
            allow_balancing: true,
            allow_heating: true,
            stale_soc: false,
            soc_reset_overdue: false,
            alarms: Alarms::default(),
            history: History::default(),
        }
    }

    /// Replace anything non-finite with the safe value and clamp ranges.
    pub fn sanitize(&mut self, fallback_cvl: f64) {
        if !self.cvl.is_finite() {
            tracing::warn!(cvl = self.cvl, fallback_cvl, "non-finite CVL replaced");
            self.cvl = fallback_cvl;
        }
        for (v, cause_set) in [
            (&mut self.ccl, &mut self.charge_causes),
            (&mut self.dcl, &mut self.discharge_causes),
        ] {
            if !v.is_finite() {
                tracing::warn!("non-finite current limit forced to zero");
                *v = 0.0;
                cause_set.insert(LimitCause::Blocked);
            }
            *v = v.max(0.0);
        }
        self.soc = if self.soc.is_finite() {
            self.soc.clamp(0.0, 100.0)
        } else {
            0.0
        };
    }
}
