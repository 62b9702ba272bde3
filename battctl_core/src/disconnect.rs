//! Disconnect fail-safe policy.
//!
//! Decides what to publish when telemetry stops arriving. This is the only
//! component allowed to override the computed limits with a block.

use std::time::{Duration, Instant};

use battctl_traits::Snapshot;

use crate::config::{DisconnectCfg, DisconnectMode};
use crate::state::BatteryState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Telemetry is fresh; publish the computed outputs.
    PassThrough,
    /// Telemetry is missing; keep publishing the last known outputs.
    HoldLastKnown,
    /// CCL and DCL are forced to zero.
    Block,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PassThrough => "pass_through",
            Self::HoldLastKnown => "hold_last_known",
            Self::Block => "block",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DisconnectPolicy {
    cfg: DisconnectCfg,
    poll_interval: Duration,
    blocked: bool,
    holding: bool,
}

impl DisconnectPolicy {
    pub fn new(cfg: DisconnectCfg, poll_interval: Duration) -> Self {
        Self {
            cfg,
            poll_interval,
            blocked: false,
            holding: false,
        }
    }

    pub fn mode(&self) -> DisconnectMode {
        self.cfg.mode
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Record an accepted snapshot. In lenient mode this clears a block.
    pub fn on_fresh(&mut self, state: &mut BatteryState, snap: &Snapshot) {
        state.last_good_snapshot = Some(snap.clone());
        state.last_good_at = Some(snap.at);
        if self.holding {
            tracing::info!("telemetry restored");
            self.holding = false;
        }
        if self.blocked && self.cfg.mode == DisconnectMode::Lenient {
            tracing::info!("fresh telemetry received; block cleared");
            self.blocked = false;
        }
    }

    /// Decide for a cycle at `now` based on telemetry age.
    pub fn evaluate(&mut self, state: &BatteryState, now: Instant) -> Action {
        self.decide(state, now, false)
    }

    /// Decide for a cycle whose poll returned no usable telemetry.
    pub fn on_missed_poll(&mut self, state: &BatteryState, now: Instant) -> Action {
        self.decide(state, now, true)
    }

    fn decide(&mut self, state: &BatteryState, now: Instant, missed: bool) -> Action {
        if self.blocked {
            return Action::Block;
        }
        let Some(last_at) = state.last_good_at else {
            if missed {
                return self.block("no telemetry received yet", Duration::ZERO);
            }
            return Action::PassThrough;
        };
        let age = now.saturating_duration_since(last_at);
        if !missed && age < self.poll_interval {
            return Action::PassThrough;
        }
        match self.cfg.mode {
            DisconnectMode::Strict => self.block("telemetry missed in strict mode", age),
            DisconnectMode::Lenient => {
                let band_ok = state
                    .last_good_snapshot
                    .as_ref()
                    .is_some_and(|s| self.in_safe_band(s));
                let limit = if band_ok { self.cfg.timeout } else { self.cfg.grace };
                if age < limit {
                    if !self.holding {
                        tracing::warn!(
                            band_ok,
                            hold_s = limit.as_secs(),
                            "telemetry missing; holding last known outputs"
                        );
                        self.holding = true;
                    }
                    Action::HoldLastKnown
                } else {
                    self.block("telemetry missing beyond hold limit", age)
                }
            }
        }
    }

    fn in_safe_band(&self, s: &Snapshot) -> bool {
        match (s.min_cell_voltage(), s.max_cell_voltage()) {
            (Some(lo), Some(hi)) => lo > self.cfg.safe_band_min && hi < self.cfg.safe_band_max,
            _ => false,
        }
    }

    fn block(&mut self, reason: &'static str, age: Duration) -> Action {
        tracing::warn!(reason, age_s = age.as_secs_f64(), mode = ?self.cfg.mode, "blocking charge and discharge");
        self.blocked = true;
        self.holding = false;
        Action::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: DisconnectMode) -> DisconnectPolicy {
        DisconnectPolicy::new(
            DisconnectCfg {
                mode,
                ..DisconnectCfg::default()
            },
            Duration::from_secs(1),
        )
    }

    #[test]
    fn fresh_telemetry_passes_through() {
        let t0 = Instant::now();
        let mut p = policy(DisconnectMode::Strict);
        let mut st = BatteryState::new(t0, 50.0);
        p.on_fresh(&mut st, &Snapshot::new(vec![3.3; 4], 0.0, t0));
        assert_eq!(p.evaluate(&st, t0), Action::PassThrough);
    }

    #[test]
    fn age_alone_makes_telemetry_stale() {
        let t0 = Instant::now();
        let mut p = policy(DisconnectMode::Lenient);
        let mut st = BatteryState::new(t0, 50.0);
        p.on_fresh(&mut st, &Snapshot::new(vec![3.3; 4], 0.0, t0));
        assert_eq!(p.evaluate(&st, t0 + Duration::from_millis(999)), Action::PassThrough);
        assert_eq!(p.evaluate(&st, t0 + Duration::from_secs(1)), Action::HoldLastKnown);
    }

    #[test]
    fn missing_first_poll_blocks() {
        let t0 = Instant::now();
        let mut p = policy(DisconnectMode::Lenient);
        let st = BatteryState::new(t0, 50.0);
        assert_eq!(p.on_missed_poll(&st, t0), Action::Block);
    }

    #[test]
    fn lenient_unblocks_on_fresh_strict_does_not() {
        let t0 = Instant::now();
        let late = t0 + Duration::from_secs(3600);
        for (mode, expect) in [
            (DisconnectMode::Lenient, Action::PassThrough),
            (DisconnectMode::Strict, Action::Block),
        ] {
            let mut p = policy(mode);
            let mut st = BatteryState::new(t0, 50.0);
            p.on_fresh(&mut st, &Snapshot::new(vec![3.3; 4], 0.0, t0));
            assert_eq!(p.on_missed_poll(&st, late), Action::Block);
            p.on_fresh(&mut st, &Snapshot::new(vec![3.3; 4], 0.0, late));
            assert_eq!(p.evaluate(&st, late), expect, "{mode:?}");
        }
    }
}
