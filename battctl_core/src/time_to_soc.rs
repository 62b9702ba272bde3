//! Time-to-SoC and time-to-go estimates from a moving-average current.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use crate::cadence::Cadence;
use crate::config::TimeToSocCfg;

/// Average current magnitude below which no estimate is published.
const MIN_AVERAGE_CURRENT: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct TimeToSocPredictor {
    cfg: TimeToSocCfg,
    capacity_ah: Option<f64>,
    window: VecDeque<f64>,
    cadence: Cadence,
    last_soc: Option<f64>,
    crossed: BTreeMap<u8, Instant>,
    predictions: BTreeMap<u8, i64>,
    time_to_go: Option<i64>,
}

impl TimeToSocPredictor {
    pub fn new(cfg: TimeToSocCfg, capacity_ah: Option<f64>) -> Self {
        let cadence = Cadence::new(cfg.recalculate_every, 0.0);
        Self {
            window: VecDeque::with_capacity(cfg.average_window.max(1)),
            cfg,
            capacity_ah: capacity_ah.filter(|c| c.is_finite() && *c > 0.0),
            cadence,
            last_soc: None,
            crossed: BTreeMap::new(),
            predictions: BTreeMap::new(),
            time_to_go: None,
        }
    }

    pub fn average_current(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.window.len() as f64;
        Some(self.window.iter().sum::<f64>() / n)
    }

    /// Feed one sample. Returns true when the estimates were recomputed.
    pub fn observe(&mut self, current: f64, soc: f64, now: Instant) -> bool {
        if current.is_finite() {
            if self.window.len() >= self.cfg.average_window.max(1) {
                self.window.pop_front();
            }
            self.window.push_back(current);
        }
        self.record_crossings(soc, now);

        if !self.cadence.due(now) {
            return false;
        }
        self.cadence.mark(now);
        self.recompute(soc, now);
        true
    }

    fn record_crossings(&mut self, soc: f64, now: Instant) {
        if let Some(prev) = self.last_soc {
            for &target in &self.cfg.points {
                let t = f64::from(target);
                let up = prev < t && soc >= t;
                let down = prev > t && soc <= t;
                if up || down {
                    self.crossed.insert(target, now);
                }
            }
        }
        self.last_soc = Some(soc);
    }

    fn recompute(&mut self, soc: f64, now: Instant) {
        self.predictions.clear();
        self.time_to_go = None;
        let (Some(capacity), Some(avg)) = (self.capacity_ah, self.average_current()) else {
            return;
        };
        if avg.abs() <= MIN_AVERAGE_CURRENT {
            return;
        }
        let percent_per_second = avg.abs() / (capacity / 100.0) / 3600.0;
        let charging = avg > 0.0;

        for &target in &self.cfg.points {
            let t = f64::from(target);
            let remaining = if charging { t - soc } else { soc - t };
            if remaining > 0.0 {
                self.predictions
                    .insert(target, seconds(remaining / percent_per_second));
            } else if self.cfg.report_passed
                && let Some(at) = self.crossed.get(&target)
            {
                let elapsed = now.saturating_duration_since(*at).as_secs_f64();
                self.predictions.insert(target, -seconds(elapsed));
            }
        }

        let goal = if charging { 100.0 } else { self.cfg.low_soc };
        let remaining = if charging { goal - soc } else { soc - goal };
        if remaining > 0.0 {
            self.time_to_go = Some(seconds(remaining / percent_per_second));
        }
        tracing::trace!(avg_current = avg, predictions = ?self.predictions, time_to_go = ?self.time_to_go, "time-to-soc recomputed");
    }

    /// Seconds to each target, negative for targets already passed.
    pub fn predictions(&self) -> &BTreeMap<u8, i64> {
        &self.predictions
    }

    /// Seconds until full (charging) or the low SoC (discharging).
    pub fn time_to_go(&self) -> Option<i64> {
        self.time_to_go
    }
}

#[allow(clippy::cast_possible_truncation)]
fn seconds(v: f64) -> i64 {
    if v.is_finite() { v.round() as i64 } else { 0 }
}
