//! Recalculation cadence shared by the current limiter, the penalty-sum CVL
//! controller and the time-to-SoC predictor.

use std::time::{Duration, Instant};

/// Decides when a freshly computed value may replace the committed one.
///
/// A value is committed when nothing has been committed yet, when `every`
/// has elapsed since the last commit, when it moved by at least
/// `change_percent` of the committed value, or when it is exactly zero.
#[derive(Debug, Clone)]
pub struct Cadence {
    every: Duration,
    change_percent: f64,
    last_at: Option<Instant>,
}

impl Cadence {
    pub fn new(every: Duration, change_percent: f64) -> Self {
        Self {
            every,
            change_percent: change_percent.max(0.0),
            last_at: None,
        }
    }

    /// True when the interval has elapsed (or nothing was committed yet).
    pub fn due(&self, now: Instant) -> bool {
        self.last_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.every)
    }

    pub fn should_commit(&self, now: Instant, committed: f64, candidate: f64) -> bool {
        if self.due(now) || candidate == 0.0 {
            return true;
        }
        (candidate - committed).abs() >= committed.abs() * self.change_percent / 100.0
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_at = Some(now);
    }
}
