//! Simulated BMS: a coarse LiFePO4 pack model behind `TelemetrySource`.

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use battctl_traits::{Clock, MonotonicClock, Snapshot, TelemetrySource};

use crate::error::SimError;

/// Open-circuit voltage per cell against SoC (percent).
const OCV_SOC: [f64; 13] = [
    0.0, 5.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 95.0, 100.0,
];
const OCV_VOLTS: [f64; 13] = [
    2.50, 3.00, 3.20, 3.25, 3.28, 3.30, 3.31, 3.32, 3.33, 3.34, 3.36, 3.40, 3.60,
];
const CELL_FLOOR: f64 = 2.50;
const CELL_CEILING: f64 = 3.65;

fn ocv(soc: f64) -> f64 {
    let soc = soc.clamp(0.0, 100.0);
    for i in 1..OCV_SOC.len() {
        if soc <= OCV_SOC[i] {
            let (x0, x1) = (OCV_SOC[i - 1], OCV_SOC[i]);
            let (y0, y1) = (OCV_VOLTS[i - 1], OCV_VOLTS[i]);
            return y0 + (soc - x0) / (x1 - x0) * (y1 - y0);
        }
    }
    OCV_VOLTS[OCV_VOLTS.len() - 1]
}

/// Pack current over time. Positive is charging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurrentProfile {
    Constant(f64),
    /// Charge for the first half of every period, discharge for the second.
    Cycle {
        charge: f64,
        discharge: f64,
        period: Duration,
    },
}

impl CurrentProfile {
    fn at(&self, elapsed: Duration) -> f64 {
        match *self {
            Self::Constant(a) => a,
            Self::Cycle {
                charge,
                discharge,
                period,
            } => {
                if period.is_zero() {
                    return charge;
                }
                let phase = elapsed.as_secs_f64() % period.as_secs_f64();
                if phase < period.as_secs_f64() / 2.0 {
                    charge
                } else {
                    -discharge.abs()
                }
            }
        }
    }
}

/// Simulated BMS over `cells` series cells.
///
/// SoC is coulomb-counted from the profile current on the injected clock.
/// Cell voltages follow the OCV curve plus an IR term and a fixed per-cell
/// imbalance. Charging current tapers to zero at 100 % and discharge stops
/// at 0 %.
pub struct SimulatedBms {
    clock: Arc<dyn Clock + Send + Sync>,
    cells: usize,
    capacity_ah: f64,
    soc: f64,
    profile: CurrentProfile,
    /// Per-cell internal resistance in ohms.
    resistance: f64,
    imbalance: Vec<f64>,
    temperature: Option<f64>,
    report_soc: bool,
    dropouts: Vec<Range<u64>>,
    started: Instant,
    last: Option<Instant>,
    polls: u64,
}

impl std::fmt::Debug for SimulatedBms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBms")
            .field("cells", &self.cells)
            .field("capacity_ah", &self.capacity_ah)
            .field("soc", &self.soc)
            .field("profile", &self.profile)
            .field("polls", &self.polls)
            .finish_non_exhaustive()
    }
}

impl SimulatedBms {
    pub fn new(cells: usize, capacity_ah: f64) -> Self {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
        let started = clock.now();
        Self {
            clock,
            cells,
            capacity_ah,
            soc: 50.0,
            profile: CurrentProfile::Constant(0.0),
            resistance: 0.001,
            imbalance: vec![0.0; cells],
            temperature: Some(25.0),
            report_soc: true,
            dropouts: Vec::new(),
            started,
            last: None,
            polls: 0,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.started = clock.now();
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_soc(mut self, soc: f64) -> Self {
        self.soc = soc.clamp(0.0, 100.0);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: CurrentProfile) -> Self {
        self.profile = profile;
        self
    }

    #[must_use]
    pub fn with_resistance(mut self, ohms: f64) -> Self {
        self.resistance = ohms.max(0.0);
        self
    }

    /// Spread the cells linearly across `spread` volts, lowest first.
    #[must_use]
    pub fn with_imbalance(mut self, spread: f64) -> Self {
        let n = self.cells;
        self.imbalance = (0..n)
            .map(|i| {
                if n < 2 {
                    0.0
                } else {
                    spread * (i as f64 / (n - 1) as f64 - 0.5)
                }
            })
            .collect();
        self
    }

    /// `None` reports no temperature channels at all.
    #[must_use]
    pub fn with_temperature(mut self, celsius: Option<f64>) -> Self {
        self.temperature = celsius;
        self
    }

    /// Leave `Snapshot::soc` empty, as BMSes without a gauge do.
    #[must_use]
    pub fn without_soc_report(mut self) -> Self {
        self.report_soc = false;
        self
    }

    /// Polls whose 0-based index falls in any range fail.
    #[must_use]
    pub fn with_dropouts(mut self, dropouts: Vec<Range<u64>>) -> Self {
        self.dropouts = dropouts;
        self
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    fn current(&self, now: Instant) -> f64 {
        let a = self.profile.at(now.saturating_duration_since(self.started));
        if (a > 0.0 && self.soc >= 100.0) || (a < 0.0 && self.soc <= 0.0) {
            0.0
        } else {
            a
        }
    }

    fn integrate(&mut self, current: f64, now: Instant) {
        if let Some(last) = self.last {
            let hours = now.saturating_duration_since(last).as_secs_f64() / 3600.0;
            if self.capacity_ah > 0.0 {
                self.soc = (self.soc + current * hours / self.capacity_ah * 100.0).clamp(0.0, 100.0);
            }
        }
        self.last = Some(now);
    }

    fn snapshot(&self, current: f64, now: Instant) -> Snapshot {
        let base = ocv(self.soc) + current * self.resistance;
        let cells = self
            .imbalance
            .iter()
            .map(|off| (base + off).clamp(CELL_FLOOR, CELL_CEILING))
            .collect();
        let mut snap = Snapshot::new(cells, current, now).with_fets(true, true);
        if let Some(t) = self.temperature {
            snap = snap
                .with_temperature(0, t)
                .with_temperature(1, t + 0.5)
                .with_mosfet_temperature(t + current.abs() * 0.05);
        }
        if self.report_soc {
            snap = snap.with_soc((self.soc * 10.0).round() / 10.0);
        }
        snap
    }
}

impl TelemetrySource for SimulatedBms {
    fn poll(
        &mut self,
        _timeout: Duration,
    ) -> Result<Snapshot, Box<dyn std::error::Error + Send + Sync>> {
        let poll = self.polls;
        self.polls += 1;
        let now = self.clock.now();
        let current = self.current(now);
        // The pack keeps moving while the link is down.
        self.integrate(current, now);
        if self.dropouts.iter().any(|r| r.contains(&poll)) {
            tracing::debug!(poll, "simulated dropout");
            return Err(Box::new(SimError::Dropout { poll }));
        }
        let snap = self.snapshot(current, now);
        tracing::trace!(poll, soc = self.soc, current, "simulated poll");
        Ok(snap)
    }

    fn cell_count(&self) -> usize {
        self.cells
    }
}
