//! Test and helper sources for battctl_core

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use battctl_traits::{Clock, Snapshot, TelemetrySource};

/// A source that never produces telemetry; useful when driving the control
/// loop with externally sampled snapshots via `step_from_snapshot`.
#[derive(Debug, Clone, Copy)]
pub struct SilentSource {
    cell_count: usize,
}

impl SilentSource {
    pub fn new(cell_count: usize) -> Self {
        Self { cell_count }
    }
}

impl TelemetrySource for SilentSource {
    fn poll(&mut self, _timeout: Duration) -> Result<Snapshot, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("silent source")))
    }

    fn cell_count(&self) -> usize {
        self.cell_count
    }
}

/// Plays back a queue of snapshots and gaps. With a clock attached every
/// snapshot is re-stamped with the clock's time when polled. Once the
/// script runs out every poll fails.
pub struct ScriptedSource {
    cell_count: usize,
    script: VecDeque<Option<Snapshot>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl std::fmt::Debug for ScriptedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSource")
            .field("cell_count", &self.cell_count)
            .field("remaining", &self.script.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedSource {
    pub fn new(cell_count: usize) -> Self {
        Self {
            cell_count,
            script: VecDeque::new(),
            clock: None,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn push(&mut self, snap: Snapshot) {
        self.script.push_back(Some(snap));
    }

    /// Queue `n` failed polls.
    pub fn push_gap(&mut self, n: usize) {
        self.script.extend(std::iter::repeat_n(None, n));
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl TelemetrySource for ScriptedSource {
    fn poll(&mut self, _timeout: Duration) -> Result<Snapshot, Box<dyn std::error::Error + Send + Sync>> {
        match self.script.pop_front() {
            Some(Some(mut snap)) => {
                if let Some(clock) = &self.clock {
                    snap.at = clock.now();
                }
                Ok(snap)
            }
            Some(None) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "scripted gap",
            ))),
            None => Err(Box::new(std::io::Error::other("script exhausted"))),
        }
    }

    fn cell_count(&self) -> usize {
        self.cell_count
    }
}
