use crate::builder::build_core;
use crate::commands::CommandQueue;
use crate::config::CoreConfig;
use crate::core::BatteryCore;
use crate::disconnect::Action;
use crate::error::Result as CoreResult;
use crate::mocks::SilentSource;
use crate::sampler::Sampler;
use crate::status::Outputs;
use battctl_traits::{Clock, TelemetrySource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How telemetry should be obtained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SamplingMode {
    /// Poll inside the control loop using `TelemetrySource::poll(timeout)`
    #[default]
    Direct,
    /// Poll on a dedicated sampler thread; the loop takes the newest snapshot
    Sampled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub mode: SamplingMode,
    /// Stop after this many cycles. `None` runs until shutdown.
    pub max_polls: Option<u64>,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub held_cycles: u64,
    pub blocked_cycles: u64,
}

impl RunSummary {
    fn record(&mut self, out: &Outputs) {
        self.cycles += 1;
        match out.action {
            Action::PassThrough => {}
            Action::HoldLastKnown => self.held_cycles += 1,
            Action::Block => self.blocked_cycles += 1,
        }
    }
}

/// Drive a core from `source` until `shutdown` is set or the poll budget is
/// spent, handing every cycle's outputs to `on_outputs`.
pub fn run<S, F>(
    source: S,
    cfg: CoreConfig,
    clock: Arc<dyn Clock + Send + Sync>,
    commands: Option<CommandQueue>,
    opts: RunOptions,
    shutdown: &AtomicBool,
    on_outputs: F,
) -> CoreResult<RunSummary>
where
    S: TelemetrySource + Send + 'static,
    F: FnMut(&Outputs),
{
    match opts.mode {
        SamplingMode::Direct => {
            let core = build_core(source, cfg, Some(clock), commands)?;
            tracing::info!(cells = core.config().cell_count, mode = "direct", "control loop start");
            Ok(drive(core, opts.max_polls, true, shutdown, on_outputs, BatteryCore::step))
        }
        SamplingMode::Sampled => {
            // The core never polls; it only receives snapshots from the sampler.
            let core = build_core(
                SilentSource::new(source.cell_count()),
                cfg,
                Some(clock.clone()),
                commands,
            )?;
            let period = core.config().poll_interval;
            let sampler = Sampler::spawn(source, period, period, clock);
            tracing::info!(cells = core.config().cell_count, mode = "sampler", "control loop start");
            // The sampler paces the loop: each cycle waits up to one interval
            // for the next snapshot and only a timeout counts as a missed poll.
            let summary = drive(core, opts.max_polls, false, shutdown, on_outputs, |core| {
                match sampler.wait_latest(period) {
                    Some(snap) => core.step_from_snapshot(snap),
                    None => core.step_missed(),
                }
            });
            tracing::debug!(failed_polls = sampler.failures(), "sampler stopped");
            Ok(summary)
        }
    }
}

fn drive<S, F, G>(
    mut core: BatteryCore<S>,
    max_polls: Option<u64>,
    paced: bool,
    shutdown: &AtomicBool,
    mut on_outputs: F,
    mut cycle: G,
) -> RunSummary
where
    S: TelemetrySource,
    F: FnMut(&Outputs),
    G: FnMut(&mut BatteryCore<S>) -> Outputs,
{
    let mut summary = RunSummary::default();
    let clock = core.clock().clone();
    let period = core.config().poll_interval;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            break;
        }
        if max_polls.is_some_and(|n| summary.cycles >= n) {
            break;
        }
        let started = clock.now();
        let out = cycle(&mut core);
        summary.record(&out);
        on_outputs(&out);
        if paced {
            let spent = clock.now().saturating_duration_since(started);
            clock.sleep(period.saturating_sub(spent));
        }
    }
    tracing::info!(
        cycles = summary.cycles,
        held = summary.held_cycles,
        blocked = summary.blocked_cycles,
        "control loop stopped"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedSource;
    use battctl_traits::Snapshot;
    use battctl_traits::clock::test_clock::TestClock;

    #[test]
    fn direct_mode_stops_at_poll_budget() {
        let clock = TestClock::new();
        let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
        let mut src = ScriptedSource::new(4).with_clock(shared.clone());
        for _ in 0..10 {
            src.push(Snapshot::new(vec![3.3; 4], 1.0, clock.now()));
        }
        let stop = AtomicBool::new(false);
        let mut seen = 0;
        let summary = run(
            src,
            CoreConfig::for_cells(4),
            shared,
            None,
            RunOptions {
                mode: SamplingMode::Direct,
                max_polls: Some(5),
            },
            &stop,
            |_| seen += 1,
        )
        .unwrap();
        assert_eq!(summary.cycles, 5);
        assert_eq!(seen, 5);
        assert_eq!(summary.blocked_cycles, 0);
    }

    #[test]
    fn shutdown_flag_stops_before_first_cycle() {
        let stop = AtomicBool::new(true);
        let summary = run(
            ScriptedSource::new(4),
            CoreConfig::for_cells(4),
            Arc::new(TestClock::new()),
            None,
            RunOptions::default(),
            &stop,
            |_| {},
        )
        .unwrap();
        assert_eq!(summary.cycles, 0);
    }

    #[test]
    fn cell_count_mismatch_fails_to_start() {
        let stop = AtomicBool::new(false);
        let err = run(
            ScriptedSource::new(3),
            CoreConfig::for_cells(4),
            Arc::new(TestClock::new()),
            None,
            RunOptions::default(),
            &stop,
            |_| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("cell count mismatch"));
    }
}
