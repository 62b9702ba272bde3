use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use battctl_core::mocks::ScriptedSource;
use battctl_core::runner::run;
use battctl_core::{
    Action, Battery, Command, CommandQueue, CoreConfig, DisconnectMode, Outputs, RunOptions,
    SamplingMode,
};
use battctl_traits::clock::test_clock::TestClock;
use battctl_traits::{Clock, MonotonicClock, Snapshot};
use rstest::rstest;

fn scripted(gaps: usize, polls: usize, clock: &Arc<dyn Clock + Send + Sync>) -> ScriptedSource {
    let mut src = ScriptedSource::new(4).with_clock(clock.clone());
    for _ in 0..polls {
        src.push(Snapshot::new(vec![3.3; 4], 5.0, Instant::now()).with_soc(60.0));
    }
    src.push_gap(gaps);
    src
}

#[test]
fn direct_run_holds_then_blocks_when_script_ends() {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(TestClock::new());
    let mut cfg = CoreConfig::for_cells(4);
    cfg.disconnect.grace = Duration::from_secs(5);
    // Cells 3.3 are inside the band, so the long timeout applies.
    cfg.disconnect.timeout = Duration::from_secs(10);
    let stop = AtomicBool::new(false);
    let mut actions = Vec::new();
    let summary = run(
        scripted(20, 3, &clock),
        cfg,
        clock,
        None,
        RunOptions {
            mode: SamplingMode::Direct,
            max_polls: Some(20),
        },
        &stop,
        |o: &Outputs| actions.push(o.action),
    )
    .unwrap();

    assert_eq!(summary.cycles, 20);
    assert_eq!(&actions[..3], &[Action::PassThrough; 3]);
    // Last good poll at t=2; holds while age < 10 s, i.e. t=3..=11.
    assert_eq!(summary.held_cycles, 9);
    assert_eq!(summary.blocked_cycles, 8);
    assert_eq!(*actions.last().unwrap(), Action::Block);
}

#[test]
fn commands_from_another_thread_reach_the_loop() {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(TestClock::new());
    let queue = CommandQueue::new();
    let tx = queue.sender();
    tx.send(Command::ForceDischargeOff(true)).unwrap();
    std::thread::spawn(move || tx.send(Command::ForceBalancingOff(true)))
        .join()
        .unwrap()
        .unwrap();

    let stop = AtomicBool::new(false);
    let mut last = None;
    run(
        scripted(0, 2, &clock),
        CoreConfig::for_cells(4),
        clock,
        Some(queue),
        RunOptions {
            mode: SamplingMode::Direct,
            max_polls: Some(2),
        },
        &stop,
        |o| last = Some(o.clone()),
    )
    .unwrap();
    let last = last.unwrap();
    assert!(!last.allow_discharge);
    assert!(!last.allow_balancing);
    assert!(last.allow_charge);
    assert!(last.dcl > 0.0, "limits are not replaced by toggles");
}

#[test]
fn sampled_mode_feeds_the_core_from_a_thread() {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let mut cfg = CoreConfig::for_cells(4);
    cfg.poll_interval = Duration::from_millis(20);
    let stop = AtomicBool::new(false);
    let mut served = 0;
    let summary = run(
        scripted(0, 200, &clock),
        cfg,
        clock,
        None,
        RunOptions {
            mode: SamplingMode::Sampled,
            max_polls: Some(10),
        },
        &stop,
        |o| {
            if o.action == Action::PassThrough {
                served += 1;
            }
        },
    )
    .unwrap();
    assert_eq!(summary.cycles, 10);
    assert_eq!(served, 10, "the first cycle waits for the sampler");
}

#[rstest]
#[case::strict(DisconnectMode::Strict)]
#[case::lenient(DisconnectMode::Lenient)]
fn sampled_mode_never_blocks_a_healthy_source(#[case] mode: DisconnectMode) {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let mut cfg = CoreConfig::for_cells(4);
    cfg.poll_interval = Duration::from_millis(20);
    cfg.disconnect.mode = mode;
    let stop = AtomicBool::new(false);
    let summary = run(
        scripted(0, 500, &clock),
        cfg,
        clock,
        None,
        RunOptions {
            mode: SamplingMode::Sampled,
            max_polls: Some(50),
        },
        &stop,
        |_| {},
    )
    .unwrap();
    assert_eq!(summary.cycles, 50);
    assert_eq!(summary.held_cycles, 0);
    assert_eq!(summary.blocked_cycles, 0);
}

#[test]
fn boxed_battery_steps_from_its_source() {
    let clock = TestClock::new();
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let mut battery = Battery::builder()
        .with_source(scripted(1, 1, &shared))
        .with_config(CoreConfig::for_cells(4))
        .with_clock(shared)
        .build()
        .unwrap();
    assert_eq!(battery.step().action, Action::PassThrough);
    clock.advance(Duration::from_secs(1));
    assert_eq!(battery.step().action, Action::HoldLastKnown);
    assert_eq!(battery.cycles(), 2);
}
