use std::sync::Arc;
use std::time::Duration;

use battctl_core::mocks::SilentSource;
use battctl_core::{ControlCurve, CoreConfig, CurveMode, DirectionCurves, StepEdge, build_core};
use battctl_traits::clock::test_clock::TestClock;
use battctl_traits::{Clock, Snapshot};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

// Deterministic cell voltages with a little jitter around `base`.
fn synth_cells(n: usize, base: f64, seed: u32) -> Vec<f64> {
    let mut state = seed.max(1);
    (0..n)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            base + (f64::from(state) / f64::from(u32::MAX) - 0.5) * 0.02
        })
        .collect()
}

fn bench_config(cells: usize, mode: CurveMode) -> CoreConfig {
    let mut cfg = CoreConfig::for_cells(cells);
    cfg.current.mode = mode;
    cfg.current.charge = DirectionCurves {
        cell_voltage: ControlCurve::new(&[3.40, 3.50, 3.60], &[1.0, 0.5, 0.0], StepEdge::Lower).ok(),
        temperature: ControlCurve::new(&[0.0, 5.0, 45.0, 55.0], &[0.0, 1.0, 1.0, 0.0], StepEdge::Lower)
            .ok(),
        ..DirectionCurves::default()
    };
    cfg.current.discharge = DirectionCurves {
        cell_voltage: ControlCurve::new(&[2.8, 3.0, 3.1], &[0.0, 0.5, 1.0], StepEdge::Upper).ok(),
        ..DirectionCurves::default()
    };
    cfg.time_to_soc.points = vec![100, 50, 20];
    cfg.soc.capacity_ah = Some(280.0);
    cfg
}

pub fn bench_cycle(c: &mut Criterion) {
    let mut g = c.benchmark_group("control_cycle");
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p battctl_core --bench control_cycle
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(Duration::from_millis(ms_u64));
    }

    for &(cells, mode) in &[(16usize, CurveMode::Step), (16, CurveMode::Linear), (32, CurveMode::Linear)] {
        let clock = TestClock::new();
        let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
        let Ok(mut core) = build_core(
            SilentSource::new(cells),
            bench_config(cells, mode),
            Some(shared),
            None,
        ) else {
            continue;
        };
        let voltages = synth_cells(cells, 3.40, 0xC0FFEE);
        g.bench_function(format!("cells_{cells}_{mode:?}"), |b| {
            b.iter(|| {
                clock.advance(Duration::from_secs(1));
                let snap = Snapshot::new(voltages.clone(), 12.5, clock.now())
                    .with_temperature(0, 25.0)
                    .with_soc(70.0);
                black_box(core.step_from_snapshot(black_box(snap)));
            });
        });
    }
    g.finish();
}

criterion_group!(control_cycle, bench_cycle);
criterion_main!(control_cycle);
