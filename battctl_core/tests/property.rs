use std::time::{Duration, Instant};

use battctl_core::config::SocCfg;
use battctl_core::limits::CurrentLimiter;
use battctl_core::soc::SocEstimator;
use battctl_core::{
    BatteryState, ControlCurve, CurrentCfg, CurveMode, DirectionCurves, SocSource, StepEdge,
};
use battctl_traits::Snapshot;
use proptest::prelude::*;

fn limiter(mode: CurveMode, recovery_percent: f64) -> CurrentLimiter {
    let charge = DirectionCurves {
        cell_voltage: Some(
            ControlCurve::new(&[3.40, 3.50, 3.60], &[1.0, 0.5, 0.0], StepEdge::Lower).unwrap(),
        ),
        temperature: Some(
            ControlCurve::new(&[0.0, 2.0, 5.0, 45.0, 55.0], &[0.0, 0.1, 1.0, 1.0, 0.0], StepEdge::Lower)
                .unwrap(),
        ),
        ..DirectionCurves::default()
    };
    let discharge = DirectionCurves {
        cell_voltage: Some(
            ControlCurve::new(&[2.8, 3.0, 3.1], &[0.0, 0.5, 1.0], StepEdge::Upper).unwrap(),
        ),
        ..DirectionCurves::default()
    };
    CurrentLimiter::new(CurrentCfg {
        max_charge: 80.0,
        max_discharge: 120.0,
        mode,
        charge_recovery_percent: recovery_percent,
        discharge_recovery_percent: recovery_percent,
        recalculate_every: Duration::from_secs(30),
        charge,
        discharge,
        ..CurrentCfg::default()
    })
}

prop_compose! {
    fn snapshot_strategy()(
        cells in prop::collection::vec(2.5f64..3.8, 4),
        temp in prop::option::of(-20.0f64..70.0),
        current in -200.0f64..200.0,
    ) -> (Vec<f64>, Option<f64>, f64) {
        (cells, temp, current)
    }
}

fn mode_strategy() -> impl Strategy<Value = CurveMode> {
    prop_oneof![Just(CurveMode::Linear), Just(CurveMode::Step)]
}

proptest! {
    #[test]
    fn limits_stay_within_configured_maximum(
        mode in mode_strategy(),
        frames in prop::collection::vec(snapshot_strategy(), 1..80),
    ) {
        let t0 = Instant::now();
        let mut lim = limiter(mode, 1.0);
        let mut st = BatteryState::new(t0, 50.0);
        for (i, (cells, temp, current)) in frames.into_iter().enumerate() {
            let at = t0 + Duration::from_secs(i as u64);
            let mut snap = Snapshot::new(cells, current, at);
            if let Some(t) = temp {
                snap = snap.with_temperature(0, t);
            }
            let out = lim.compute(&mut st, &snap, at);
            prop_assert!(out.ccl >= 0.0 && out.ccl <= 80.0, "ccl {}", out.ccl);
            prop_assert!(out.dcl >= 0.0 && out.dcl <= 120.0, "dcl {}", out.dcl);
            prop_assert!(out.ccl.is_finite() && out.dcl.is_finite());
        }
    }

    #[test]
    fn zeroed_limit_releases_only_above_recovery_threshold(
        temps in prop::collection::vec(-5.0f64..10.0, 2..200),
        recovery_percent in 0.5f64..20.0,
    ) {
        let t0 = Instant::now();
        let mut lim = limiter(CurveMode::Linear, recovery_percent);
        let mut st = BatteryState::new(t0, 50.0);
        let threshold = 80.0 * recovery_percent / 100.0;
        let mut prev = None::<f64>;
        for (i, t) in temps.into_iter().enumerate() {
            let at = t0 + Duration::from_secs(i as u64);
            let snap = Snapshot::new(vec![3.3; 4], 0.0, at).with_temperature(0, t);
            let ccl = lim.compute(&mut st, &snap, at).ccl;
            if prev == Some(0.0) && ccl > 0.0 {
                prop_assert!(ccl > threshold, "released at {ccl} <= {threshold}");
            }
            prev = Some(ccl);
        }
    }

    #[test]
    fn integrated_soc_stays_in_range(
        currents in prop::collection::vec(-500.0f64..500.0, 1..300),
        step_s in 1u64..600,
    ) {
        let t0 = Instant::now();
        let mut est = SocEstimator::new(
            SocCfg {
                source: SocSource::Integrate,
                capacity_ah: Some(20.0),
                ..SocCfg::default()
            },
            2.9,
        );
        let mut st = BatteryState::new(t0, 50.0);
        for (i, c) in currents.into_iter().enumerate() {
            let at = t0 + Duration::from_secs(step_s * i as u64);
            let u = est.update(&mut st, &Snapshot::new(vec![3.3; 4], c, at), step_s as f64);
            prop_assert!((0.0..=100.0).contains(&u.soc), "soc {}", u.soc);
        }
    }

    #[test]
    fn constant_current_integrates_exactly(
        current in -50.0f64..50.0,
        hours in 0.1f64..2.0,
    ) {
        let t0 = Instant::now();
        let mut est = SocEstimator::new(
            SocCfg {
                source: SocSource::Integrate,
                capacity_ah: Some(100.0),
                ..SocCfg::default()
            },
            2.0,
        );
        let mut st = BatteryState::new(t0, 50.0);
        est.update(&mut st, &Snapshot::new(vec![3.3; 4], current, t0), 0.0);
        let u = est.update(&mut st, &Snapshot::new(vec![3.3; 4], current, t0), hours * 3600.0);
        let expected = (50.0 + 100.0 * current * hours / 100.0).clamp(0.0, 100.0);
        prop_assert!((u.soc - expected).abs() < 1e-6);
    }
}
