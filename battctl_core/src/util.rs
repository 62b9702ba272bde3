//! Common time helpers for battctl_core.

use std::time::{Duration, Instant};

/// Convert seconds to a `Duration`, mapping negative or non-finite input to
/// zero and saturating on overflow.
#[inline]
pub fn duration_from_secs_f64(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Seconds from `earlier` to `later`, or 0 when `later` is not after it.
#[inline]
pub fn secs_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_inputs_become_zero() {
        assert_eq!(duration_from_secs_f64(-1.0), Duration::ZERO);
        assert_eq!(duration_from_secs_f64(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs_f64(f64::INFINITY), Duration::MAX);
        assert_eq!(duration_from_secs_f64(0.25), Duration::from_millis(250));
    }

    #[test]
    fn secs_between_saturates() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1500);
        assert!((secs_between(t0, t1) - 1.5).abs() < 1e-12);
        assert_eq!(secs_between(t1, t0), 0.0);
    }
}
