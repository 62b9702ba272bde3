//! Per-battery control state.

use std::time::Instant;

use battctl_traits::Snapshot;

/// Charging phase selected by the CVL state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeMode {
    #[default]
    Bulk,
    Float,
}

impl ChargeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::Float => "float",
        }
    }
}

impl std::fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one battery instance.
///
/// Owned by `BatteryCore` and changed only inside a poll cycle. Components
/// receive `&mut BatteryState` for the fields they are responsible for.
#[derive(Debug, Clone)]
pub struct BatteryState {
    /// Estimated state of charge, 0..=100.
    pub soc: f64,
    pub charge_mode: ChargeMode,
    pub mode_since: Instant,
    /// Start of the current float-switch wait window.
    pub last_voltage_diff_ok_since: Option<Instant>,
    pub ccl_zero_since: Option<Instant>,
    pub dcl_zero_since: Option<Instant>,
    pub last_good_snapshot: Option<Snapshot>,
    pub last_good_at: Option<Instant>,
    /// Last time the highest cell reached the SoC reset voltage.
    pub soc_reset_timer_start: Option<Instant>,
    /// Voltage subtracted from the bulk target by the integral controller.
    pub i_controller_integral: f64,
}

impl BatteryState {
    pub fn new(now: Instant, initial_soc: f64) -> Self {
        Self {
            soc: initial_soc.clamp(0.0, 100.0),
            charge_mode: ChargeMode::Bulk,
            mode_since: now,
            last_voltage_diff_ok_since: None,
            ccl_zero_since: None,
            dcl_zero_since: None,
            last_good_snapshot: None,
            last_good_at: None,
            soc_reset_timer_start: None,
            i_controller_integral: 0.0,
        }
    }
}
