#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Battery control core (protocol-agnostic).
//!
//! Turns per-poll BMS telemetry into the four values an inverter/charger
//! needs: charge voltage limit (CVL), charge and discharge current limits
//! (CCL/DCL) and state of charge. All BMS interaction goes through
//! `battctl_traits::TelemetrySource`.
//!
//! ## Architecture
//!
//! - **SoC**: BMS pass-through or coulomb counting with hard resets (`soc`)
//! - **Current limits**: worst case over control curves, hysteresis, cadence (`limits`, `curve`)
//! - **CVL**: bulk/float state machine and bulk limiters (`cvl`)
//! - **Fail-safe**: hold or block on missing telemetry (`disconnect`)
//! - **Estimates**: time to SoC targets (`time_to_soc`)
//! - **Loop**: `BatteryCore`, type-state builder, runner and sampler thread
//!
//! ## Time
//!
//! Every timer is measured on the injected `Clock`, so tests can run hours of
//! telemetry against `TestClock` instantly.

pub mod alarms;
pub mod builder;
pub mod cadence;
pub mod commands;
pub mod config;
pub mod conversions;
pub mod core;
pub mod curve;
pub mod cvl;
pub mod disconnect;
pub mod error;
pub mod history;
pub mod limits;
pub mod mocks;
pub mod runner;
pub mod sampler;
pub mod soc;
pub mod state;
pub mod status;
pub mod time_to_soc;
pub mod util;

pub use crate::alarms::{AlarmLevel, Alarms};
pub use crate::builder::{Battery, BatteryBuilder, Missing, Set, build_core};
pub use crate::commands::{Command, CommandQueue, CommandSender, Overrides};
pub use crate::config::{
    AlarmCfg, CellCfg, CoreConfig, CurrentCfg, CurrentCorrection, CvlCfg, CvlMode, DirectionCurves,
    DisconnectCfg, DisconnectMode, SocCfg, SocResetCfg, SocSource, Threshold, TimeToSocCfg,
};
pub use crate::core::BatteryCore;
pub use crate::curve::{ControlCurve, CurveMode, StepEdge};
pub use crate::disconnect::Action;
pub use crate::error::{BuildError, CoreError, Report, Result};
pub use crate::history::History;
pub use crate::limits::LimitCause;
pub use crate::runner::{RunOptions, RunSummary, SamplingMode};
pub use crate::state::{BatteryState, ChargeMode};
pub use crate::status::{ChargeDetail, Outputs};
