#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Telemetry sources that stand in for protocol drivers.
//!
//! - `SimulatedBms`: LiFePO4 pack model driven by a current profile
//! - `CsvReplaySource`: recorded telemetry played back row by row

pub mod error;
pub mod pack;
pub mod replay;

pub use error::SimError;
pub use pack::{CurrentProfile, SimulatedBms};
pub use replay::CsvReplaySource;
