pub mod clock;
pub mod telemetry;

pub use clock::{Clock, MonotonicClock};
pub use telemetry::{MAX_TEMPERATURE_CHANNELS, Snapshot};

/// A protocol adapter that produces uniform telemetry snapshots.
///
/// Serial, Bluetooth and CAN drivers live outside the control core and only
/// meet it here. `poll` may block on I/O up to `timeout`; an `Err` is treated
/// by the core as a missed poll.
pub trait TelemetrySource {
    fn poll(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Snapshot, Box<dyn std::error::Error + Send + Sync>>;

    /// Number of cells this source reports. Fixed for the source's lifetime.
    fn cell_count(&self) -> usize;
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Box<T> {
    fn poll(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Snapshot, Box<dyn std::error::Error + Send + Sync>> {
        (**self).poll(timeout)
    }

    fn cell_count(&self) -> usize {
        (**self).cell_count()
    }
}
