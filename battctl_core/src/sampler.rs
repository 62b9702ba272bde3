//! Background telemetry sampling.
//!
//! Spawns a thread that owns the `TelemetrySource`, keeps only the newest
//! snapshot in a bounded channel, and counts failed polls.
//!
//! Each `Sampler` spawns exactly one thread that is shut down and joined
//! when the `Sampler` is dropped.
use battctl_traits::{Clock, Snapshot, TelemetrySource};
use crossbeam_channel as xch;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub struct Sampler {
    rx: xch::Receiver<Snapshot>,
    failures: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    /// Poll `source` every `period`, waiting at most `timeout` per poll.
    pub fn spawn<S: TelemetrySource + Send + 'static>(
        mut source: S,
        period: Duration,
        timeout: Duration,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let (tx, rx) = xch::bounded(1);
        let drain = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let failures = Arc::new(AtomicU64::new(0));
        let failures_clone = failures.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                let started = clock.now();
                match source.poll(timeout) {
                    Ok(snap) => {
                        // Newest wins: discard an unread snapshot first.
                        let _ = drain.try_recv();
                        let _ = tx.try_send(snap);
                    }
                    Err(e) => {
                        failures_clone.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(error = %e, "sampler poll failed");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                let spent = clock.now().saturating_duration_since(started);
                clock.sleep(period.saturating_sub(spent));
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            rx,
            failures,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Newest snapshot not yet taken, if any.
    pub fn latest(&self) -> Option<Snapshot> {
        self.rx.try_iter().last()
    }

    /// Newest snapshot not yet taken, waiting up to `timeout` for the next
    /// one when none is queued.
    pub fn wait_latest(&self, timeout: Duration) -> Option<Snapshot> {
        if let Some(snap) = self.rx.try_iter().last() {
            return Some(snap);
        }
        self.rx.recv_timeout(timeout).ok()
    }

    /// Number of polls that failed since the sampler started.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // The thread exits after at most one poll timeout plus one period.
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("sampler thread joined"),
                Err(e) => tracing::warn!(?e, "sampler thread panicked during shutdown"),
            }
        }
    }
}
