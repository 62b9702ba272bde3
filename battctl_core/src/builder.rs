//! Type-state builder for `Battery` and the generic `build_core` constructor.
//!
//! The builder enforces at compile time that a telemetry source and a
//! configuration are provided before `build()` is available. `try_build()`
//! is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use battctl_traits::{Clock, MonotonicClock, TelemetrySource};

use crate::commands::CommandQueue;
use crate::config::{CoreConfig, SocSource};
use crate::core::BatteryCore;
use crate::error::{BuildError, Result};

/// Dynamically dispatched core over any boxed source.
pub type Battery = BatteryCore<Box<dyn TelemetrySource + Send>>;

impl Battery {
    /// Start building a Battery.
    pub fn builder() -> BatteryBuilder<Missing, Missing> {
        BatteryBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Battery`. Everything is validated on `build()`.
pub struct BatteryBuilder<S, C> {
    source: Option<Box<dyn TelemetrySource + Send>>,
    config: Option<CoreConfig>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    commands: Option<CommandQueue>,
    _s: PhantomData<S>,
    _c: PhantomData<C>,
}

impl Default for BatteryBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            source: None,
            config: None,
            clock: None,
            commands: None,
            _s: PhantomData,
            _c: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

/// Validate configuration against the source and construct a `BatteryCore`.
///
/// Single source of truth for construction, used by both
/// `BatteryBuilder::try_build()` and `build_core()`.
fn validate_and_build<S: TelemetrySource>(
    source: S,
    cfg: CoreConfig,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    commands: Option<CommandQueue>,
) -> Result<BatteryCore<S>> {
    // ── Validation ───────────────────────────────────────────────────────────
    if cfg.cell_count == 0 {
        return Err(invalid("cell_count must be >= 1"));
    }
    if source.cell_count() != cfg.cell_count {
        return Err(eyre::Report::new(BuildError::CellCountMismatch {
            configured: cfg.cell_count,
            reported: source.cell_count(),
        }));
    }
    if cfg.poll_interval.is_zero() {
        return Err(invalid("poll_interval must be > 0"));
    }
    let cell = &cfg.cell;
    if !(cell.min_voltage.is_finite() && cell.max_voltage.is_finite() && cell.float_voltage.is_finite())
    {
        return Err(invalid("cell voltages must be finite"));
    }
    if cell.min_voltage >= cell.max_voltage {
        return Err(invalid("cell min_voltage must be below max_voltage"));
    }
    if !(cell.min_voltage..=cell.max_voltage).contains(&cell.float_voltage) {
        return Err(invalid("cell float_voltage must be between min_voltage and max_voltage"));
    }
    let cur = &cfg.current;
    for max in [cur.max_charge, cur.max_discharge] {
        if !max.is_finite() || max < 0.0 {
            return Err(invalid("maximum currents must be finite and >= 0"));
        }
    }
    for pct in [cur.charge_recovery_percent, cur.discharge_recovery_percent] {
        if !(0.0..=100.0).contains(&pct) {
            return Err(invalid("recovery percent must be in [0, 100]"));
        }
    }
    if let Some(reset) = &cfg.soc.reset
        && reset.cell_voltage < cell.max_voltage
    {
        return Err(invalid("SoC reset voltage must be >= cell max_voltage"));
    }
    if cfg.soc.source == SocSource::Integrate
        && !cfg.soc.capacity_ah.is_some_and(|c| c.is_finite() && c > 0.0)
    {
        return Err(invalid("capacity_ah is required for SoC integration"));
    }
    if cfg.disconnect.safe_band_min >= cfg.disconnect.safe_band_max {
        return Err(invalid("disconnect safe band min must be below max"));
    }
    if cfg.time_to_soc.recalculate_every
        < std::time::Duration::from_secs(battctl_config::MIN_TIME_TO_SOC_RECALC_S)
    {
        return Err(invalid("time-to-SoC recalculation must be >= 5 s"));
    }
    if cfg.time_to_soc.points.iter().any(|p| *p > 100) {
        return Err(invalid("time-to-SoC points must be <= 100"));
    }

    // ── Construct ────────────────────────────────────────────────────────────
    let clock = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
    tracing::debug!(
        cells = cfg.cell_count,
        bulk_v = cfg.bulk_voltage(),
        float_v = cfg.float_voltage(),
        soc_source = ?cfg.soc.source,
        disconnect = ?cfg.disconnect.mode,
        "battery core built"
    );
    Ok(BatteryCore::new(
        source,
        cfg,
        clock,
        commands.unwrap_or_default(),
    ))
}

impl<S, C> BatteryBuilder<S, C> {
    /// Fallible build available in any type-state; returns a detailed error for missing pieces.
    pub fn try_build(self) -> Result<Battery> {
        let source = self
            .source
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSource))?;
        let config = self
            .config
            .ok_or_else(|| eyre::Report::new(BuildError::MissingConfig))?;
        validate_and_build(source, config, self.clock, self.commands)
    }
}

/// Chainable setters that do not affect type-state.
impl<S, C> BatteryBuilder<S, C> {
    /// Provide a custom clock; defaults to `MonotonicClock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a queue created before the core, e.g. one whose sender was handed
    /// to a control socket already.
    #[must_use]
    pub fn with_commands(mut self, commands: CommandQueue) -> Self {
        self.commands = Some(commands);
        self
    }
}

// Setters that advance type-state
impl<C> BatteryBuilder<Missing, C> {
    pub fn with_source(
        self,
        source: impl TelemetrySource + Send + 'static,
    ) -> BatteryBuilder<Set, C> {
        BatteryBuilder {
            source: Some(Box::new(source)),
            config: self.config,
            clock: self.clock,
            commands: self.commands,
            _s: PhantomData,
            _c: PhantomData,
        }
    }
}

impl<S> BatteryBuilder<S, Missing> {
    pub fn with_config(self, config: CoreConfig) -> BatteryBuilder<S, Set> {
        BatteryBuilder {
            source: self.source,
            config: Some(config),
            clock: self.clock,
            commands: self.commands,
            _s: PhantomData,
            _c: PhantomData,
        }
    }
}

impl BatteryBuilder<Set, Set> {
    /// Validate and build. Only available once source and config are set.
    pub fn build(self) -> Result<Battery> {
        self.try_build()
    }
}

/// Build a statically dispatched core from a concrete source.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_core<S>(
    source: S,
    cfg: CoreConfig,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    commands: Option<CommandQueue>,
) -> Result<BatteryCore<S>>
where
    S: TelemetrySource,
{
    validate_and_build(source, cfg, clock, commands)
}
