use thiserror::Error;

/// Errors raised by the control core outside the per-cycle path.
///
/// Degraded telemetry never surfaces here: it becomes a limiting cause or a
/// disconnect action. These variants cover construction and plumbing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid control curve: {0}")]
    Curve(String),
    #[error("telemetry source error: {0}")]
    Source(String),
    #[error("command queue closed")]
    CommandQueueClosed,
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing telemetry source")]
    MissingSource,
    #[error("missing configuration")]
    MissingConfig,
    #[error("cell count mismatch: configured {configured}, source reports {reported}")]
    CellCountMismatch { configured: usize, reported: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
