use pipetter_traits::Mount;
use thiserror::Error;

use crate::types::{Axis, CriticalPoint};

/// Failure kinds surfaced by the control core.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HardwareError {
    #[error("cannot determine position: home the robot first")]
    MustHome,
    #[error("no instrument attached on {mount} mount")]
    InstrumentNotAttached { mount: Mount },
    #[error("cannot pick up tip: a tip is already attached on {mount} mount")]
    TipAlreadyAttached { mount: Mount },
    #[error("no tip attached on {mount} mount")]
    NoTipAttached { mount: Mount },
    #[error("pipette on {mount} mount not ready to aspirate")]
    NotReadyToAspirate { mount: Mount },
    #[error("paired operation cannot act on one side only")]
    PairedOperationAsymmetry,
    #[error(
        "moves must specify either exactly an x, y and at least one mount z, or none of them: {0}"
    )]
    AxisTransformShape(String),
    #[error("execution cancelled")]
    ExecutionCancelled,
    #[error("{axis} target {value:.3} outside bounds [{min:.3}, {max:.3}]")]
    OutOfBounds {
        axis: Axis,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("critical point {cp:?} is not valid for the {mount} mount instrument")]
    InvalidCriticalPoint { mount: Mount, cp: CriticalPoint },
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("no ul-per-mm breakpoint covers {ul} ul")]
    VolumeConversion { ul: f64 },
    #[error("calibration error: {0}")]
    Calibration(String),
    #[error("unsupported hardware: {0}")]
    UnsupportedHardware(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("backend timeout")]
    BackendTimeout,
    #[error("configuration error: {0}")]
    Config(String),
}

impl HardwareError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing backend")]
    MissingBackend,
    #[error("backend handle is already checked out by a live controller")]
    BackendInUse,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Raise a typed error as a report.
pub(crate) fn fail<T>(kind: HardwareError) -> Result<T> {
    Err(Report::new(kind))
}

/// Extract the typed kind from a report, if it carries one.
pub fn kind(err: &Report) -> Option<&HardwareError> {
    err.downcast_ref::<HardwareError>()
}
