use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("unknown axis: {0}")]
    UnknownAxis(String),
    #[error("mount {mount}: expected instrument {expected} but got {found}")]
    InstrumentMismatch {
        mount: String,
        expected: String,
        found: String,
    },
    #[error("unknown instrument model: {0}")]
    UnknownModel(String),
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("motion fault: {0}")]
    MotionFault(String),
    #[error("controller timeout")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
