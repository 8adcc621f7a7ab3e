//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("{what}: expected shape {expected}, found {found}")]
    Shape {
        what: &'static str,
        expected: String,
        found: String,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("not implemented: {0}")]
    Unimplemented(String),

    #[error("calibration did not converge after {iterations} rescaling steps (aligned fraction {last_fraction:.3})")]
    CalibrationDiverged { iterations: usize, last_fraction: f64 },

    #[error("linear program failed: {0}")]
    Lp(String),

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("{failed} experiment(s) failed; first: {first}")]
    SweepFailed { failed: usize, first: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, AlignError>;

impl AlignError {
    pub(crate) fn shape(what: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        AlignError::Shape {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Fail with a `Precondition` error unless `cond` holds.
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::error::AlignError::Precondition(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure;
