//! Error type shared by every dualtime crate.

use thiserror::Error;

/// Result type used throughout the clock pipeline.
pub type ClockResult<T> = Result<T, ClockError>;

/// Errors raised by clock operations.
///
/// Ordinary skew is never an error; it is absorbed by the resynchronizer.
/// What remains are caller contract violations, arithmetic overflow and the
/// unrecoverable divergence fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    /// A correction rate was zero or negative.
    #[error("correction rate must be positive")]
    NegativeRate,
    /// A correction pair was pushed to a position the clock does not have.
    #[error("stage position {position} out of range for {stages} stages")]
    InvalidStage { position: usize, stages: usize },
    /// The clock was asked to move backward.
    #[error("time may only move forward (current {current}, requested {requested})")]
    NonMonotonicTime { current: i64, requested: i64 },
    /// A resynchronization error exceeded the theoretical bound.
    #[error("resync error {error} exceeds bound {bound}")]
    Divergence { error: i64, bound: i64 },
    /// An intermediate value left the fixed-point range.
    #[error("fixed-point overflow")]
    Overflow,
    /// The operation needs a resynchronizer that has not been started.
    #[error("clock not initialized")]
    NotInitialized,
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

#[cfg(feature = "defmt")]
impl defmt::Format for ClockError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::NegativeRate => defmt::write!(fmt, "NegativeRate"),
            Self::InvalidStage { position, stages } => {
                defmt::write!(fmt, "InvalidStage({=usize}/{=usize})", position, stages)
            }
            Self::NonMonotonicTime { current, requested } => {
                defmt::write!(fmt, "NonMonotonicTime({=i64} -> {=i64})", current, requested)
            }
            Self::Divergence { error, bound } => {
                defmt::write!(fmt, "Divergence({=i64} > {=i64})", error, bound)
            }
            Self::Overflow => defmt::write!(fmt, "Overflow"),
            Self::NotInitialized => defmt::write!(fmt, "NotInitialized"),
            Self::InvalidConfig(msg) => defmt::write!(fmt, "InvalidConfig({=str})", msg),
        }
    }
}
